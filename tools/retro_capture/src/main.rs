use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use retro_video::{
    load_video_config, read_back_texture, CoreState, FrameTarget, GpuContext, PixelFormat,
    RewindSettings, Session, ShaderConfig, ShaderKind, VideoConfig,
};
use thiserror::Error;

const CORE_WIDTH: u32 = 320;
const CORE_HEIGHT: u32 = 240;
/// Extra bytes per row so the pitch never equals the packed row size.
const ROW_PADDING: usize = 64;

#[derive(Parser, Debug)]
#[command(about = "Offscreen capture of the retro video pipeline", version)]
struct Args {
    /// Video configuration JSON; defaults are used when omitted.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Number of test pattern frames to feed through the pipeline.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Width of the offscreen target.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Height of the offscreen target.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Shader preset, overriding the configuration file.
    #[arg(long, value_enum)]
    shader: Option<ShaderChoice>,

    /// PNG composited over the presented frame.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    background: Option<PathBuf>,

    /// Where to write the presented frame.
    #[arg(long, value_hint = clap::ValueHint::FilePath, default_value = "capture.png")]
    output: PathBuf,

    /// Also write the raw content frame before any shader pass.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    raw_output: Option<PathBuf>,

    /// Rewind this many frames before the final capture.
    #[arg(long, default_value_t = 0)]
    rewind_steps: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ShaderChoice {
    Default,
    Sharp,
    Crt,
    Lcd,
}

impl From<ShaderChoice> for ShaderKind {
    fn from(choice: ShaderChoice) -> Self {
        match choice {
            ShaderChoice::Default => ShaderKind::Default,
            ShaderChoice::Sharp => ShaderKind::Sharp,
            ShaderChoice::Crt => ShaderKind::Crt,
            ShaderChoice::Lcd => ShaderKind::Lcd,
        }
    }
}

#[derive(Debug, Error)]
enum CaptureError {
    #[error("capture target size must be greater than zero")]
    EmptyTarget,
    #[error("video pipeline was not created")]
    NoVideo,
    #[error("no content frame to capture")]
    NoFrame,
}

/// Stand-in core: scrolling RGB565 colour bars with a padded pitch.
struct TestPatternCore {
    frame: u32,
    pixels: Vec<u8>,
}

impl TestPatternCore {
    fn new() -> Self {
        Self {
            frame: 0,
            pixels: vec![0; Self::pitch() * CORE_HEIGHT as usize],
        }
    }

    fn pitch() -> usize {
        CORE_WIDTH as usize * 2 + ROW_PADDING
    }

    /// Advance one frame and return its pixels.
    fn run_frame(&mut self) -> &[u8] {
        self.frame = self.frame.wrapping_add(1);
        self.draw();
        &self.pixels
    }

    /// Pixels of the current frame without advancing.
    fn current_frame(&mut self) -> &[u8] {
        self.draw();
        &self.pixels
    }

    fn draw(&mut self) {
        const BARS: [u16; 8] = [
            0xFFFF, 0xFFE0, 0x07FF, 0x07E0, 0xF81F, 0xF800, 0x001F, 0x0000,
        ];
        let pitch = Self::pitch();
        let bar_width = CORE_WIDTH / BARS.len() as u32;
        for y in 0..CORE_HEIGHT as usize {
            let row = &mut self.pixels[y * pitch..y * pitch + CORE_WIDTH as usize * 2];
            for (x, pixel) in row.chunks_exact_mut(2).enumerate() {
                let shifted = (x as u32 + self.frame) % CORE_WIDTH;
                let color = BARS[(shifted / bar_width) as usize % BARS.len()];
                pixel.copy_from_slice(&color.to_le_bytes());
            }
        }
    }
}

impl CoreState for TestPatternCore {
    fn serialize_state(&mut self) -> Result<Vec<u8>> {
        Ok(self.frame.to_le_bytes().to_vec())
    }

    fn unserialize_state(&mut self, data: &[u8]) -> Result<()> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected 4 state bytes, got {}", data.len()))?;
        self.frame = u32::from_le_bytes(bytes);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        return Err(CaptureError::EmptyTarget.into());
    }

    let mut config = match &args.config {
        Some(path) => load_video_config(path)?,
        None => VideoConfig::default(),
    };
    apply_args(&mut config, &args);

    let gpu = pollster::block_on(GpuContext::headless(wgpu::TextureFormat::Rgba8Unorm))?;
    let (texture, view) = create_target(&gpu, args.width, args.height);
    let target = FrameTarget {
        view: &view,
        width: args.width,
        height: args.height,
    };
    let mut session = Session::with_config(gpu.clone(), &config)?;

    if let Some(path) = &args.background {
        let image = image::open(path)
            .with_context(|| format!("loading background {}", path.display()))?
            .to_rgba8();
        if !session.set_background_image(image.as_raw(), image.width(), image.height()) {
            log::warn!("[retro_capture] background {} ignored", path.display());
        }
    }

    let mut core = TestPatternCore::new();
    let pitch = TestPatternCore::pitch();
    for _ in 0..args.frames {
        let frame = core.run_frame();
        session.on_new_frame(Some(frame), CORE_WIDTH, CORE_HEIGHT, pitch);
        session.capture_rewind_state(&mut core);
        session.render_frame(&target);
    }
    log::info!(
        "[retro_capture] fed {} frames, rewind buffer {:.0}% full",
        args.frames,
        session.rewind_usage() * 100.0
    );

    let mut rewound = 0;
    while rewound < args.rewind_steps && session.rewind_frame(&mut core) {
        rewound += 1;
    }
    if rewound > 0 {
        log::info!(
            "[retro_capture] rewound {rewound} frames to frame {}",
            core.frame
        );
        let frame = core.current_frame();
        session.on_new_frame(Some(frame), CORE_WIDTH, CORE_HEIGHT, pitch);
    }

    let outcome = session.render_frame(&target).ok_or(CaptureError::NoVideo)?;
    log::info!("[retro_capture] final frame: {outcome:?}");

    let pixels = read_back_texture(&gpu, &texture, args.width, args.height)?;
    save_png(&args.output, &pixels, args.width, args.height)?;
    println!("[retro_capture] wrote {}", args.output.display());

    if let Some(path) = &args.raw_output {
        let video = session.video().ok_or(CaptureError::NoVideo)?;
        let raw = video.capture_raw_frame()?.ok_or(CaptureError::NoFrame)?;
        save_png(path, &raw.pixels, raw.width, raw.height)?;
        println!("[retro_capture] wrote raw frame {}", path.display());
    }
    Ok(())
}

fn apply_args(config: &mut VideoConfig, args: &Args) {
    config.geometry.screen_width = args.width;
    config.geometry.screen_height = args.height;
    config.rendering.pixel_format = PixelFormat::Rgb565;
    config.rendering.width = CORE_WIDTH;
    config.rendering.height = CORE_HEIGHT;
    if let Some(choice) = args.shader {
        config.shader = ShaderConfig::new(choice.into());
    }
    if args.rewind_steps > 0 && config.rewind.is_none() {
        config.rewind = Some(RewindSettings {
            slot_count: args.rewind_steps as usize + 1,
            ..RewindSettings::default()
        });
    }
}

fn create_target(gpu: &GpuContext, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("retro-capture-target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: gpu.target_format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn save_png(path: &Path, rgba: &[u8], width: u32, height: u32) -> Result<()> {
    image::save_buffer(path, rgba, width, height, image::ColorType::Rgba8)
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_scrolls_and_leaves_padding_untouched() {
        let mut core = TestPatternCore::new();
        let first = core.run_frame()[..CORE_WIDTH as usize * 2].to_vec();
        let second = core.run_frame().to_vec();
        assert_ne!(first, second[..CORE_WIDTH as usize * 2]);
        let padding = &second[CORE_WIDTH as usize * 2..TestPatternCore::pitch()];
        assert!(padding.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn state_round_trips_through_rewind_bytes() -> Result<()> {
        let mut core = TestPatternCore::new();
        core.run_frame();
        core.run_frame();
        let state = core.serialize_state()?;
        core.run_frame();
        core.unserialize_state(&state)?;
        assert_eq!(core.frame, 2);
        assert!(core.unserialize_state(&[1, 2]).is_err());
        Ok(())
    }

    #[test]
    fn args_force_the_pattern_format_and_rewind_capacity() {
        let args = Args::parse_from(["retro_capture", "--shader", "crt", "--rewind-steps", "5"]);
        let mut config = VideoConfig::default();
        apply_args(&mut config, &args);
        assert_eq!(config.rendering.pixel_format, PixelFormat::Rgb565);
        assert_eq!(config.shader.kind, ShaderKind::Crt);
        assert_eq!(config.rewind.map(|rewind| rewind.slot_count), Some(6));
        assert_eq!(config.geometry.screen_width, 1280);
    }

    #[test]
    fn png_is_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.png");
        save_png(&path, &[255, 0, 0, 255].repeat(4), 2, 2)?;
        let decoded = image::open(&path)?.to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [255, 0, 0, 255]);
        Ok(())
    }
}
