use anyhow::{Context, Result};
use retro_video::{
    FilterMode, FrameTarget, GpuContext, ImmersiveConfig, PassOverride, PixelFormat, Rect,
    RenderOutcome, RenderingOptions, Session, ShaderConfig, ShaderKind, Video, VideoConfig,
    read_back_texture,
};

const SCREEN: u32 = 64;

fn headless_gpu() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    match pollster::block_on(GpuContext::headless(wgpu::TextureFormat::Rgba8Unorm)) {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

struct Offscreen {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Offscreen {
    fn new(gpu: &GpuContext) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pipeline-test-target"),
            size: wgpu::Extent3d {
                width: SCREEN,
                height: SCREEN,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    fn target(&self) -> FrameTarget<'_> {
        FrameTarget {
            view: &self.view,
            width: SCREEN,
            height: SCREEN,
        }
    }

    fn pixel(&self, gpu: &GpuContext, x: u32, y: u32) -> Result<[u8; 4]> {
        let pixels = read_back_texture(gpu, &self.texture, SCREEN, SCREEN)?;
        let start = ((y * SCREEN + x) * 4) as usize;
        let texel = pixels
            .get(start..start + 4)
            .context("pixel outside the target")?;
        Ok([texel[0], texel[1], texel[2], texel[3]])
    }

    /// Columns of row `y` whose red channel is visibly darker than white.
    fn dark_columns(&self, gpu: &GpuContext, y: u32) -> Result<Vec<u32>> {
        let pixels = read_back_texture(gpu, &self.texture, SCREEN, SCREEN)?;
        let start = (y * SCREEN * 4) as usize;
        let row = pixels
            .get(start..start + SCREEN as usize * 4)
            .context("row outside the target")?;
        Ok((0..SCREEN)
            .filter(|&x| row[x as usize * 4] < 224)
            .collect())
    }
}

fn base_config() -> VideoConfig {
    let mut config = VideoConfig {
        rendering: RenderingOptions {
            pixel_format: PixelFormat::Rgba8888,
            ..RenderingOptions::default()
        },
        ..VideoConfig::default()
    };
    config.geometry.screen_width = SCREEN;
    config.geometry.screen_height = SCREEN;
    config
}

fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((width * height) as usize)
}

fn passes_drawn(outcome: RenderOutcome) -> usize {
    outcome.stats().map_or(0, |stats| stats.passes_drawn)
}

#[test]
fn duplicate_frames_are_skipped() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.skip_duplicate_frames = true;
    let mut video = Video::new(gpu, &config)?;

    let frame = solid_frame(4, 4, [10, 20, 30, 255]);
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert!(matches!(video.present(&target.target()), RenderOutcome::Presented(_)));
    assert_eq!(video.present(&target.target()), RenderOutcome::Skipped);

    // A skipped core frame leaves nothing new to draw.
    video.on_new_frame(None, 4, 4, 16)?;
    assert_eq!(video.present(&target.target()), RenderOutcome::Skipped);

    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert!(matches!(video.present(&target.target()), RenderOutcome::Presented(_)));
    assert_eq!(video.frame_count(), 2);
    Ok(())
}

#[test]
fn layout_setters_redirty_a_clean_video() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut video = Video::new(gpu, &base_config())?;
    video.set_skip_duplicate_frames(true);
    let frame = solid_frame(4, 4, [40, 40, 40, 255]);
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    video.present(&target.target());
    assert!(!video.is_dirty());

    video.update_viewport(Rect {
        x: 0.0,
        y: 0.0,
        width: 0.5,
        height: 1.0,
    });
    assert!(video.is_dirty());
    let stats = video.present(&target.target()).stats().context("presented")?;
    assert_eq!(stats.passes_drawn, 1);
    assert_eq!(video.layout().foreground_bounds().width, 32.0);

    // A changed filter rebuilds the chain on the next draw but is not new content.
    video.set_filter_mode(FilterMode::Linear);
    assert_eq!(video.present(&target.target()), RenderOutcome::Skipped);

    video.set_immersive(Some(ImmersiveConfig::default()));
    let stats = video.present(&target.target()).stats().context("presented")?;
    assert!(stats.backdrop);
    assert_eq!(video.chain_len(), 1);

    video.set_black_frame_insertion(true);
    assert!(matches!(video.present(&target.target()), RenderOutcome::Presented(_)));
    assert_eq!(video.present(&target.target()), RenderOutcome::BlackFrame);
    Ok(())
}

#[test]
fn black_frames_alternate_with_content() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.black_frame_insertion = true;
    let mut video = Video::new(gpu, &config)?;

    let frame = solid_frame(4, 4, [255, 255, 255, 255]);
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert!(matches!(video.present(&target.target()), RenderOutcome::Presented(_)));
    assert_eq!(video.present(&target.target()), RenderOutcome::BlackFrame);
    assert!(matches!(video.present(&target.target()), RenderOutcome::Presented(_)));
    assert_eq!(
        target.pixel(video.gpu(), SCREEN / 2, SCREEN / 2)?,
        [255, 255, 255, 255]
    );
    assert_eq!(video.present(&target.target()), RenderOutcome::BlackFrame);
    assert_eq!(
        target.pixel(video.gpu(), SCREEN / 2, SCREEN / 2)?,
        [0, 0, 0, 255]
    );
    Ok(())
}

#[test]
fn overlay_uploads_on_render_and_suppresses_backdrop() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.immersive = Some(ImmersiveConfig::default());
    let mut video = Video::new(gpu, &config)?;

    let frame = solid_frame(8, 4, [0, 0, 255, 255]);
    video.on_new_frame(Some(&frame), 8, 4, 32)?;
    let stats = video.present(&target.target()).stats().context("presented")?;
    assert!(stats.backdrop);
    assert!(!stats.overlay);

    video.set_background_image(&solid_frame(2, 2, [0, 0, 0, 0]), 2, 2)?;
    assert!(video.background().has_pending_image());
    assert!(!video.background().has_image());

    let stats = video.present(&target.target()).stats().context("presented")?;
    assert!(stats.overlay);
    assert!(!stats.backdrop);
    assert!(video.background().has_image());
    assert!(!video.background().has_pending_image());

    video.clear_background_image();
    let stats = video.present(&target.target()).stats().context("presented")?;
    assert!(!stats.overlay);
    assert!(stats.backdrop);
    Ok(())
}

#[test]
fn session_forwards_frames_and_tears_down() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.rewind = Some(retro_video::RewindSettings {
        slot_count: 4,
        max_state_size: 64,
    });
    let mut session = Session::with_config(gpu, &config)?;

    let frame = solid_frame(4, 4, [7, 7, 7, 255]);
    assert!(session.on_new_frame(Some(&frame), 4, 4, 16));
    assert!(!session.on_new_frame(Some(&frame[..4]), 4, 4, 16));
    if let Some(video) = session.video_mut() {
        video.set_skip_duplicate_frames(true);
    }
    assert!(matches!(
        session.render_frame(&target.target()),
        Some(RenderOutcome::Presented(_))
    ));
    assert_eq!(
        session.render_frame(&target.target()),
        Some(RenderOutcome::Skipped)
    );
    assert_eq!(session.rewind_valid_count(), 0);
    assert!(session.init_rewind_buffer(2, 8));

    session.destroy_video();
    assert!(session.video().is_none());
    assert_eq!(session.render_frame(&target.target()), None);
    Ok(())
}

#[test]
fn capture_returns_the_last_frame() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let mut video = Video::new(gpu, &base_config())?;
    assert_eq!(video.capture_raw_frame()?, None);

    let mut frame = solid_frame(4, 2, [1, 2, 3, 255]);
    frame[..4].copy_from_slice(&[200, 100, 50, 255]);
    video.on_new_frame(Some(&frame), 4, 2, 16)?;

    let captured = video.capture_raw_frame()?.context("frame captured")?;
    assert_eq!((captured.width, captured.height), (4, 2));
    assert_eq!(captured.pixels.len(), 4 * 2 * 4);
    assert_eq!(&captured.pixels[..4], &[200, 100, 50, 255]);
    assert_eq!(&captured.pixels[4..8], &[1, 2, 3, 255]);
    Ok(())
}

#[test]
fn rejected_frame_keeps_the_previous_one() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let mut video = Video::new(gpu, &base_config())?;
    let frame = solid_frame(4, 4, [9, 9, 9, 255]);
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert!(video.on_new_frame(Some(&frame[..10]), 4, 4, 16).is_err());
    assert_eq!(video.renderer().last_frame_size(), (4, 4));
    Ok(())
}

#[test]
fn broken_override_clears_chain_until_config_changes() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.shader.overrides.push(PassOverride {
        index: 0,
        fragment: Some("this is not a shader".to_string()),
        ..PassOverride::default()
    });
    let mut video = Video::new(gpu, &config)?;
    let frame = solid_frame(4, 4, [255, 0, 0, 255]);
    video.on_new_frame(Some(&frame), 4, 4, 16)?;

    let stats = video.present(&target.target()).stats().context("presented")?;
    assert_eq!(video.chain_len(), 0);
    assert_eq!(stats.passes_drawn, 0);
    assert!(!stats.chain_ready);

    // Same configuration again: no retry.
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert_eq!(passes_drawn(video.present(&target.target())), 0);

    video.set_shader_config(ShaderConfig::default());
    video.on_new_frame(Some(&frame), 4, 4, 16)?;
    assert_eq!(passes_drawn(video.present(&target.target())), 1);
    assert_eq!(video.chain_len(), 1);
    Ok(())
}

#[test]
fn crt_chain_draws_through_offscreen_targets() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let frame = solid_frame(4, 4, [255, 255, 255, 255]);
    let mut config = base_config();
    config.shader = ShaderConfig::new(ShaderKind::Crt);

    for hardware_accelerated in [true, false] {
        let target = Offscreen::new(&gpu);
        config.rendering.hardware_accelerated = hardware_accelerated;
        let mut video = Video::new(gpu.clone(), &config)?;
        video.on_new_frame(Some(&frame), 4, 4, 16)?;

        assert_eq!(passes_drawn(video.present(&target.target())), 2);
        assert_eq!(video.chain_len(), 2);
        assert_eq!(video.renderer().pass_target_count(), 1);
        assert_eq!(video.renders_in_video_callback(), hardware_accelerated);
        assert_eq!(video.current_framebuffer().is_some(), hardware_accelerated);

        let [r, g, b, _] = target.pixel(video.gpu(), SCREEN / 2, SCREEN / 2)?;
        assert!(
            r > 0 && g > 0 && b > 0,
            "hardware_accelerated={hardware_accelerated}: centre is {:?}",
            [r, g, b]
        );
    }
    Ok(())
}

#[test]
fn oversized_content_texture_keeps_the_texel_grid() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let frame = solid_frame(4, 4, [255, 255, 255, 255]);
    let mut config = base_config();
    config.shader = ShaderConfig::new(ShaderKind::Lcd);
    config.rendering.width = 8;
    config.rendering.height = 8;

    let mut rows = Vec::new();
    for hardware_accelerated in [true, false] {
        let target = Offscreen::new(&gpu);
        config.rendering.hardware_accelerated = hardware_accelerated;
        let mut video = Video::new(gpu.clone(), &config)?;
        video.on_new_frame(Some(&frame), 4, 4, 16)?;
        assert_eq!(passes_drawn(video.present(&target.target())), 1);
        rows.push(target.dark_columns(video.gpu(), 8)?);
    }

    // Four cells across 64 pixels: the grid lines sit on each cell's edges.
    assert_eq!(rows[0], vec![0, 15, 16, 31, 32, 47, 48, 63]);
    assert_eq!(rows[0], rows[1]);
    Ok(())
}

#[test]
fn framebuffer_content_grows_and_tracks_uv_extent() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let mut config = base_config();
    config.rendering.hardware_accelerated = true;
    config.rendering.width = 8;
    config.rendering.height = 8;
    let mut video = Video::new(gpu, &config)?;
    let content_size = |video: &Video| video.renderer().texture().map(|texture| texture.size());

    video.on_new_frame(Some(&solid_frame(4, 4, [1, 1, 1, 255])), 4, 4, 16)?;
    assert_eq!(content_size(&video), Some((8, 8)));
    assert_eq!(video.renderer().uv_extent(), (0.5, 0.5));

    video.on_new_frame(Some(&solid_frame(16, 4, [1, 1, 1, 255])), 16, 4, 64)?;
    assert_eq!(content_size(&video), Some((16, 8)));
    assert_eq!(video.renderer().uv_extent(), (1.0, 0.5));

    // Smaller frames reuse the grown target.
    video.on_new_frame(Some(&solid_frame(4, 4, [1, 1, 1, 255])), 4, 4, 16)?;
    assert_eq!(content_size(&video), Some((16, 8)));
    assert_eq!(video.renderer().uv_extent(), (0.25, 0.5));
    Ok(())
}

#[test]
fn image_content_matches_each_frame_size() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let mut video = Video::new(gpu, &base_config())?;
    assert_eq!(video.renderer().uv_extent(), (1.0, 1.0));

    video.on_new_frame(Some(&solid_frame(4, 2, [1, 1, 1, 255])), 4, 2, 16)?;
    let content = video.renderer().texture().context("content texture")?;
    assert_eq!(content.size(), (4, 2));
    assert_eq!(video.renderer().uv_extent(), (1.0, 1.0));
    Ok(())
}

#[test]
fn hardware_frame_sets_the_content_region() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.rendering.hardware_accelerated = true;
    config.rendering.width = 8;
    config.rendering.height = 8;
    config.skip_duplicate_frames = true;
    let mut video = Video::new(gpu, &config)?;
    assert!(!video.is_dirty());

    video.on_hardware_frame(6, 4);
    assert!(video.is_dirty());
    assert_eq!(video.renderer().last_frame_size(), (6, 4));
    assert_eq!(video.renderer().uv_extent(), (0.75, 0.5));
    assert_eq!(passes_drawn(video.present(&target.target())), 1);
    assert_eq!(video.present(&target.target()), RenderOutcome::Skipped);
    Ok(())
}

#[test]
fn pass_targets_reallocate_only_when_the_size_changes() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.shader = ShaderConfig::new(ShaderKind::Crt);
    config.rendering.hardware_accelerated = true;
    let mut video = Video::new(gpu, &config)?;
    video.on_new_frame(Some(&solid_frame(4, 4, [1, 1, 1, 255])), 4, 4, 16)?;
    video.present(&target.target());
    assert_eq!(video.renderer().pass_allocations(), 1);

    video.update_screen_size(SCREEN, SCREEN);
    video.present(&target.target());
    assert_eq!(video.renderer().pass_allocations(), 1);

    video.update_screen_size(32, 48);
    assert_eq!(video.renderer().pass_allocations(), 2);
    assert_eq!(passes_drawn(video.present(&target.target())), 2);

    // Reapplying the same chain keeps the existing target.
    video.set_filter_mode(FilterMode::Linear);
    assert_eq!(passes_drawn(video.present(&target.target())), 2);
    assert_eq!(video.renderer().pass_allocations(), 2);
    Ok(())
}

#[test]
fn zero_sized_frame_is_ignored() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut config = base_config();
    config.skip_duplicate_frames = true;
    let mut video = Video::new(gpu, &config)?;

    video.on_new_frame(Some(&[]), 0, 4, 0)?;
    video.on_new_frame(Some(&[]), 4, 0, 16)?;
    assert!(!video.is_dirty());
    assert_eq!(video.renderer().last_frame_size(), (0, 0));
    assert_eq!(video.present(&target.target()), RenderOutcome::Skipped);
    Ok(())
}

#[test]
fn content_is_letterboxed_into_the_target() -> Result<()> {
    let Some(gpu) = headless_gpu() else {
        return Ok(());
    };
    let target = Offscreen::new(&gpu);
    let mut video = Video::new(gpu, &base_config())?;
    let frame = solid_frame(8, 4, [255, 0, 0, 255]);
    video.on_new_frame(Some(&frame), 8, 4, 32)?;
    video.present(&target.target());

    let gpu = video.gpu();
    assert_eq!(target.pixel(gpu, SCREEN / 2, SCREEN / 2)?, [255, 0, 0, 255]);
    assert_eq!(target.pixel(gpu, SCREEN / 2, 2)?, [0, 0, 0, 255]);
    assert_eq!(target.pixel(gpu, SCREEN / 2, SCREEN - 3)?, [0, 0, 0, 255]);
    Ok(())
}
