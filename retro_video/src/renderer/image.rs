use crate::gpu::GpuContext;
use crate::pixel::{PixelFormat, decode_to_rgba};

use super::passes::PassTargets;
use super::{PassData, PassLayout, RenderTarget, RendererError, RenderingOptions};

const CONTENT_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Uploads each software frame into a texture of exactly the frame's size.
/// Intermediate pass targets exist only while a multi-pass chain is set.
pub struct ImageRenderer {
    content: Option<RenderTarget>,
    passes: PassTargets,
    pixel_format: PixelFormat,
    last_frame_size: (u32, u32),
    failed: bool,
}

impl ImageRenderer {
    pub fn new(gpu: &GpuContext, options: RenderingOptions) -> Result<Self, RendererError> {
        let content = RenderTarget::allocate(
            gpu,
            "retro-video-image-content",
            options.width.max(1),
            options.height.max(1),
            CONTENT_USAGE,
        )?;
        Ok(Self {
            content: Some(content),
            passes: PassTargets::new(options.width, options.height),
            pixel_format: options.pixel_format,
            last_frame_size: (0, 0),
            failed: false,
        })
    }

    pub fn on_new_frame(
        &mut self,
        gpu: &GpuContext,
        data: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<(), RendererError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if self.failed {
            return Err(RendererError::Unusable);
        }
        let rgba = decode_to_rgba(self.pixel_format, data, width, height, pitch)?;

        let matches = self
            .content
            .as_ref()
            .is_some_and(|content| content.size() == (width, height));
        if !matches {
            // Drop the old texture before asking for the new one.
            self.content = None;
            match RenderTarget::allocate(
                gpu,
                "retro-video-image-content",
                width,
                height,
                CONTENT_USAGE,
            ) {
                Ok(content) => self.content = Some(content),
                Err(err) => {
                    self.fail();
                    return Err(err);
                }
            }
        }
        if let Some(content) = &self.content {
            content.write_rgba(gpu, &rgba, width, height);
        }
        self.last_frame_size = (width, height);
        Ok(())
    }

    pub fn texture(&self) -> Option<&RenderTarget> {
        self.content.as_ref()
    }

    pub fn pass_data(&self, pass_index: usize) -> PassData<'_> {
        self.passes.pass_data(pass_index)
    }

    pub fn pass_target_count(&self) -> usize {
        self.passes.target_count()
    }

    pub fn pass_allocations(&self) -> u64 {
        self.passes.allocations()
    }

    pub fn set_shaders(&mut self, gpu: &GpuContext, passes: &[PassLayout]) {
        if self.failed {
            return;
        }
        if let Err(err) = self.passes.configure(gpu, passes) {
            log::error!("[retro_video] image renderer disabled: {err}");
            self.fail();
        }
    }

    pub fn update_rendered_resolution(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        if self.failed {
            return;
        }
        if let Err(err) = self.passes.resize(gpu, width, height) {
            log::error!("[retro_video] image renderer disabled: {err}");
            self.fail();
        }
    }

    pub fn last_frame_size(&self) -> (u32, u32) {
        self.last_frame_size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self) {
        self.failed = true;
        self.content = None;
        self.passes.clear();
    }
}
