//! Owners of the content texture and of the per-pass offscreen targets.
//!
//! [`Renderer`] is a closed set of two backends. The framebuffer variant
//! owns a content target a hardware core can draw into and that only grows.
//! The image variant re-creates its content texture at each new frame size.
//! Both keep one offscreen target per non-final shader pass so multi-pass
//! chains can hand their output forward.
//!
//! Shaders see `TextureSize` as the allocated content texture size and
//! `InputSize` as the valid frame inside it.

mod framebuffer;
mod image;
mod passes;
mod target;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpu::GpuContext;
use crate::pixel::{FrameError, PixelFormat};

pub use framebuffer::FramebufferRenderer;
pub use image::ImageRenderer;
pub use target::RenderTarget;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to allocate {width}x{height} render target: {reason}")]
    TargetAllocation {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("renderer disabled after an earlier allocation failure")]
    Unusable,
}

/// Construction-time options chosen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingOptions {
    /// The core draws frames itself into the framebuffer variant's target.
    pub hardware_accelerated: bool,
    /// Initial content size; also the maximum size a hardware core draws.
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Default for RenderingOptions {
    fn default() -> Self {
        Self {
            hardware_accelerated: false,
            width: 320,
            height: 240,
            pixel_format: PixelFormat::default(),
        }
    }
}

/// What a pass needs from the renderer before it draws.
#[derive(Clone, Copy)]
pub struct PassData<'a> {
    /// `None` means the pass draws to the frame target.
    pub target: Option<&'a RenderTarget>,
    /// Output of the previous pass, when there is one.
    pub previous: Option<&'a RenderTarget>,
}

/// Layout of one shader pass as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassLayout {
    pub output_size: Option<(u32, u32)>,
}

pub enum Renderer {
    Framebuffer(FramebufferRenderer),
    Image(ImageRenderer),
}

impl Renderer {
    /// Hardware cores always get offscreen targets; software cores upload
    /// straight into a sampled image.
    pub fn new(gpu: &GpuContext, options: RenderingOptions) -> Result<Self, RendererError> {
        if options.hardware_accelerated {
            Ok(Self::Framebuffer(FramebufferRenderer::new(gpu, options)?))
        } else {
            Ok(Self::Image(ImageRenderer::new(gpu, options)?))
        }
    }

    pub fn on_new_frame(
        &mut self,
        gpu: &GpuContext,
        data: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<(), RendererError> {
        match self {
            Self::Framebuffer(renderer) => renderer.on_new_frame(gpu, data, width, height, pitch),
            Self::Image(renderer) => renderer.on_new_frame(gpu, data, width, height, pitch),
        }
    }

    /// A hardware core finished drawing a `width`×`height` frame.
    pub fn on_hardware_frame(&mut self, width: u32, height: u32) {
        match self {
            Self::Framebuffer(renderer) => renderer.on_hardware_frame(width, height),
            Self::Image(_) => {
                log::warn!("[retro_video] hardware frame reported to the image renderer")
            }
        }
    }

    pub fn texture(&self) -> Option<&RenderTarget> {
        match self {
            Self::Framebuffer(renderer) => renderer.texture(),
            Self::Image(renderer) => renderer.texture(),
        }
    }

    pub fn pass_data(&self, pass_index: usize) -> PassData<'_> {
        match self {
            Self::Framebuffer(renderer) => renderer.pass_data(pass_index),
            Self::Image(renderer) => renderer.pass_data(pass_index),
        }
    }

    /// Number of passes that own an offscreen target.
    pub fn pass_target_count(&self) -> usize {
        match self {
            Self::Framebuffer(renderer) => renderer.pass_target_count(),
            Self::Image(renderer) => renderer.pass_target_count(),
        }
    }

    /// Pass targets created so far; unchanged sizes never add to it.
    pub fn pass_allocations(&self) -> u64 {
        match self {
            Self::Framebuffer(renderer) => renderer.pass_allocations(),
            Self::Image(renderer) => renderer.pass_allocations(),
        }
    }

    pub fn set_shaders(&mut self, gpu: &GpuContext, passes: &[PassLayout]) {
        match self {
            Self::Framebuffer(renderer) => renderer.set_shaders(gpu, passes),
            Self::Image(renderer) => renderer.set_shaders(gpu, passes),
        }
    }

    pub fn update_rendered_resolution(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        match self {
            Self::Framebuffer(renderer) => renderer.update_rendered_resolution(gpu, width, height),
            Self::Image(renderer) => renderer.update_rendered_resolution(gpu, width, height),
        }
    }

    pub fn last_frame_size(&self) -> (u32, u32) {
        match self {
            Self::Framebuffer(renderer) => renderer.last_frame_size(),
            Self::Image(renderer) => renderer.last_frame_size(),
        }
    }

    /// Fraction of the content texture covered by the last frame.
    pub fn uv_extent(&self) -> (f32, f32) {
        let (width, height) = self.last_frame_size();
        match self.texture() {
            Some(texture) if width > 0 && height > 0 => (
                width as f32 / texture.width as f32,
                height as f32 / texture.height as f32,
            ),
            _ => (1.0, 1.0),
        }
    }

    /// Attachment a hardware core draws into.
    pub fn current_framebuffer(&self) -> Option<&wgpu::TextureView> {
        match self {
            Self::Framebuffer(renderer) => renderer.texture().map(|target| &target.view),
            Self::Image(_) => None,
        }
    }

    pub fn renders_in_video_callback(&self) -> bool {
        match self {
            Self::Framebuffer(renderer) => renderer.hardware_accelerated(),
            Self::Image(_) => false,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            Self::Framebuffer(renderer) => renderer.pixel_format(),
            Self::Image(renderer) => renderer.pixel_format(),
        }
    }

    pub fn is_usable(&self) -> bool {
        match self {
            Self::Framebuffer(renderer) => !renderer.failed(),
            Self::Image(renderer) => !renderer.failed(),
        }
    }
}
