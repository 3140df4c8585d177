use crate::gpu::{CONTENT_FORMAT, GpuContext};

use super::RendererError;

/// An offscreen texture plus the view passes draw into or sample from.
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn allocate(
        gpu: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> Result<Self, RendererError> {
        let max = gpu.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RendererError::TargetAllocation {
                width,
                height,
                reason: format!("outside 1..={max}"),
            });
        }
        let texture = gpu
            .scoped(wgpu::ErrorFilter::OutOfMemory, |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: CONTENT_FORMAT,
                    usage,
                    view_formats: &[],
                })
            })
            .map_err(|err| RendererError::TargetAllocation {
                width,
                height,
                reason: err.to_string(),
            })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        log::debug!("[retro_video] allocated {label} {width}x{height}");
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Write tightly packed RGBA8 rows into the top-left corner.
    pub fn write_rgba(&self, gpu: &GpuContext, rgba: &[u8], width: u32, height: u32) {
        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}
