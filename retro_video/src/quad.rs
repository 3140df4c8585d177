use bytemuck::cast_slice;

use crate::geometry::{Quad, VideoLayout, unit_quad_coordinates};

const QUAD_BYTES: u64 = std::mem::size_of::<Quad>() as u64;

/// Vertex buffers for every quad the presenter draws, rewritten each frame
/// from the current layout.
pub struct QuadBuffers {
    pub foreground: wgpu::Buffer,
    pub framebuffer: wgpu::Buffer,
    pub background: wgpu::Buffer,
    pub content_coords: wgpu::Buffer,
    pub backdrop_coords: wgpu::Buffer,
    /// Plain 0..1 coordinates for whole-texture draws.
    pub unit_coords: wgpu::Buffer,
}

impl QuadBuffers {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: QUAD_BYTES,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        Self {
            foreground: buffer("retro-video-foreground-quad"),
            framebuffer: buffer("retro-video-framebuffer-quad"),
            background: buffer("retro-video-background-quad"),
            content_coords: buffer("retro-video-content-coords"),
            backdrop_coords: buffer("retro-video-backdrop-coords"),
            unit_coords: buffer("retro-video-unit-coords"),
        }
    }

    pub fn upload(&self, queue: &wgpu::Queue, layout: &VideoLayout) {
        let unit = unit_quad_coordinates();
        let writes: [(&wgpu::Buffer, &Quad); 6] = [
            (&self.foreground, layout.foreground_vertices()),
            (&self.framebuffer, layout.framebuffer_vertices()),
            (&self.background, layout.background_vertices()),
            (&self.content_coords, layout.texture_coordinates()),
            (&self.backdrop_coords, layout.backdrop_coordinates()),
            (&self.unit_coords, &unit),
        ];
        for (buffer, quad) in writes {
            queue.write_buffer(buffer, 0, cast_slice(quad));
        }
    }
}
