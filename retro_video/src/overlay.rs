use std::borrow::Cow;

use naga::ShaderStage;
use thiserror::Error;

use crate::gpu::{GpuContext, create_sampler};
use crate::quad::QuadBuffers;
use crate::renderer::RenderTarget;
use crate::shader::compile_stage;

const OVERLAY_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var uTexture: texture_2d<f32>;
@group(0) @binding(1) var uSampler: sampler;

@vertex
fn vs_main(@location(0) aPosition: vec2<f32>, @location(1) aTexCoord: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(aPosition, 0.0, 1.0);
    output.uv = aTexCoord;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(uTexture, uSampler, input.uv);
}
"#;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("overlay image {width}x{height} needs {expected} bytes, got {actual}")]
    BufferTooSmall {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Renderer(#[from] crate::renderer::RendererError),
    #[error("overlay shader failed: {0}")]
    Shader(String),
}

/// RGBA bytes waiting for the next render on the GPU thread.
struct PendingImage {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

struct OverlayPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

struct OverlayTexture {
    target: RenderTarget,
    bind_group: wgpu::BindGroup,
}

/// A static image composited over the presented frame with alpha blending.
///
/// `set_image` only stages bytes, so it is safe to call before any device
/// work is allowed. The upload happens inside `render`.
#[derive(Default)]
pub struct BackgroundFrame {
    pending: Option<PendingImage>,
    texture: Option<OverlayTexture>,
    pipeline: Option<OverlayPipeline>,
    sampler: Option<wgpu::Sampler>,
    shader_failed: bool,
}

impl BackgroundFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a copy of `rgba`. A zero-sized image is ignored.
    pub fn set_image(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), OverlayError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() < expected {
            return Err(OverlayError::BufferTooSmall {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        self.pending = Some(PendingImage {
            rgba: rgba[..expected].to_vec(),
            width,
            height,
        });
        Ok(())
    }

    pub fn has_image(&self) -> bool {
        self.texture.is_some()
    }

    pub fn has_pending_image(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the texture and any staged bytes.
    pub fn clear_image(&mut self) {
        self.pending = None;
        self.texture = None;
    }

    /// Upload staged bytes if any, then draw over `view`.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        quads: &QuadBuffers,
    ) -> Result<bool, OverlayError> {
        if let Some(pending) = self.pending.take() {
            self.upload(gpu, pending)?;
        }
        let (Some(texture), Some(pipeline)) = (&self.texture, &self.pipeline) else {
            return Ok(false);
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("retro-video-overlay-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        pass.set_bind_group(0, &texture.bind_group, &[]);
        pass.set_vertex_buffer(0, quads.background.slice(..));
        pass.set_vertex_buffer(1, quads.unit_coords.slice(..));
        pass.draw(0..6, 0..1);
        Ok(true)
    }

    fn upload(&mut self, gpu: &GpuContext, pending: PendingImage) -> Result<(), OverlayError> {
        self.ensure_pipeline(gpu)?;
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };

        let size = (pending.width, pending.height);
        let reuse = self
            .texture
            .as_ref()
            .is_some_and(|texture| texture.target.size() == size);
        if !reuse {
            self.texture = None;
            let target = RenderTarget::allocate(
                gpu,
                "retro-video-overlay",
                pending.width,
                pending.height,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            )?;
            let sampler = self.sampler.get_or_insert_with(|| {
                create_sampler(
                    &gpu.device,
                    "retro-video-overlay-sampler",
                    wgpu::FilterMode::Linear,
                )
            });
            let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("retro-video-overlay-bind-group"),
                layout: &pipeline.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&target.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            self.texture = Some(OverlayTexture { target, bind_group });
        }
        if let Some(texture) = &self.texture {
            texture
                .target
                .write_rgba(gpu, &pending.rgba, pending.width, pending.height);
            log::info!(
                "[retro_video] background overlay uploaded {}x{}",
                pending.width,
                pending.height
            );
        }
        Ok(())
    }

    fn ensure_pipeline(&mut self, gpu: &GpuContext) -> Result<(), OverlayError> {
        if self.pipeline.is_some() || self.shader_failed {
            return Ok(());
        }
        match build_pipeline(gpu) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                Ok(())
            }
            Err(err) => {
                log::error!("[retro_video] background overlay disabled: {err}");
                self.shader_failed = true;
                Err(err)
            }
        }
    }
}

fn build_pipeline(gpu: &GpuContext) -> Result<OverlayPipeline, OverlayError> {
    for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
        compile_stage(OVERLAY_SHADER, stage).map_err(|err| OverlayError::Shader(err.to_string()))?;
    }
    let target_format = gpu.target_format;
    gpu.scoped(wgpu::ErrorFilter::Validation, |device| {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("retro-video-overlay-shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(OVERLAY_SHADER)),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("retro-video-overlay-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("retro-video-overlay-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("retro-video-overlay-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: 8,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: 8,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![1 => Float32x2],
                    },
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        OverlayPipeline { pipeline, layout }
    })
    .map_err(|err| OverlayError::Shader(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_image_only_stages_bytes() {
        let mut frame = BackgroundFrame::new();
        frame.set_image(&[255u8; 16], 2, 2).expect("stage");
        assert!(frame.has_pending_image());
        assert!(!frame.has_image());
    }

    #[test]
    fn zero_sized_image_is_ignored() {
        let mut frame = BackgroundFrame::new();
        frame.set_image(&[], 0, 4).expect("no-op");
        assert!(!frame.has_pending_image());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut frame = BackgroundFrame::new();
        let err = frame.set_image(&[0u8; 15], 2, 2).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::BufferTooSmall {
                expected: 16,
                actual: 15,
                ..
            }
        ));
        assert!(!frame.has_pending_image());
    }

    #[test]
    fn clear_discards_pending_bytes() {
        let mut frame = BackgroundFrame::new();
        frame.set_image(&[0u8; 4], 1, 1).expect("stage");
        frame.clear_image();
        assert!(!frame.has_pending_image());
        assert!(!frame.has_image());
    }

    #[test]
    fn overlay_shader_compiles() {
        compile_stage(OVERLAY_SHADER, ShaderStage::Vertex).expect("vertex");
        compile_stage(OVERLAY_SHADER, ShaderStage::Fragment).expect("fragment");
    }
}
