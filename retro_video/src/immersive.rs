use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use naga::ShaderStage;
use serde::{Deserialize, Serialize};
use wgpu::util::DeviceExt;

use crate::gpu::{CONTENT_FORMAT, GpuContext, create_sampler};
use crate::quad::QuadBuffers;
use crate::renderer::RenderTarget;
use crate::shader::compile_stage;

const BACKDROP_SHADER: &str = r#"
struct BackdropParams {
    tint: vec4<f32>,
    texel_step: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var sourceTexture: texture_2d<f32>;
@group(0) @binding(1) var sourceSampler: sampler;
@group(0) @binding(2) var<uniform> params: BackdropParams;

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(position, 0.0, 1.0);
    output.uv = uv;
    return output;
}

@fragment
fn fs_tint(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(sourceTexture, sourceSampler, input.uv);
    return vec4<f32>(color.rgb * params.tint.rgb, params.tint.a);
}

fn tap(uv: vec2<f32>, distance: f32, weight: f32) -> vec3<f32> {
    let offset = params.texel_step * distance;
    let forward = textureSample(sourceTexture, sourceSampler, uv + offset).rgb;
    let backward = textureSample(sourceTexture, sourceSampler, uv - offset).rgb;
    return (forward + backward) * weight;
}

@fragment
fn fs_blur(input: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureSample(sourceTexture, sourceSampler, input.uv).rgb * 0.2270270270;
    color += tap(input.uv, 1.0, 0.1945945946);
    color += tap(input.uv, 2.0, 0.1216216216);
    color += tap(input.uv, 3.0, 0.0540540541);
    color += tap(input.uv, 4.0, 0.0162162162);
    return vec4<f32>(color, 1.0);
}
"#;

const FULLSCREEN: [f32; 12] = [
    -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, //
    -1.0, 1.0, 1.0, -1.0, -1.0, -1.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmersiveConfig {
    pub downscale_width: u32,
    pub downscale_height: u32,
    pub blur_passes: u32,
    /// Distance between blur taps, in downscaled texels.
    pub blur_radius: f32,
    /// Brightness of the backdrop relative to the content.
    pub blend: f32,
}

impl Default for ImmersiveConfig {
    fn default() -> Self {
        Self {
            downscale_width: 64,
            downscale_height: 64,
            blur_passes: 2,
            blur_radius: 1.5,
            blend: 0.5,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BackdropParams {
    tint: [f32; 4],
    texel_step: [f32; 2],
    _pad: [f32; 2],
}

struct BackdropResources {
    ping: RenderTarget,
    pong: RenderTarget,
    layout: wgpu::BindGroupLayout,
    copy_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    copy_params: wgpu::Buffer,
    horizontal_params: wgpu::Buffer,
    vertical_params: wgpu::Buffer,
    composite_params: wgpu::Buffer,
    fullscreen: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

/// Blurred, darkened copy of the content stretched behind the picture.
pub struct ImmersiveBackdrop {
    config: ImmersiveConfig,
    resources: Option<BackdropResources>,
    failed: bool,
}

impl ImmersiveBackdrop {
    pub fn new(config: ImmersiveConfig) -> Self {
        Self {
            config,
            resources: None,
            failed: false,
        }
    }

    pub fn config(&self) -> ImmersiveConfig {
        self.config
    }

    /// Draw the backdrop into `view`. Returns `false` when nothing was drawn.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        content: &RenderTarget,
        quads: &QuadBuffers,
        view: &wgpu::TextureView,
    ) -> bool {
        if self.failed {
            return false;
        }
        if self.resources.is_none() {
            match BackdropResources::build(gpu, &self.config) {
                Ok(resources) => {
                    log::debug!("[retro_video] immersive backdrop ready");
                    self.resources = Some(resources);
                }
                Err(err) => {
                    log::error!("[retro_video] immersive backdrop disabled: {err}");
                    self.failed = true;
                    return false;
                }
            }
        }
        let Some(resources) = &self.resources else {
            return false;
        };
        resources.draw(gpu, encoder, content, quads, view, self.config.blur_passes);
        true
    }
}

impl BackdropResources {
    fn build(gpu: &GpuContext, config: &ImmersiveConfig) -> Result<Self, String> {
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            compile_stage(BACKDROP_SHADER, stage).map_err(|err| err.to_string())?;
        }
        let width = config.downscale_width.max(1);
        let height = config.downscale_height.max(1);
        let usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT;
        let ping = RenderTarget::allocate(gpu, "retro-video-backdrop-ping", width, height, usage)
            .map_err(|err| err.to_string())?;
        let pong = RenderTarget::allocate(gpu, "retro-video-backdrop-pong", width, height, usage)
            .map_err(|err| err.to_string())?;

        let (layout, copy_pipeline, blur_pipeline, composite_pipeline) = gpu
            .scoped(wgpu::ErrorFilter::Validation, |device| {
                create_pipelines(device, gpu.target_format)
            })
            .map_err(|err| err.to_string())?;

        let params = |label: &str, tint: [f32; 4], texel_step: [f32; 2]| {
            gpu.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::bytes_of(&BackdropParams {
                        tint,
                        texel_step,
                        _pad: [0.0; 2],
                    }),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        };
        let radius = config.blur_radius.max(0.0);
        let blend = config.blend.clamp(0.0, 1.0);
        Ok(Self {
            copy_params: params("retro-video-backdrop-copy", [1.0; 4], [0.0; 2]),
            horizontal_params: params(
                "retro-video-backdrop-horizontal",
                [1.0; 4],
                [radius / width as f32, 0.0],
            ),
            vertical_params: params(
                "retro-video-backdrop-vertical",
                [1.0; 4],
                [0.0, radius / height as f32],
            ),
            composite_params: params(
                "retro-video-backdrop-composite",
                [blend, blend, blend, 1.0],
                [0.0; 2],
            ),
            fullscreen: gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("retro-video-backdrop-fullscreen"),
                    contents: bytemuck::cast_slice(&FULLSCREEN),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
            sampler: create_sampler(
                &gpu.device,
                "retro-video-backdrop-sampler",
                wgpu::FilterMode::Linear,
            ),
            ping,
            pong,
            layout,
            copy_pipeline,
            blur_pipeline,
            composite_pipeline,
        })
    }

    fn draw(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        content: &RenderTarget,
        quads: &QuadBuffers,
        view: &wgpu::TextureView,
        blur_passes: u32,
    ) {
        let copy = self.bind_group(gpu, &content.view, &self.copy_params);
        draw_quad(
            encoder,
            &self.ping.view,
            &self.copy_pipeline,
            &copy,
            &self.fullscreen,
            &quads.content_coords,
            true,
        );

        let horizontal = self.bind_group(gpu, &self.ping.view, &self.horizontal_params);
        let vertical = self.bind_group(gpu, &self.pong.view, &self.vertical_params);
        for _ in 0..blur_passes {
            draw_quad(
                encoder,
                &self.pong.view,
                &self.blur_pipeline,
                &horizontal,
                &self.fullscreen,
                &quads.unit_coords,
                true,
            );
            draw_quad(
                encoder,
                &self.ping.view,
                &self.blur_pipeline,
                &vertical,
                &self.fullscreen,
                &quads.unit_coords,
                true,
            );
        }

        let composite = self.bind_group(gpu, &self.ping.view, &self.composite_params);
        draw_quad(
            encoder,
            view,
            &self.composite_pipeline,
            &composite,
            &quads.background,
            &quads.backdrop_coords,
            false,
        );
    }

    fn bind_group(
        &self,
        gpu: &GpuContext,
        source: &wgpu::TextureView,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("retro-video-backdrop-bind-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }
}

fn draw_quad(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    positions: &wgpu::Buffer,
    coords: &wgpu::Buffer,
    clear: bool,
) {
    let load = if clear {
        wgpu::LoadOp::Clear(wgpu::Color::BLACK)
    } else {
        wgpu::LoadOp::Load
    };
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("retro-video-backdrop-pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.set_vertex_buffer(0, positions.slice(..));
    pass.set_vertex_buffer(1, coords.slice(..));
    pass.draw(0..6, 0..1);
}

fn create_pipelines(
    device: &wgpu::Device,
    target_format: wgpu::TextureFormat,
) -> (
    wgpu::BindGroupLayout,
    wgpu::RenderPipeline,
    wgpu::RenderPipeline,
    wgpu::RenderPipeline,
) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("retro-video-backdrop-shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BACKDROP_SHADER)),
    });
    let visibility = wgpu::ShaderStages::FRAGMENT;
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("retro-video-backdrop-bind-group-layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("retro-video-backdrop-pipeline-layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = |label: &str, entry_point: &str, format: wgpu::TextureFormat| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
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
                entry_point,
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    };
    let copy = pipeline("retro-video-backdrop-copy", "fs_tint", CONTENT_FORMAT);
    let blur = pipeline("retro-video-backdrop-blur", "fs_blur", CONTENT_FORMAT);
    let composite = pipeline("retro-video-backdrop-composite", "fs_tint", target_format);
    (layout, copy, blur, composite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backdrop_shader_has_both_fragment_entries() {
        let fragment = compile_stage(BACKDROP_SHADER, ShaderStage::Fragment).expect("compile");
        let names: Vec<&str> = fragment
            .module
            .entry_points
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        assert!(names.contains(&"fs_tint"));
        assert!(names.contains(&"fs_blur"));
    }

    #[test]
    fn gaussian_weights_sum_to_one() {
        let center = 0.2270270270f32;
        let sides = [0.1945945946f32, 0.1216216216, 0.0540540541, 0.0162162162];
        let total = center + 2.0 * sides.iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: ImmersiveConfig = serde_json::from_str(r#"{"blend": 0.25}"#).expect("parse");
        assert_eq!(config.blend, 0.25);
        assert_eq!(config.downscale_width, 64);
        assert_eq!(config.blur_passes, 2);
    }
}
