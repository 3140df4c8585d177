use std::borrow::Cow;
use std::num::NonZeroU64;

use naga::ShaderStage;

use crate::gpu::{CONTENT_FORMAT, GpuContext, align_to};
use crate::renderer::PassLayout;

use super::reflect::{BindingRole, PassLocations, compile_stage, reflect_pass};
use super::{ShaderError, ShaderPass, UniformSlot, UniformValue};

/// One compiled pass: pipeline, resolved locations and its uniform storage.
pub struct ShaderChainEntry {
    pub locations: PassLocations,
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub linear: bool,
    pub output_size: Option<(u32, u32)>,
    uniform_buffer: Option<wgpu::Buffer>,
    uniform_staging: Vec<u8>,
}

impl ShaderChainEntry {
    /// Stage a uniform value. Absent slots are skipped.
    pub fn set_uniform(&mut self, slot: Option<UniformSlot>, value: UniformValue) {
        if let Some(slot) = slot {
            slot.write(&mut self.uniform_staging, value);
        }
    }

    pub fn flush_uniforms(&self, queue: &wgpu::Queue) {
        if let Some(buffer) = &self.uniform_buffer {
            queue.write_buffer(buffer, 0, &self.uniform_staging);
        }
    }

    /// Bind every resource the pass declared. A declared previous-pass
    /// texture with nothing to sample gets `placeholder`.
    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        texture: &wgpu::TextureView,
        previous: Option<&wgpu::TextureView>,
        placeholder: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = self
            .locations
            .bindings
            .iter()
            .filter_map(|(&binding, role)| {
                let resource = match role {
                    BindingRole::Texture => wgpu::BindingResource::TextureView(texture),
                    BindingRole::PreviousPass => {
                        wgpu::BindingResource::TextureView(previous.unwrap_or(placeholder))
                    }
                    BindingRole::Sampler => wgpu::BindingResource::Sampler(sampler),
                    BindingRole::Uniform { .. } => {
                        self.uniform_buffer.as_ref()?.as_entire_binding()
                    }
                };
                Some(wgpu::BindGroupEntry { binding, resource })
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("retro-video-pass-bind-group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }
}

/// A fully built chain. Never modified in place; a rebuild produces a new one.
pub struct ShaderChain {
    entries: Vec<ShaderChainEntry>,
}

impl ShaderChain {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ShaderChainEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ShaderChainEntry] {
        &mut self.entries
    }

    pub fn pass_layouts(&self) -> Vec<PassLayout> {
        self.entries
            .iter()
            .map(|entry| PassLayout {
                output_size: entry.output_size,
            })
            .collect()
    }
}

pub struct ShaderChainBuilder<'a> {
    gpu: &'a GpuContext,
}

impl<'a> ShaderChainBuilder<'a> {
    pub fn new(gpu: &'a GpuContext) -> Self {
        Self { gpu }
    }

    /// Compile and link every pass. Any failure discards the whole chain.
    pub fn build(&self, passes: &[ShaderPass]) -> Result<ShaderChain, ShaderError> {
        if passes.is_empty() {
            return Err(ShaderError::EmptyChain);
        }
        let last = passes.len() - 1;
        let entries = passes
            .iter()
            .enumerate()
            .map(|(index, pass)| {
                let format = if index == last {
                    self.gpu.target_format
                } else {
                    CONTENT_FORMAT
                };
                self.build_pass(index, pass, format)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ShaderChain { entries })
    }

    fn build_pass(
        &self,
        index: usize,
        pass: &ShaderPass,
        format: wgpu::TextureFormat,
    ) -> Result<ShaderChainEntry, ShaderError> {
        let vertex = compile_stage(&pass.vertex, ShaderStage::Vertex)?;
        let fragment = compile_stage(&pass.fragment, ShaderStage::Fragment)?;
        let locations = reflect_pass(&vertex, &fragment)?;
        let position = locations.position.ok_or(ShaderError::MissingPosition)?;

        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = locations
            .bindings
            .iter()
            .map(|(&binding, role)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: binding_type(*role),
                count: None,
            })
            .collect();

        let position_attributes = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: position,
        }];
        let tex_coord_attributes = locations.tex_coord.map(|location| {
            [wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: location,
            }]
        });
        let mut buffers = vec![wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &position_attributes,
        }];
        if let Some(attributes) = &tex_coord_attributes {
            buffers.push(wgpu::VertexBufferLayout {
                array_stride: 8,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            });
        }

        let built = self.gpu.scoped(wgpu::ErrorFilter::Validation, |device| {
            let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("retro-video-pass-vertex"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(pass.vertex.as_ref())),
            });
            let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("retro-video-pass-fragment"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(pass.fragment.as_ref())),
            });
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("retro-video-pass-bind-group-layout"),
                    entries: &layout_entries,
                });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("retro-video-pass-pipeline-layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("retro-video-pass-pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: &vertex.entry_point,
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: &fragment.entry_point,
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
            });
            (pipeline, bind_group_layout)
        });
        let (pipeline, bind_group_layout) = built.map_err(|err| ShaderError::Pipeline {
            pass: index,
            message: err.to_string(),
        })?;

        let uniform_size = align_to(locations.uniform_size as u32, 16) as usize;
        let uniform_buffer = locations.uniform_binding.map(|_| {
            self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("retro-video-pass-uniforms"),
                size: uniform_size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        log::debug!(
            "[retro_video] pass {index}: position={:?} tex_coord={:?} texture={:?} previous={:?}",
            locations.position,
            locations.tex_coord,
            locations.texture,
            locations.previous_pass
        );
        Ok(ShaderChainEntry {
            uniform_staging: vec![0; uniform_size],
            locations,
            pipeline,
            bind_group_layout,
            linear: pass.linear,
            output_size: pass.output_size,
            uniform_buffer,
        })
    }
}

fn binding_type(role: BindingRole) -> wgpu::BindingType {
    match role {
        BindingRole::Texture | BindingRole::PreviousPass => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingRole::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        BindingRole::Uniform { size } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size),
        },
    }
}
