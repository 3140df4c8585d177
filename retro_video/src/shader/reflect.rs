//! Name-based reflection over parsed WGSL.
//!
//! A pass is "compiled" when naga parses and validates both stages, and
//! "linked" when every fragment input location is written by the vertex
//! stage. Attributes and uniforms are then looked up by name, trying each
//! accepted spelling in order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use naga::{AddressSpace, Binding, Handle, ScalarKind, ShaderStage, TypeInner, VectorSize};

use super::ShaderError;

const POSITION_NAMES: &[&str] = &["vPosition", "VertexCoord"];
const TEX_COORD_NAMES: &[&str] = &["vCoordinate", "TexCoord"];
const TEXTURE_NAMES: &[&str] = &["texture", "Texture"];
const PREVIOUS_PASS_NAMES: &[&str] = &["previousPass"];

/// A validated shader stage ready to hand to `wgpu`.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub module: naga::Module,
    pub entry_point: String,
}

/// Parse and validate `source`, then pick its first entry point for `stage`.
pub fn compile_stage(source: &str, stage: ShaderStage) -> Result<CompiledStage, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| ShaderError::Parse {
        stage: stage_name(stage),
        message: err.emit_to_string(source),
    })?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator
        .validate(&module)
        .map_err(|err| ShaderError::Validation {
            stage: stage_name(stage),
            message: error_chain(&err),
        })?;
    let entry_point = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == stage)
        .map(|entry| entry.name.clone())
        .ok_or(ShaderError::MissingEntryPoint {
            stage: stage_name(stage),
        })?;
    Ok(CompiledStage {
        stage,
        module,
        entry_point,
    })
}

pub(crate) fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        ShaderStage::Compute => "compute",
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Int,
    Uint,
    Mat4,
}

impl UniformKind {
    pub fn size(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Uint => 4,
            Self::Vec2 => 8,
            Self::Mat4 => 64,
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "f32",
            Self::Vec2 => "vec2<f32>",
            Self::Int => "i32",
            Self::Uint => "u32",
            Self::Mat4 => "mat4x4<f32>",
        };
        f.write_str(name)
    }
}

/// Values the orchestrator feeds into a pass's uniform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Int(i32),
    Mat4([f32; 16]),
}

/// A uniform block member resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: u32,
    pub kind: UniformKind,
}

impl UniformSlot {
    /// Encode `value` at this slot, converting integers to the declared kind.
    pub fn write(&self, block: &mut [u8], value: UniformValue) {
        let start = self.offset as usize;
        let end = start + self.kind.size();
        let Some(dst) = block.get_mut(start..end) else {
            return;
        };
        match (self.kind, value) {
            (UniformKind::Float, UniformValue::Float(v)) => {
                dst.copy_from_slice(bytemuck::bytes_of(&v))
            }
            (UniformKind::Float, UniformValue::Int(v)) => {
                dst.copy_from_slice(bytemuck::bytes_of(&(v as f32)))
            }
            (UniformKind::Int, UniformValue::Int(v)) => dst.copy_from_slice(bytemuck::bytes_of(&v)),
            (UniformKind::Uint, UniformValue::Int(v)) => {
                dst.copy_from_slice(bytemuck::bytes_of(&(v as u32)))
            }
            (UniformKind::Vec2, UniformValue::Vec2(v)) => {
                dst.copy_from_slice(bytemuck::cast_slice(&v))
            }
            (UniformKind::Mat4, UniformValue::Mat4(v)) => {
                dst.copy_from_slice(bytemuck::cast_slice(&v))
            }
            (kind, value) => {
                log::debug!("[retro_video] no conversion from {value:?} to {kind}");
            }
        }
    }
}

/// Role of one `@group(0)` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    Texture,
    PreviousPass,
    Sampler,
    Uniform { size: u64 },
}

/// Every location a pass exposes. `None` means the shader does not declare
/// it, which is different from a binding or offset of zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassLocations {
    pub position: Option<u32>,
    pub tex_coord: Option<u32>,
    pub texture: Option<u32>,
    pub previous_pass: Option<u32>,
    pub samplers: Vec<u32>,
    pub uniform_binding: Option<u32>,
    pub uniform_size: u64,
    pub texture_size: Option<UniformSlot>,
    pub screen_density: Option<UniformSlot>,
    pub input_size: Option<UniformSlot>,
    pub output_size: Option<UniformSlot>,
    pub frame_count: Option<UniformSlot>,
    pub frame_direction: Option<UniformSlot>,
    pub mvp_matrix: Option<UniformSlot>,
    pub bindings: BTreeMap<u32, BindingRole>,
}

struct UniformRule {
    names: &'static [&'static str],
    accepts: &'static [UniformKind],
}

const TEXTURE_SIZE: UniformRule = UniformRule {
    names: &["textureSize", "TextureSize"],
    accepts: &[UniformKind::Vec2],
};
const SCREEN_DENSITY: UniformRule = UniformRule {
    names: &["screenDensity"],
    accepts: &[UniformKind::Float],
};
const INPUT_SIZE: UniformRule = UniformRule {
    names: &["InputSize"],
    accepts: &[UniformKind::Vec2],
};
const OUTPUT_SIZE: UniformRule = UniformRule {
    names: &["OutputSize"],
    accepts: &[UniformKind::Vec2],
};
const FRAME_COUNT: UniformRule = UniformRule {
    names: &["FrameCount"],
    accepts: &[UniformKind::Int, UniformKind::Uint, UniformKind::Float],
};
const FRAME_DIRECTION: UniformRule = UniformRule {
    names: &["FrameDirection"],
    accepts: &[UniformKind::Int, UniformKind::Float],
};
const MVP_MATRIX: UniformRule = UniformRule {
    names: &["MVPMatrix"],
    accepts: &[UniformKind::Mat4],
};

/// Link a vertex and fragment stage and resolve their locations.
pub fn reflect_pass(
    vertex: &CompiledStage,
    fragment: &CompiledStage,
) -> Result<PassLocations, ShaderError> {
    let inputs = vertex_inputs(vertex)?;
    check_link(vertex, fragment)?;

    let mut members: BTreeMap<String, UniformSlot> = BTreeMap::new();
    let mut locations = PassLocations::default();
    for stage in [vertex, fragment] {
        collect_resources(&stage.module, &mut locations, &mut members)?;
    }

    let attribute = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| inputs.get(*name).copied())
    };
    locations.position = attribute(POSITION_NAMES);
    locations.tex_coord = attribute(TEX_COORD_NAMES);
    let Some(position) = locations.position else {
        return Err(ShaderError::MissingPosition);
    };
    for (name, location) in &inputs {
        if *location != position && Some(*location) != locations.tex_coord {
            return Err(ShaderError::UnboundAttribute { name: name.clone() });
        }
    }

    locations.texture_size = resolve_uniform(&members, &TEXTURE_SIZE)?;
    locations.screen_density = resolve_uniform(&members, &SCREEN_DENSITY)?;
    locations.input_size = resolve_uniform(&members, &INPUT_SIZE)?;
    locations.output_size = resolve_uniform(&members, &OUTPUT_SIZE)?;
    locations.frame_count = resolve_uniform(&members, &FRAME_COUNT)?;
    locations.frame_direction = resolve_uniform(&members, &FRAME_DIRECTION)?;
    locations.mvp_matrix = resolve_uniform(&members, &MVP_MATRIX)?;
    Ok(locations)
}

fn resolve_uniform(
    members: &BTreeMap<String, UniformSlot>,
    rule: &UniformRule,
) -> Result<Option<UniformSlot>, ShaderError> {
    let Some((name, slot)) = rule
        .names
        .iter()
        .find_map(|name| members.get(*name).map(|slot| (*name, *slot)))
    else {
        return Ok(None);
    };
    if !rule.accepts.contains(&slot.kind) {
        return Err(ShaderError::UniformType {
            name: name.to_string(),
            found: slot.kind.to_string(),
        });
    }
    Ok(Some(slot))
}

/// Named vertex-entry inputs and their locations.
fn vertex_inputs(vertex: &CompiledStage) -> Result<BTreeMap<String, u32>, ShaderError> {
    let function = entry_function(vertex)?;
    let mut inputs = BTreeMap::new();
    for argument in &function.arguments {
        match argument.binding {
            Some(Binding::Location { location, .. }) => {
                if let Some(name) = &argument.name {
                    inputs.insert(name.clone(), location);
                }
            }
            Some(Binding::BuiltIn(_)) => {}
            None => {
                for (name, location) in struct_locations(&vertex.module, argument.ty) {
                    inputs.insert(name, location);
                }
            }
        }
    }
    Ok(inputs)
}

fn check_link(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<(), ShaderError> {
    let vertex_function = entry_function(vertex)?;
    let mut outputs = BTreeSet::new();
    if let Some(result) = &vertex_function.result {
        match result.binding {
            Some(Binding::Location { location, .. }) => {
                outputs.insert(location);
            }
            Some(Binding::BuiltIn(_)) => {}
            None => {
                outputs.extend(
                    struct_locations(&vertex.module, result.ty)
                        .into_iter()
                        .map(|(_, location)| location),
                );
            }
        }
    }

    let fragment_function = entry_function(fragment)?;
    for argument in &fragment_function.arguments {
        let wanted: Vec<u32> = match argument.binding {
            Some(Binding::Location { location, .. }) => vec![location],
            Some(Binding::BuiltIn(_)) => Vec::new(),
            None => struct_locations(&fragment.module, argument.ty)
                .into_iter()
                .map(|(_, location)| location)
                .collect(),
        };
        if let Some(missing) = wanted.into_iter().find(|loc| !outputs.contains(loc)) {
            return Err(ShaderError::Link { location: missing });
        }
    }
    Ok(())
}

fn entry_function(stage: &CompiledStage) -> Result<&naga::Function, ShaderError> {
    stage
        .module
        .entry_points
        .iter()
        .find(|entry| entry.name == stage.entry_point && entry.stage == stage.stage)
        .map(|entry| &entry.function)
        .ok_or(ShaderError::MissingEntryPoint {
            stage: stage_name(stage.stage),
        })
}

fn struct_locations(module: &naga::Module, ty: Handle<naga::Type>) -> Vec<(String, u32)> {
    let TypeInner::Struct { members, .. } = &module.types[ty].inner else {
        return Vec::new();
    };
    members
        .iter()
        .filter_map(|member| match member.binding {
            Some(Binding::Location { location, .. }) => {
                Some((member.name.clone().unwrap_or_default(), location))
            }
            _ => None,
        })
        .collect()
}

fn collect_resources(
    module: &naga::Module,
    locations: &mut PassLocations,
    members: &mut BTreeMap<String, UniformSlot>,
) -> Result<(), ShaderError> {
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        if binding.group != 0 {
            return Err(ShaderError::UnexpectedGroup {
                name,
                group: binding.group,
            });
        }
        let index = binding.binding;
        let inner = &module.types[global.ty].inner;
        let role = match (global.space, inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members: fields, span }) => {
                for field in fields {
                    let Some(field_name) = &field.name else {
                        continue;
                    };
                    let Some(kind) = uniform_kind(&module.types[field.ty].inner) else {
                        continue;
                    };
                    let slot = UniformSlot {
                        offset: field.offset,
                        kind,
                    };
                    match members.get(field_name) {
                        Some(existing) if *existing != slot => {
                            return Err(ShaderError::UniformType {
                                name: field_name.clone(),
                                found: format!("{kind} at offset {}", field.offset),
                            });
                        }
                        _ => {
                            members.insert(field_name.clone(), slot);
                        }
                    }
                }
                let size = u64::from(*span);
                match locations.uniform_binding {
                    Some(existing) if existing != index => {
                        return Err(ShaderError::MultipleUniformBlocks);
                    }
                    _ => {
                        locations.uniform_binding = Some(index);
                        locations.uniform_size = locations.uniform_size.max(size);
                    }
                }
                BindingRole::Uniform {
                    size: locations.uniform_size,
                }
            }
            (AddressSpace::Handle, TypeInner::Sampler { comparison: false }) => {
                if !locations.samplers.contains(&index) {
                    locations.samplers.push(index);
                }
                BindingRole::Sampler
            }
            (AddressSpace::Handle, TypeInner::Image { .. })
                if TEXTURE_NAMES.contains(&name.as_str()) =>
            {
                assign_binding(&mut locations.texture, index)?;
                BindingRole::Texture
            }
            (AddressSpace::Handle, TypeInner::Image { .. })
                if PREVIOUS_PASS_NAMES.contains(&name.as_str()) =>
            {
                assign_binding(&mut locations.previous_pass, index)?;
                BindingRole::PreviousPass
            }
            _ => {
                return Err(ShaderError::UnknownResource {
                    name,
                    binding: index,
                });
            }
        };
        match locations.bindings.get(&index) {
            Some(existing) if !same_role(*existing, role) => {
                return Err(ShaderError::BindingConflict { binding: index });
            }
            _ => {
                locations.bindings.insert(index, role);
            }
        }
    }
    Ok(())
}

fn same_role(a: BindingRole, b: BindingRole) -> bool {
    matches!(
        (a, b),
        (BindingRole::Texture, BindingRole::Texture)
            | (BindingRole::PreviousPass, BindingRole::PreviousPass)
            | (BindingRole::Sampler, BindingRole::Sampler)
            | (BindingRole::Uniform { .. }, BindingRole::Uniform { .. })
    )
}

fn assign_binding(slot: &mut Option<u32>, index: u32) -> Result<(), ShaderError> {
    match *slot {
        Some(existing) if existing != index => Err(ShaderError::BindingConflict { binding: index }),
        _ => {
            *slot = Some(index);
            Ok(())
        }
    }
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Sint => Some(UniformKind::Int),
            ScalarKind::Uint => Some(UniformKind::Uint),
            _ => None,
        },
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => Some(UniformKind::Vec2),
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.width == 4 => Some(UniformKind::Mat4),
        _ => None,
    }
}
