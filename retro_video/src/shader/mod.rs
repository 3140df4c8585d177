//! Declarative shader configuration and the compiled multi-pass chain.

mod builtin;
mod chain;
mod reflect;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chain::{ShaderChain, ShaderChainBuilder, ShaderChainEntry};
pub use reflect::{
    BindingRole, CompiledStage, PassLocations, UniformKind, UniformSlot, UniformValue,
    compile_stage, reflect_pass,
};

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} shader failed to parse:\n{message}")]
    Parse {
        stage: &'static str,
        message: String,
    },
    #[error("{stage} shader failed validation: {message}")]
    Validation {
        stage: &'static str,
        message: String,
    },
    #[error("{stage} shader has no entry point")]
    MissingEntryPoint { stage: &'static str },
    #[error("fragment input at location {location} is not written by the vertex stage")]
    Link { location: u32 },
    #[error("vertex stage declares no position attribute")]
    MissingPosition,
    #[error("vertex input `{name}` has no buffer to read from")]
    UnboundAttribute { name: String },
    #[error("resource `{name}` uses bind group {group}; only group 0 is bound")]
    UnexpectedGroup { name: String, group: u32 },
    #[error("unrecognised resource `{name}` at binding {binding}")]
    UnknownResource { name: String, binding: u32 },
    #[error("binding {binding} is declared with conflicting roles")]
    BindingConflict { binding: u32 },
    #[error("pass declares more than one uniform block")]
    MultipleUniformBlocks,
    #[error("uniform `{name}` has unsupported type {found}")]
    UniformType { name: String, found: String },
    #[error("pass {pass} failed to build: {message}")]
    Pipeline { pass: usize, message: String },
    #[error("shader configuration produced no passes")]
    EmptyChain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderKind {
    #[default]
    Default,
    Sharp,
    Crt,
    Lcd,
}

/// Global filter override applied on top of each pass's own flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Auto,
    Nearest,
    Linear,
}

impl FilterMode {
    /// Map the front-end's `-1 / 0 / 1` integer setting.
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::Nearest,
            1 => Self::Linear,
            _ => Self::Auto,
        }
    }

    fn resolve(self, pass_linear: bool) -> bool {
        match self {
            Self::Auto => pass_linear,
            Self::Nearest => false,
            Self::Linear => true,
        }
    }
}

/// Replacement sources or settings for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassOverride {
    pub index: usize,
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub linear: Option<bool>,
    pub output_size: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub kind: ShaderKind,
    pub overrides: Vec<PassOverride>,
}

impl ShaderConfig {
    pub fn new(kind: ShaderKind) -> Self {
        Self {
            kind,
            overrides: Vec::new(),
        }
    }

    /// Expand into concrete passes. An override whose index is exactly one
    /// past the current end appends a new pass; other out-of-range overrides
    /// are ignored.
    pub fn passes(&self, filter: FilterMode) -> Vec<ShaderPass> {
        let mut passes = builtin_passes(self.kind);
        for item in &self.overrides {
            if item.index == passes.len() {
                passes.push(ShaderPass::new(builtin::DEFAULT_FRAGMENT, false));
            }
            let Some(pass) = passes.get_mut(item.index) else {
                log::warn!(
                    "[retro_video] ignoring override for pass {} of {}",
                    item.index,
                    passes.len()
                );
                continue;
            };
            if let Some(vertex) = &item.vertex {
                pass.vertex = Cow::Owned(vertex.clone());
            }
            if let Some(fragment) = &item.fragment {
                pass.fragment = Cow::Owned(fragment.clone());
            }
            if let Some(linear) = item.linear {
                pass.linear = linear;
            }
            if let Some([width, height]) = item.output_size {
                pass.output_size = (width > 0 && height > 0).then_some((width, height));
            }
        }
        for pass in &mut passes {
            pass.linear = filter.resolve(pass.linear);
        }
        passes
    }
}

/// Sources and settings for one pass of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPass {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
    pub linear: bool,
    /// Fixed offscreen size; `None` follows the rendered resolution.
    pub output_size: Option<(u32, u32)>,
}

impl ShaderPass {
    fn new(fragment: &'static str, linear: bool) -> Self {
        Self {
            vertex: Cow::Borrowed(builtin::DEFAULT_VERTEX),
            fragment: Cow::Borrowed(fragment),
            linear,
            output_size: None,
        }
    }
}

fn builtin_passes(kind: ShaderKind) -> Vec<ShaderPass> {
    match kind {
        ShaderKind::Default => vec![ShaderPass::new(builtin::DEFAULT_FRAGMENT, false)],
        ShaderKind::Sharp => vec![ShaderPass::new(builtin::SHARP_FRAGMENT, true)],
        ShaderKind::Crt => vec![
            ShaderPass::new(builtin::CRT_SPREAD_FRAGMENT, false),
            ShaderPass::new(builtin::CRT_SCANLINE_FRAGMENT, true),
        ],
        ShaderKind::Lcd => vec![ShaderPass::new(builtin::LCD_FRAGMENT, false)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crt_has_two_passes() {
        let passes = ShaderConfig::new(ShaderKind::Crt).passes(FilterMode::Auto);
        assert_eq!(passes.len(), 2);
        assert!(!passes[0].linear);
        assert!(passes[1].linear);
    }

    #[test]
    fn filter_mode_overrides_every_pass() {
        let config = ShaderConfig::new(ShaderKind::Crt);
        assert!(config.passes(FilterMode::Linear).iter().all(|p| p.linear));
        assert!(config.passes(FilterMode::Nearest).iter().all(|p| !p.linear));
        assert_eq!(FilterMode::from_raw(-1), FilterMode::Auto);
        assert_eq!(FilterMode::from_raw(0), FilterMode::Nearest);
        assert_eq!(FilterMode::from_raw(1), FilterMode::Linear);
    }

    #[test]
    fn override_one_past_end_appends_pass() {
        let config = ShaderConfig {
            kind: ShaderKind::Default,
            overrides: vec![
                PassOverride {
                    index: 0,
                    output_size: Some([320, 240]),
                    ..Default::default()
                },
                PassOverride {
                    index: 1,
                    fragment: Some("custom".to_string()),
                    linear: Some(true),
                    ..Default::default()
                },
                PassOverride {
                    index: 7,
                    linear: Some(true),
                    ..Default::default()
                },
            ],
        };
        let passes = config.passes(FilterMode::Auto);
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].output_size, Some((320, 240)));
        assert_eq!(passes[1].fragment, "custom");
        assert!(passes[1].linear);
        assert_eq!(passes[1].vertex, builtin::DEFAULT_VERTEX);
    }

    #[test]
    fn every_builtin_pass_compiles_and_links() {
        for kind in [
            ShaderKind::Default,
            ShaderKind::Sharp,
            ShaderKind::Crt,
            ShaderKind::Lcd,
        ] {
            for (index, pass) in ShaderConfig::new(kind)
                .passes(FilterMode::Auto)
                .iter()
                .enumerate()
            {
                let vertex =
                    compile_stage(&pass.vertex, naga::ShaderStage::Vertex).expect("vertex");
                let fragment =
                    compile_stage(&pass.fragment, naga::ShaderStage::Fragment).expect("fragment");
                let locations = reflect_pass(&vertex, &fragment)
                    .unwrap_or_else(|err| panic!("{kind:?} pass {index}: {err}"));
                assert_eq!(locations.position, Some(0));
            }
        }
    }
}
