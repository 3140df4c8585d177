use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::immersive::ImmersiveConfig;
use crate::renderer::RenderingOptions;
use crate::shader::{FilterMode, ShaderConfig};

/// Everything `Video::new` needs, loadable from JSON. Missing fields take
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub rendering: RenderingOptions,
    pub shader: ShaderConfig,
    pub filter_mode: FilterMode,
    pub geometry: GeometryConfig,
    pub skip_duplicate_frames: bool,
    pub black_frame_insertion: bool,
    pub immersive: Option<ImmersiveConfig>,
    pub rewind: Option<RewindSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Normalized to the screen.
    pub viewport: Rect,
    pub rotation: f32,
    /// Zero or negative keeps the content's own ratio.
    pub aspect_ratio: f32,
    pub integer_scaling: bool,
    pub bottom_left_origin: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            screen_width: 1280,
            screen_height: 720,
            viewport: Rect::FULL,
            rotation: 0.0,
            aspect_ratio: -1.0,
            integer_scaling: false,
            bottom_left_origin: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindSettings {
    pub slot_count: usize,
    pub max_state_size: usize,
}

impl Default for RewindSettings {
    fn default() -> Self {
        Self {
            slot_count: 600,
            max_state_size: 4 * 1024 * 1024,
        }
    }
}

pub fn load_video_config(path: &Path) -> Result<VideoConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading video config {}", path.display()))?;
    let config: VideoConfig = serde_json::from_str(&data)
        .with_context(|| format!("parsing video config {}", path.display()))?;
    Ok(config)
}
