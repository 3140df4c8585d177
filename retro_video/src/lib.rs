//! GPU video presentation for libretro-style emulator cores.
//!
//! A core hands over software frames (or draws into a framebuffer the
//! renderer owns); `Video` decodes them into a content texture, runs the
//! configured multi-pass shader chain into the caller's target, and
//! composites an optional blurred backdrop and a static background
//! overlay. `Session` pairs the presenter with a rewind history of core
//! states.

pub mod config;
pub mod geometry;
pub mod gpu;
pub mod immersive;
pub mod overlay;
pub mod pixel;
pub mod quad;
pub mod renderer;
pub mod session;
pub mod shader;
pub mod video;

pub use config::{GeometryConfig, RewindSettings, VideoConfig, load_video_config};
pub use geometry::{Rect, VideoLayout};
pub use gpu::{CONTENT_FORMAT, FrameTarget, GpuContext, read_back_texture};
pub use immersive::ImmersiveConfig;
pub use pixel::PixelFormat;
pub use renderer::RenderingOptions;
pub use session::{CoreState, Session};
pub use shader::{FilterMode, PassOverride, ShaderConfig, ShaderKind};
pub use video::{CapturedFrame, FrameStats, RenderOutcome, Video, VideoError};
