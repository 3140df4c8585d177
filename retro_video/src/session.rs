use retro_rewind::{RewindBuffer, RewindError};

use crate::config::VideoConfig;
use crate::gpu::{FrameTarget, GpuContext};
use crate::video::{RenderOutcome, Video, VideoError};

/// Serialization hooks of the emulated core.
pub trait CoreState {
    fn serialize_state(&mut self) -> anyhow::Result<Vec<u8>>;
    fn unserialize_state(&mut self, data: &[u8]) -> anyhow::Result<()>;
}

/// One emulation session: the presenter and the rewind history.
///
/// Every call is safe before `create_video` or `init_rewind_buffer`; the
/// missing half reports `false` or zero.
#[derive(Default)]
pub struct Session {
    video: Option<Video>,
    rewind: Option<RewindBuffer>,
    rewind_scratch: Vec<u8>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the presenter and, if configured, the rewind buffer.
    pub fn with_config(gpu: GpuContext, config: &VideoConfig) -> Result<Self, VideoError> {
        let mut session = Self::new();
        session.create_video(gpu, config)?;
        if let Some(rewind) = config.rewind {
            session.init_rewind_buffer(rewind.slot_count, rewind.max_state_size);
        }
        Ok(session)
    }

    pub fn create_video(
        &mut self,
        gpu: GpuContext,
        config: &VideoConfig,
    ) -> Result<(), VideoError> {
        self.video = Some(Video::new(gpu, config)?);
        Ok(())
    }

    pub fn destroy_video(&mut self) {
        if self.video.take().is_some() {
            log::info!("[retro_video] video destroyed");
        }
    }

    pub fn video(&self) -> Option<&Video> {
        self.video.as_ref()
    }

    pub fn video_mut(&mut self) -> Option<&mut Video> {
        self.video.as_mut()
    }

    pub fn on_new_frame(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        pitch: usize,
    ) -> bool {
        match &mut self.video {
            Some(video) => video.on_new_frame(data, width, height, pitch).is_ok(),
            None => false,
        }
    }

    pub fn render_frame(&mut self, target: &FrameTarget<'_>) -> Option<RenderOutcome> {
        self.video.as_mut().map(|video| video.present(target))
    }

    pub fn set_background_image(&mut self, rgba: &[u8], width: u32, height: u32) -> bool {
        let Some(video) = &mut self.video else {
            return false;
        };
        match video.set_background_image(rgba, width, height) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[retro_video] background image rejected: {err}");
                false
            }
        }
    }

    pub fn clear_background_image(&mut self) {
        if let Some(video) = &mut self.video {
            video.clear_background_image();
        }
    }

    /// Replace any existing history with `slot_count` empty slots.
    pub fn init_rewind_buffer(&mut self, slot_count: usize, max_state_size: usize) -> bool {
        match RewindBuffer::new(slot_count, max_state_size) {
            Ok(buffer) => {
                self.rewind = Some(buffer);
                self.rewind_scratch = Vec::with_capacity(max_state_size);
                log::info!(
                    "[retro_video] rewind buffer: {slot_count} slots of {max_state_size} bytes"
                );
                true
            }
            Err(err) => {
                log::warn!("[retro_video] rewind buffer not created: {err}");
                false
            }
        }
    }

    /// Serialize the core and push the state.
    pub fn capture_rewind_state(&mut self, core: &mut impl CoreState) -> bool {
        let Some(buffer) = &mut self.rewind else {
            return false;
        };
        let state = match core.serialize_state() {
            Ok(state) => state,
            Err(err) => {
                log::warn!("[retro_video] core state serialization failed: {err:#}");
                return false;
            }
        };
        match buffer.push(&state) {
            Ok(()) => true,
            Err(RewindError::StateTooLarge { size, max }) => {
                log::warn!("[retro_video] rewind state too large: {size} > {max} bytes");
                false
            }
            Err(err) => {
                log::warn!("[retro_video] rewind capture failed: {err}");
                false
            }
        }
    }

    /// Pop the newest state and restore it into the core.
    pub fn rewind_frame(&mut self, core: &mut impl CoreState) -> bool {
        let Some(buffer) = &mut self.rewind else {
            return false;
        };
        if buffer.pop_into(&mut self.rewind_scratch).is_none() {
            return false;
        }
        match core.unserialize_state(&self.rewind_scratch) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[retro_video] core rejected rewind state: {err:#}");
                false
            }
        }
    }

    pub fn clear_rewind_buffer(&mut self) {
        if let Some(buffer) = &mut self.rewind {
            buffer.clear();
        }
    }

    pub fn destroy_rewind_buffer(&mut self) {
        self.rewind = None;
        self.rewind_scratch = Vec::new();
    }

    pub fn rewind_usage(&self) -> f32 {
        self.rewind.as_ref().map_or(0.0, RewindBuffer::usage)
    }

    pub fn rewind_valid_count(&self) -> usize {
        self.rewind.as_ref().map_or(0, RewindBuffer::valid_count)
    }
}
