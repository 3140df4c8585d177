use crate::gpu::GpuContext;

use super::{PassData, PassLayout, RenderTarget, RendererError};

const PASS_USAGE: wgpu::TextureUsages =
    wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::RENDER_ATTACHMENT);

struct PassSlot {
    fixed_size: Option<(u32, u32)>,
    target: Option<RenderTarget>,
}

/// One offscreen target per non-final shader pass, sized to the pass's fixed
/// output or else to the rendered resolution. Single-pass chains own nothing.
pub(crate) struct PassTargets {
    slots: Vec<PassSlot>,
    resolution: (u32, u32),
    allocations: u64,
}

impl PassTargets {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            slots: Vec::new(),
            resolution: (width.max(1), height.max(1)),
            allocations: 0,
        }
    }

    pub(crate) fn pass_data(&self, pass_index: usize) -> PassData<'_> {
        let target = |index: usize| self.slots.get(index).and_then(|slot| slot.target.as_ref());
        PassData {
            target: target(pass_index),
            previous: pass_index.checked_sub(1).and_then(target),
        }
    }

    pub(crate) fn target_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.target.is_some())
            .count()
    }

    /// Targets created since construction.
    pub(crate) fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Every pass but the last renders offscreen.
    pub(crate) fn configure(
        &mut self,
        gpu: &GpuContext,
        passes: &[PassLayout],
    ) -> Result<(), RendererError> {
        let offscreen = passes.len().saturating_sub(1);
        let fixed: Vec<Option<(u32, u32)>> = passes[..offscreen]
            .iter()
            .map(|pass| pass.output_size)
            .collect();
        let current: Vec<Option<(u32, u32)>> =
            self.slots.iter().map(|slot| slot.fixed_size).collect();
        if fixed == current && self.slots.iter().all(|slot| slot.target.is_some()) {
            return Ok(());
        }
        // Slots whose size still matches keep their storage.
        let mut previous = std::mem::take(&mut self.slots).into_iter();
        self.slots = fixed
            .into_iter()
            .map(|fixed_size| PassSlot {
                fixed_size,
                target: previous.next().and_then(|slot| slot.target),
            })
            .collect();
        self.allocate(gpu)
    }

    /// Follow the rendered resolution. Storage is only reallocated when a
    /// target's size actually changes.
    pub(crate) fn resize(
        &mut self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
    ) -> Result<(), RendererError> {
        if (width, height) == self.resolution || width == 0 || height == 0 {
            return Ok(());
        }
        self.resolution = (width, height);
        self.allocate(gpu)
    }

    pub(crate) fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.target = None;
        }
    }

    fn allocate(&mut self, gpu: &GpuContext) -> Result<(), RendererError> {
        let resolution = self.resolution;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let (width, height) = slot.fixed_size.unwrap_or(resolution);
            if slot.target.as_ref().map(RenderTarget::size) == Some((width, height)) {
                continue;
            }
            slot.target = None;
            let label = format!("retro-video-pass-{index}");
            let target = RenderTarget::allocate(gpu, &label, width, height, PASS_USAGE)?;
            log::debug!("[retro_video] pass {index} target now {width}x{height}");
            slot.target = Some(target);
            self.allocations += 1;
        }
        Ok(())
    }
}
