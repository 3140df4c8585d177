use thiserror::Error;

use crate::config::VideoConfig;
use crate::geometry::{Rect, VideoLayout};
use crate::gpu::{FrameTarget, GpuContext, Samplers, read_back_texture};
use crate::immersive::{ImmersiveBackdrop, ImmersiveConfig};
use crate::overlay::{BackgroundFrame, OverlayError};
use crate::quad::QuadBuffers;
use crate::renderer::{RenderTarget, Renderer, RendererError};
use crate::shader::{
    FilterMode, ShaderChain, ShaderChainBuilder, ShaderConfig, ShaderError, UniformValue,
};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("frame readback failed: {0}")]
    Readback(String),
    #[error("no compatible GPU adapter")]
    NoAdapter,
    #[error("failed to open GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// What one `render_frame` call submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_count: u32,
    pub passes_drawn: usize,
    pub chain_ready: bool,
    pub backdrop: bool,
    pub overlay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Nothing changed since the last draw; the GPU was not touched.
    Skipped,
    /// An inserted black frame.
    BlackFrame,
    Presented(FrameStats),
}

impl RenderOutcome {
    pub fn stats(&self) -> Option<FrameStats> {
        match self {
            Self::Presented(stats) => Some(*stats),
            _ => None,
        }
    }
}

/// Tightly packed RGBA8 copy of the last content frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Frame orchestrator: receives frames from the core and presents them
/// through the shader chain, backdrop and background overlay.
pub struct Video {
    gpu: GpuContext,
    renderer: Renderer,
    layout: VideoLayout,
    requested_shader: ShaderConfig,
    filter_mode: FilterMode,
    /// Configuration of the last rebuild attempt, successful or not.
    loaded_shader: Option<(ShaderConfig, FilterMode)>,
    chain: Option<ShaderChain>,
    skip_duplicate_frames: bool,
    dirty: bool,
    black_frame_insertion: bool,
    bfi_counter: u32,
    frame_count: u32,
    immersive: Option<ImmersiveBackdrop>,
    background: BackgroundFrame,
    quads: QuadBuffers,
    samplers: Samplers,
    placeholder: RenderTarget,
    warned_missing_target: bool,
}

impl Video {
    pub fn new(gpu: GpuContext, config: &VideoConfig) -> Result<Self, VideoError> {
        let mut renderer = Renderer::new(&gpu, config.rendering)?;
        let geometry = &config.geometry;
        let mut layout = VideoLayout::new(
            geometry.bottom_left_origin,
            geometry.rotation,
            geometry.viewport,
        );
        layout.update_screen_size(geometry.screen_width, geometry.screen_height);
        layout.update_aspect_ratio(geometry.aspect_ratio);
        layout.set_integer_scaling(geometry.integer_scaling);
        renderer.update_rendered_resolution(&gpu, geometry.screen_width, geometry.screen_height);

        let placeholder = RenderTarget::allocate(
            &gpu,
            "retro-video-placeholder",
            1,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        )?;
        placeholder.write_rgba(&gpu, &[0, 0, 0, 0], 1, 1);

        log::info!(
            "[retro_video] video ready: {} renderer, shader {:?}, screen {}x{}",
            if config.rendering.hardware_accelerated {
                "framebuffer"
            } else {
                "image"
            },
            config.shader.kind,
            geometry.screen_width,
            geometry.screen_height
        );
        Ok(Self {
            quads: QuadBuffers::new(&gpu.device),
            samplers: Samplers::new(&gpu.device),
            gpu,
            renderer,
            layout,
            requested_shader: config.shader.clone(),
            filter_mode: config.filter_mode,
            loaded_shader: None,
            chain: None,
            skip_duplicate_frames: config.skip_duplicate_frames,
            dirty: false,
            black_frame_insertion: config.black_frame_insertion,
            bfi_counter: 0,
            frame_count: 0,
            immersive: config.immersive.map(ImmersiveBackdrop::new),
            background: BackgroundFrame::new(),
            placeholder,
            warned_missing_target: false,
        })
    }

    /// Hand over a software frame. `None` means the core skipped this frame.
    ///
    /// A frame the renderer rejects is dropped and the error returned; the
    /// previous frame stays on screen.
    pub fn on_new_frame(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<(), VideoError> {
        let Some(data) = data else {
            return Ok(());
        };
        if width == 0 || height == 0 {
            return Ok(());
        }
        if let Err(err) = self
            .renderer
            .on_new_frame(&self.gpu, data, width, height, pitch)
        {
            log::warn!("[retro_video] dropped {width}x{height} frame: {err}");
            return Err(err.into());
        }
        self.sync_content_size();
        self.dirty = true;
        Ok(())
    }

    /// A hardware core finished drawing into `current_framebuffer`.
    pub fn on_hardware_frame(&mut self, width: u32, height: u32) {
        self.renderer.on_hardware_frame(width, height);
        self.sync_content_size();
        self.dirty = true;
    }

    pub fn current_framebuffer(&self) -> Option<&wgpu::TextureView> {
        self.renderer.current_framebuffer()
    }

    pub fn renders_in_video_callback(&self) -> bool {
        self.renderer.renders_in_video_callback()
    }

    /// Alternate real and black frames while black frame insertion is on.
    pub fn present(&mut self, target: &FrameTarget<'_>) -> RenderOutcome {
        if !self.black_frame_insertion {
            return self.render_frame(target);
        }
        let black = self.bfi_counter % 2 == 1;
        self.bfi_counter = self.bfi_counter.wrapping_add(1);
        if black {
            self.render_black_frame(target);
            RenderOutcome::BlackFrame
        } else {
            self.render_frame(target)
        }
    }

    pub fn render_frame(&mut self, target: &FrameTarget<'_>) -> RenderOutcome {
        if self.skip_duplicate_frames && !self.black_frame_insertion && !self.dirty {
            log::debug!("[retro_video] no new frame, skipping draw");
            return RenderOutcome::Skipped;
        }
        // Cleared before drawing so a frame arriving mid-draw re-dirties.
        self.dirty = false;
        self.frame_count = self.frame_count.wrapping_add(1);

        self.update_program();
        self.quads.upload(&self.gpu.queue, &self.layout);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("retro-video-frame-encoder"),
            });
        clear_view(&mut encoder, target.view, wgpu::Color::BLACK);

        let overlay_active = self.background.has_image() || self.background.has_pending_image();
        let mut backdrop = false;
        if !overlay_active {
            let content = self.renderer.texture();
            if let (Some(immersive), Some(content)) = (&mut self.immersive, content) {
                let view = target.view;
                backdrop = immersive.render(&self.gpu, &mut encoder, content, &self.quads, view);
            }
        }

        let passes_drawn = self.draw_chain(&mut encoder, target);

        let overlay = match self
            .background
            .render(&self.gpu, &mut encoder, target.view, &self.quads)
        {
            Ok(drawn) => drawn,
            Err(err) => {
                log::warn!("[retro_video] background overlay skipped: {err}");
                false
            }
        };

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        RenderOutcome::Presented(FrameStats {
            frame_count: self.frame_count,
            passes_drawn,
            chain_ready: self.chain.is_some(),
            backdrop,
            overlay,
        })
    }

    pub fn render_black_frame(&mut self, target: &FrameTarget<'_>) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("retro-video-black-frame"),
            });
        clear_view(&mut encoder, target.view, wgpu::Color::BLACK);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Read back the valid region of the content texture.
    pub fn capture_raw_frame(&self) -> Result<Option<CapturedFrame>, VideoError> {
        let (width, height) = self.renderer.last_frame_size();
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let Some(content) = self.renderer.texture() else {
            return Ok(None);
        };
        let pixels = read_back_texture(&self.gpu, &content.texture, width, height)?;
        Ok(Some(CapturedFrame {
            pixels,
            width,
            height,
        }))
    }

    pub fn set_shader_config(&mut self, config: ShaderConfig) {
        self.requested_shader = config;
    }

    /// Changing the filter forces a rebuild even with an unchanged shader.
    pub fn set_filter_mode(&mut self, mode: FilterMode) {
        self.filter_mode = mode;
    }

    pub fn update_screen_size(&mut self, width: u32, height: u32) {
        self.layout.update_screen_size(width, height);
        self.renderer
            .update_rendered_resolution(&self.gpu, width, height);
        self.dirty = true;
    }

    pub fn update_viewport(&mut self, viewport: Rect) {
        self.layout.update_viewport_size(viewport);
        self.dirty = true;
    }

    pub fn update_rotation(&mut self, degrees: f32) {
        self.layout.update_rotation(degrees);
        self.dirty = true;
    }

    pub fn update_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.layout.update_aspect_ratio(aspect_ratio);
        self.dirty = true;
    }

    pub fn set_integer_scaling(&mut self, enabled: bool) {
        self.layout.set_integer_scaling(enabled);
        self.dirty = true;
    }

    pub fn set_skip_duplicate_frames(&mut self, enabled: bool) {
        self.skip_duplicate_frames = enabled;
    }

    pub fn set_black_frame_insertion(&mut self, enabled: bool) {
        self.black_frame_insertion = enabled;
        self.bfi_counter = 0;
    }

    /// Replace the backdrop. An identical configuration keeps the built one.
    pub fn set_immersive(&mut self, config: Option<ImmersiveConfig>) {
        let current = self.immersive.as_ref().map(ImmersiveBackdrop::config);
        if current != config {
            self.immersive = config.map(ImmersiveBackdrop::new);
            self.dirty = true;
        }
    }

    pub fn set_background_image(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<(), VideoError> {
        self.background.set_image(rgba, width, height)?;
        self.dirty = true;
        Ok(())
    }

    pub fn clear_background_image(&mut self) {
        self.background.clear_image();
        self.dirty = true;
    }

    pub fn background(&self) -> &BackgroundFrame {
        &self.background
    }

    pub fn layout(&self) -> &VideoLayout {
        &self.layout
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Passes in the installed chain; zero when the last rebuild failed.
    pub fn chain_len(&self) -> usize {
        self.chain.as_ref().map_or(0, ShaderChain::len)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn sync_content_size(&mut self) {
        let (width, height) = self.renderer.last_frame_size();
        self.layout.update_content_size(width, height);
        let (u, v) = self.renderer.uv_extent();
        self.layout.update_texture_extent(u, v);
    }

    /// Rebuild the chain when the shader or the filter changed since the last
    /// attempt. A failed build leaves no chain installed until the next change.
    fn update_program(&mut self) {
        let key = (self.requested_shader.clone(), self.filter_mode);
        if self.loaded_shader.as_ref() == Some(&key) {
            return;
        }
        let passes = self.requested_shader.passes(self.filter_mode);
        self.loaded_shader = Some(key);
        match ShaderChainBuilder::new(&self.gpu).build(&passes) {
            Ok(chain) => {
                self.renderer.set_shaders(&self.gpu, &chain.pass_layouts());
                log::info!(
                    "[retro_video] shader chain rebuilt: {:?}, {} passes, filter {:?}",
                    self.requested_shader.kind,
                    chain.len(),
                    self.filter_mode
                );
                self.chain = Some(chain);
                self.warned_missing_target = false;
            }
            Err(err) => {
                log::error!("[retro_video] shader chain rebuild failed: {err}");
                self.chain = None;
            }
        }
    }

    fn draw_chain(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &FrameTarget<'_>,
    ) -> usize {
        let Some(chain) = self.chain.as_mut() else {
            return 0;
        };
        if !self.renderer.is_usable() {
            return 0;
        }
        let Some(content) = self.renderer.texture() else {
            return 0;
        };
        let (content_w, content_h) = self.renderer.last_frame_size();
        if content_w == 0 || content_h == 0 {
            log::debug!("[retro_video] no content yet, skipping shader passes");
            return 0;
        }

        let screen_w = self.layout.screen_width();
        let screen_h = self.layout.screen_height();
        let density = (screen_w as f32 / content_w as f32).min(screen_h as f32 / content_h as f32);
        let texture_size = [content.width as f32, content.height as f32];
        let input_size = [content_w as f32, content_h as f32];
        let mvp = glam::Mat4::IDENTITY.to_cols_array();
        let last = chain.len().saturating_sub(1);

        let mut drawn = 0;
        for (index, entry) in chain.entries_mut().iter_mut().enumerate() {
            let pass_data = self.renderer.pass_data(index);
            let final_pass = index == last;
            let (view, width, height) = if final_pass {
                (
                    target.view,
                    screen_w.min(target.width),
                    screen_h.min(target.height),
                )
            } else {
                match pass_data.target {
                    Some(pass_target) => (&pass_target.view, pass_target.width, pass_target.height),
                    None => {
                        if !self.warned_missing_target {
                            log::warn!("[retro_video] pass {index} has no offscreen target");
                            self.warned_missing_target = true;
                        }
                        continue;
                    }
                }
            };
            if width == 0 || height == 0 {
                continue;
            }

            let locations = entry.locations.clone();
            entry.set_uniform(locations.texture_size, UniformValue::Vec2(texture_size));
            entry.set_uniform(locations.input_size, UniformValue::Vec2(input_size));
            entry.set_uniform(
                locations.output_size,
                UniformValue::Vec2([width as f32, height as f32]),
            );
            entry.set_uniform(locations.screen_density, UniformValue::Float(density));
            entry.set_uniform(
                locations.frame_count,
                UniformValue::Int(self.frame_count as i32),
            );
            entry.set_uniform(locations.frame_direction, UniformValue::Int(1));
            entry.set_uniform(locations.mvp_matrix, UniformValue::Mat4(mvp));
            entry.flush_uniforms(&self.gpu.queue);

            let bind_group = entry.create_bind_group(
                &self.gpu.device,
                &content.view,
                pass_data.previous.map(|previous| &previous.view),
                &self.placeholder.view,
                self.samplers.for_filter(entry.linear),
            );
            let positions = if final_pass {
                &self.quads.foreground
            } else {
                &self.quads.framebuffer
            };
            let load = if final_pass {
                wgpu::LoadOp::Load
            } else {
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("retro-video-shader-pass"),
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
            pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            pass.set_pipeline(&entry.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, positions.slice(..));
            if locations.tex_coord.is_some() {
                pass.set_vertex_buffer(1, self.quads.content_coords.slice(..));
            }
            pass.draw(0..6, 0..1);
            drawn += 1;
        }
        drawn
    }
}

fn clear_view(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, color: wgpu::Color) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("retro-video-clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}
