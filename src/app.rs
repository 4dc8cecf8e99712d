//! Session driver: the pipeline object and the winit render loop.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::audio::decode::AudioTrack;
use crate::audio::sampler::AudioSampler;
use crate::render::gpu::{surface_error_is_recoverable, GpuContext};
use crate::render::shader::{ShaderProgram, FRAGMENT_SOURCE, VERTEX_SOURCE};
use crate::render::uniforms::{FrameClock, FrameUniforms};

/// Everything one tick needs, constructed once after the session starts.
/// Owns the GPU context, the linked program, and the loop clock; the
/// resolution is read once at surface configuration and cached.
pub struct Pipeline {
    gpu: GpuContext,
    program: ShaderProgram,
    clock: FrameClock,
    started: Instant,
    resolution: [f32; 2],
}

impl Pipeline {
    pub fn new(window: Arc<Window>, bin_count: usize) -> Result<Self> {
        let gpu = GpuContext::new(window)?;
        let program = ShaderProgram::new(&gpu, VERTEX_SOURCE, FRAGMENT_SOURCE, bin_count)
            .context("Failed to build shader program")?;
        let resolution = gpu.resolution();

        log::info!(
            "Pipeline ready: {}x{}, {} spectrum bins",
            resolution[0], resolution[1], bin_count
        );

        Ok(Self {
            gpu,
            program,
            clock: FrameClock::new(),
            started: Instant::now(),
            resolution,
        })
    }

    /// One tick: pull the spectrum, upload uniforms, clear, draw, present.
    pub fn tick(&mut self, sampler: &mut AudioSampler) -> Result<()> {
        let time = self.clock.elapsed(self.started.elapsed());
        let uniforms = FrameUniforms::new(self.resolution, time);
        let spectrum = sampler.sample();
        self.program.upload(&self.gpu.queue, &uniforms, spectrum);

        let frame = match self.gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e) if surface_error_is_recoverable(&e) => {
                self.gpu.reconfigure();
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to acquire surface frame"),
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tick_encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("field_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.program.draw(&mut pass);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        Ok(())
    }
}

/// The windowed application. The session is user-gesture-gated: the window
/// opens idle and a key press or click starts audio routing, pipeline
/// construction, and the tick loop, in that order.
pub struct App {
    sampler: AudioSampler,
    track: Option<AudioTrack>,
    window: Option<Arc<Window>>,
    pipeline: Option<Pipeline>,
    width: u32,
    height: u32,
    title: String,
}

impl App {
    pub fn new(sampler: AudioSampler, track: AudioTrack, width: u32, height: u32, title: String) -> Self {
        Self {
            sampler,
            track: Some(track),
            window: None,
            pipeline: None,
            width,
            height,
            title,
        }
    }

    fn running(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Start the session. Ordering matters: audio routing must exist before
    /// the first sample() call produces meaningful data, so connect runs
    /// before pipeline construction and the first tick.
    fn start_session(&mut self) -> Result<()> {
        let track = match self.track.take() {
            Some(track) => track,
            None => return Ok(()),
        };

        self.sampler.connect(track)?;

        let window = self
            .window
            .clone()
            .context("Window not created before session start")?;
        let pipeline = Pipeline::new(window.clone(), self.sampler.bin_count())?;
        self.pipeline = Some(pipeline);

        window.request_redraw();
        Ok(())
    }

    fn render_frame(&mut self) -> Result<()> {
        let Some(ref mut pipeline) = self.pipeline else {
            return Ok(());
        };
        pipeline.tick(&mut self.sampler)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(winit::dpi::LogicalSize::new(self.width, self.height))
            .with_resizable(false);

        match event_loop.create_window(attributes) {
            Ok(window) => {
                log::info!("Press Space or click to start playback; Escape quits");
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Continuous redraw while running; presentation is Fifo so each
        // tick is paced by the display refresh. No catch-up, no skipping.
        if self.running() {
            if let Some(ref window) = self.window {
                window.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        logical_key,
                        ..
                    },
                ..
            } => match logical_key {
                Key::Named(NamedKey::Escape) => event_loop.exit(),
                Key::Named(NamedKey::Space) if !self.running() => {
                    if let Err(e) = self.start_session() {
                        log::error!("Failed to start session: {:#}", e);
                        event_loop.exit();
                    }
                }
                _ => {}
            },
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } if !self.running() => {
                if let Err(e) = self.start_session() {
                    log::error!("Failed to start session: {:#}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                // A failed tick ends the session; retrying at refresh rate
                // would just replay the same error every vsync.
                if let Err(e) = self.render_frame() {
                    log::error!("Render error, ending session: {:#}", e);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }
}
