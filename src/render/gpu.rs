use anyhow::{Context, Result};
use std::sync::Arc;
use wgpu;
use winit::window::Window;

/// GPU device, queue, and the window surface the pipeline presents to.
///
/// The surface is configured once at the window's initial dimensions and
/// presented with `Fifo`, so ticks are paced by the display refresh.
pub struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        pollster::block_on(Self::init_async(window))
    }

    async fn init_async(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::METAL | wgpu::Backends::VULKAN | wgpu::Backends::DX12,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("Failed to create window surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to find a suitable GPU adapter")?;

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lumina_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
                None,
            )
            .await
            .context("Failed to create GPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
        })
    }

    /// Pixel dimensions of the drawable surface, read once at setup.
    pub fn resolution(&self) -> [f32; 2] {
        [self.config.width as f32, self.config.height as f32]
    }

    /// Reconfigure after a `Lost`/`Outdated` surface, keeping the dimensions.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

/// Whether a surface acquisition error can be absorbed by reconfiguring and
/// skipping the frame. Anything else (out of memory, timeout) ends the
/// session rather than retrying at refresh rate.
pub fn surface_error_is_recoverable(err: &wgpu::SurfaceError) -> bool {
    matches!(
        err,
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_and_outdated_surfaces_are_recoverable() {
        assert!(surface_error_is_recoverable(&wgpu::SurfaceError::Lost));
        assert!(surface_error_is_recoverable(&wgpu::SurfaceError::Outdated));
    }

    #[test]
    fn fatal_surface_errors_are_not_recoverable() {
        assert!(!surface_error_is_recoverable(&wgpu::SurfaceError::OutOfMemory));
        assert!(!surface_error_is_recoverable(&wgpu::SurfaceError::Timeout));
    }
}
