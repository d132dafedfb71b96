use std::sync::Arc;

use log::{error, info, warn};
use winit::window::Window;

use crate::backend::WgpuBackend;
use crate::config::EngineConfig;
use crate::error::{Result, SimError};
use crate::rendering::bridge::RenderBridge;
use crate::rendering::camera::OrbitCamera;
use crate::rendering::points::PointsRenderer;
use crate::simulation::engine::SimulationEngine;
use crate::simulation::params::SimParam;
use crate::simulation::types::StateKind;

const VELOCITY_PROGRAM: &str = include_str!("../shaders/velocity.wgsl");
const POSITION_PROGRAM: &str = include_str!("../shaders/position.wgsl");

// Longer frames are clamped so a stall does not fling the swarm apart.
const MAX_FRAME_DT: f32 = 1.0 / 20.0;

const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.05,
    a: 1.0,
};

/// Compiles the flocking programs on `backend` and builds an engine around them.
pub fn build_engine(backend: WgpuBackend, config: &EngineConfig) -> Result<SimulationEngine<WgpuBackend>> {
    let velocity = backend.create_program("Velocity Update", StateKind::Velocity, VELOCITY_PROGRAM)?;
    let position = backend.create_program("Position Update", StateKind::Position, POSITION_PROGRAM)?;
    SimulationEngine::new(backend, config, velocity, position)
}

// Native backends only: the backend blocks on error scopes and readback.
fn instance_descriptor() -> wgpu::InstanceDescriptor {
    wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    }
}

/// Window host: owns the surface, the engine and everything drawn from it.
pub struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    config: EngineConfig,
    // Only empty while being rebuilt.
    engine: Option<SimulationEngine<WgpuBackend>>,
    bridge: RenderBridge,
    points: PointsRenderer,
    pub camera: OrbitCamera,
    paused: bool,
    selected: usize,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, config: EngineConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(&instance_descriptor());

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| SimError::UnsupportedDevice(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SimError::UnsupportedDevice(format!("adapter: {e}")))?;
        info!("Using adapter {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Swarm Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| SimError::UnsupportedDevice(format!("device: {e}")))?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| SimError::UnsupportedDevice("surface has no formats".into()))?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let backend = WgpuBackend::new(&adapter, device, queue);
        let engine = build_engine(backend, &config)?;
        let bridge = RenderBridge::new(&engine);
        let points = PointsRenderer::new(engine.backend().device(), surface_format, &bridge, config.point_size);

        Ok(Self {
            window,
            surface,
            surface_config,
            config,
            engine: Some(engine),
            bridge,
            points,
            camera: OrbitCamera::new(350.0),
            paused: false,
            selected: 0,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn engine(&self) -> Result<&SimulationEngine<WgpuBackend>> {
        self.engine
            .as_ref()
            .ok_or_else(|| SimError::RenderFault("no simulation engine".into()))
    }

    fn engine_mut(&mut self) -> Result<&mut SimulationEngine<WgpuBackend>> {
        self.engine
            .as_mut()
            .ok_or_else(|| SimError::RenderFault("no simulation engine".into()))
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            if let Some(engine) = &self.engine {
                self.surface_config.width = new_size.width;
                self.surface_config.height = new_size.height;
                self.surface.configure(engine.backend().device(), &self.surface_config);
            }
        }
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        info!("Simulation {}", if self.paused { "paused" } else { "resumed" });
    }

    pub fn select_next_param(&mut self) {
        self.selected = (self.selected + 1) % SimParam::ALL.len();
        let param = SimParam::ALL[self.selected];
        if let Ok(engine) = self.engine() {
            info!("Selected {param} = {}", engine.params().get(param));
        }
    }

    /// Multiplies the selected parameter by `factor`, within its advisory range.
    pub fn scale_selected_param(&mut self, factor: f32) {
        let param = SimParam::ALL[self.selected];
        let result = self.engine_mut().and_then(|engine| {
            let (min, max) = param.range();
            let value = (engine.params().get(param) * factor).clamp(min, max);
            engine.set_param(param, value).map(|()| value)
        });
        match result {
            Ok(value) => info!("{param} = {value}"),
            Err(err) => warn!("Could not set {param}: {err}"),
        }
    }

    /// Tears the engine down and builds a fresh one on the same device.
    pub fn rebuild(&mut self) -> Result<()> {
        let engine = self
            .engine
            .take()
            .ok_or_else(|| SimError::RenderFault("no simulation engine".into()))?;
        // Keep tuned parameters across the rebuild.
        self.config.params = *engine.params();
        let backend = engine.destroy();
        let engine = build_engine(backend, &self.config)?;
        self.bridge.update(&engine);
        self.points.clear_cache();
        self.engine = Some(engine);
        info!("Simulation rebuilt");
        Ok(())
    }

    /// Steps the simulation by `dt` seconds and draws the result.
    ///
    /// A faulted engine is rebuilt once; if that fails the error is returned
    /// and the host should stop.
    pub fn frame(&mut self, dt: f32) -> Result<()> {
        if !self.paused {
            let dt = dt.clamp(0.0, MAX_FRAME_DT);
            if let Err(err) = self.engine_mut()?.advance(dt) {
                error!("Simulation step failed: {err}");
                self.rebuild()?;
            }
        }
        if let Some(engine) = &self.engine {
            self.bridge.update(engine);
        }
        self.render()
    }

    fn render(&mut self) -> Result<()> {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.window.inner_size();
                self.resize(size);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(err) => return Err(SimError::RenderFault(format!("surface: {err}"))),
        };
        let texture_view = surface_texture.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let aspect = self.surface_config.width as f32 / self.surface_config.height as f32;
        let viewport = [self.surface_config.width as f32, self.surface_config.height as f32];
        let view_proj = self.camera.view_projection(aspect);

        let Some(engine) = self.engine.as_ref() else {
            return Err(SimError::RenderFault("no simulation engine".into()));
        };
        let backend = engine.backend();
        self.points.update_camera(backend.queue(), view_proj, viewport);

        let mut encoder = backend.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Swarm Frame Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Swarm Points Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &texture_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            self.points.draw(backend, &self.bridge, &mut render_pass)?;
        }

        backend.queue().submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        surface_texture.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_targets_native_backends_only() {
        let descriptor = instance_descriptor();
        assert_eq!(descriptor.backends, wgpu::Backends::PRIMARY);
        assert!(!descriptor.backends.contains(wgpu::Backends::GL));
    }
}
