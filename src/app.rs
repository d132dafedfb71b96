use std::sync::Arc;
use std::time::Instant;

use log::{error, info};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use gpu_swarm::config::EngineConfig;
use gpu_swarm::rendering::Renderer;

struct App {
    config: EngineConfig,
    state: Option<Renderer>,
    last_frame: Instant,
    last_cursor: [f32; 2],
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: None,
            last_frame: Instant::now(),
            last_cursor: [0.0, 0.0],
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("GPU Swarm");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Could not create window: {err}");
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Renderer::new(window.clone(), self.config.clone())) {
            Ok(state) => {
                self.state = Some(state);
                self.last_frame = Instant::now();
                window.request_redraw();
            }
            Err(err) => {
                error!("Could not start the simulation: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested; stopping");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;
                if let Err(err) = state.frame(dt) {
                    error!("Frame failed: {err}");
                    event_loop.exit();
                    return;
                }
                state.window().request_redraw();
            }
            // Always followed by a redraw request.
            WindowEvent::Resized(size) => state.resize(size),
            WindowEvent::MouseWheel { delta, .. } => match delta {
                MouseScrollDelta::LineDelta(_, y) => state.camera.zoom(y),
                // Touchpads report pixels
                MouseScrollDelta::PixelDelta(position) => state.camera.zoom(position.y as f32 * 0.003),
            },
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => match button_state {
                ElementState::Pressed => state.camera.handle_mouse_press(self.last_cursor),
                ElementState::Released => state.camera.handle_mouse_release(),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.last_cursor = [position.x as f32, position.y as f32];
                state.camera.handle_mouse_move(self.last_cursor);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match key_code {
                KeyCode::Escape => event_loop.exit(),
                KeyCode::Space => state.toggle_pause(),
                KeyCode::KeyR => {
                    if let Err(err) = state.rebuild() {
                        error!("Rebuild failed: {err}");
                        event_loop.exit();
                    }
                }
                KeyCode::Tab => state.select_next_param(),
                KeyCode::ArrowUp => state.scale_selected_param(1.1),
                KeyCode::ArrowDown => state.scale_selected_param(0.9),
                _ => (),
            },
            _ => (),
        }
    }
}

fn load_config() -> EngineConfig {
    match std::env::args().nth(1) {
        Some(path) => match EngineConfig::from_json_file(&path) {
            Ok(config) => {
                info!("Loaded configuration from {path}");
                config
            }
            Err(err) => {
                error!("Ignoring {path}: {err}");
                EngineConfig::default()
            }
        },
        None => EngineConfig::default(),
    }
}

pub(crate) fn run() {
    env_logger::init();

    let config = load_config();
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Could not create event loop: {err}");
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    if let Err(err) = event_loop.run_app(&mut app) {
        error!("Event loop error: {err}");
    }
}
