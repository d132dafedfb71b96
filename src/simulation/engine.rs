use log::{debug, error, info};

use crate::backend::{RenderBackend, TargetPrecision, TextureId};
use crate::config::EngineConfig;
use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::init::initialize_state;
use crate::simulation::params::{SimParam, SimulationParams};
use crate::simulation::ping_pong::PingPongBuffer;
use crate::simulation::types::{FrameUniforms, ProgramBindings, StateKind};

/// GPU-resident particle state advanced by a velocity pass then a position pass.
pub struct SimulationEngine<B: RenderBackend> {
    backend: B,
    item_count: u32,
    dimensions: TextureDimensions,
    params: SimulationParams,

    velocity_program: B::Program,
    position_program: B::Program,
    velocity_buffer: PingPongBuffer,
    position_buffer: PingPongBuffer,

    // Last committed state; always the front target of the matching buffer.
    position_texture: TextureId,
    velocity_texture: TextureId,

    elapsed_time: f32,
    ticks: u64,
    faulted: bool,
}

impl<B: RenderBackend> SimulationEngine<B> {
    /// Allocates state textures, seeds both ping-pong buffers and takes
    /// ownership of the backend and the two update programs.
    ///
    /// Nothing is allocated when the configuration is invalid or the device
    /// cannot render float targets.
    pub fn new(
        mut backend: B,
        config: &EngineConfig,
        velocity_program: B::Program,
        position_program: B::Program,
    ) -> Result<Self> {
        config.validate()?;
        let item_count = config.item_count;
        let dimensions = TextureDimensions::allocate(item_count)?;

        let capabilities = backend.capabilities();
        if dimensions.width > capabilities.max_texture_dimension {
            return Err(SimError::InvalidArgument(format!(
                "{item_count} items need a {}x{} texture, device limit is {}",
                dimensions.width, dimensions.height, capabilities.max_texture_dimension
            )));
        }
        let precision = capabilities.select_precision(config.device_precision_fallback)?;

        let velocities = initialize_state(
            dimensions,
            item_count,
            StateKind::Velocity,
            config.velocity_seed,
            config.velocity_spread,
        )?;
        let positions = initialize_state(
            dimensions,
            item_count,
            StateKind::Position,
            config.position_seed,
            config.position_spread,
        )?;

        let (velocity_buffer, position_buffer, velocity_texture, position_texture) =
            seed_buffers(&mut backend, dimensions, precision, &velocities, &positions)?;

        info!(
            "Simulation engine: {item_count} items in {}x{} state textures ({precision:?} precision)",
            dimensions.width, dimensions.height
        );

        Ok(Self {
            backend,
            item_count,
            dimensions,
            params: config.params,
            velocity_program,
            position_program,
            velocity_buffer,
            position_buffer,
            position_texture,
            velocity_texture,
            elapsed_time: 0.0,
            ticks: 0,
            faulted: false,
        })
    }

    /// Advances one tick: velocity first, then position from the new velocity.
    ///
    /// A render fault leaves the engine unusable; every later call fails
    /// until the host builds a new engine.
    pub fn step(&mut self, dt: f32, elapsed_time: f32) -> Result<()> {
        if self.faulted {
            return Err(SimError::RenderFault("engine faulted, rebuild required".into()));
        }
        if !dt.is_finite() || dt < 0.0 {
            return Err(SimError::InvalidArgument(format!("dt must be finite and non-negative, got {dt}")));
        }
        if !elapsed_time.is_finite() {
            return Err(SimError::InvalidArgument(format!("elapsed time must be finite, got {elapsed_time}")));
        }

        match self.run_passes(dt, elapsed_time) {
            Ok(()) => {
                self.elapsed_time = elapsed_time;
                Ok(())
            }
            Err(err @ SimError::RenderFault(_)) => {
                error!("Simulation step {} failed: {err}", self.ticks);
                self.faulted = true;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Steps with an internally accumulated clock.
    pub fn advance(&mut self, dt: f32) -> Result<()> {
        self.step(dt, self.elapsed_time + dt)
    }

    fn run_passes(&mut self, dt: f32, elapsed_time: f32) -> Result<()> {
        let frame = FrameUniforms::new(elapsed_time, dt, self.dimensions, self.item_count);

        let velocity_inputs = ProgramBindings {
            positions: self.position_texture,
            velocities: self.velocity_texture,
            frame,
            params: Some(self.params),
        };
        self.velocity_texture =
            self.velocity_buffer
                .pass(&mut self.backend, &mut self.velocity_program, &velocity_inputs)?;

        let position_inputs = ProgramBindings {
            positions: self.position_texture,
            velocities: self.velocity_texture,
            frame,
            params: None,
        };
        self.position_texture =
            self.position_buffer
                .pass(&mut self.backend, &mut self.position_program, &position_inputs)?;

        self.ticks += 1;
        debug!("Tick {} done (dt {dt:.4}, t {elapsed_time:.3})", self.ticks);
        Ok(())
    }

    /// Takes effect on the next `step`.
    pub fn set_param(&mut self, param: SimParam, value: f32) -> Result<()> {
        self.params.set(param, value)?;
        debug!("{param} = {value}");
        Ok(())
    }

    pub fn set_params(&mut self, params: SimulationParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn position_texture(&self) -> TextureId {
        self.position_texture
    }

    pub fn velocity_texture(&self) -> TextureId {
        self.velocity_texture
    }

    pub fn texture_dimensions(&self) -> TextureDimensions {
        self.dimensions
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn precision(&self) -> TargetPrecision {
        self.position_buffer.precision()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed_time(&self) -> f32 {
        self.elapsed_time
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current positions of the live items, for debugging.
    pub fn read_positions(&mut self) -> Result<Vec<[f32; 4]>> {
        self.read_items(self.position_texture)
    }

    /// Current velocities of the live items, for debugging.
    pub fn read_velocities(&mut self) -> Result<Vec<[f32; 4]>> {
        self.read_items(self.velocity_texture)
    }

    fn read_items(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        let mut texels = self.backend.read_texels(texture)?;
        texels.truncate(self.item_count as usize);
        Ok(texels)
    }

    /// Releases every target the engine owns and hands the backend back.
    pub fn destroy(mut self) -> B {
        self.velocity_buffer.release(&mut self.backend);
        self.position_buffer.release(&mut self.backend);
        self.backend
    }
}

// Uploads the initial state, builds both buffers and runs one copy pass into
// each so their front targets hold valid state before the first step. The
// uploaded textures are released again whatever happens.
fn seed_buffers<B: RenderBackend>(
    backend: &mut B,
    dimensions: TextureDimensions,
    precision: TargetPrecision,
    velocities: &[f32],
    positions: &[f32],
) -> Result<(PingPongBuffer, PingPongBuffer, TextureId, TextureId)> {
    let initial_velocities = backend.create_state_texture("Initial Velocities", dimensions, velocities)?;
    let initial_positions = match backend.create_state_texture("Initial Positions", dimensions, positions) {
        Ok(texture) => texture,
        Err(err) => {
            backend.release_texture(initial_velocities);
            return Err(err);
        }
    };

    let seeded = seed_from(backend, dimensions, precision, initial_positions, initial_velocities);
    backend.release_texture(initial_velocities);
    backend.release_texture(initial_positions);
    seeded
}

fn seed_from<B: RenderBackend>(
    backend: &mut B,
    dimensions: TextureDimensions,
    precision: TargetPrecision,
    initial_positions: TextureId,
    initial_velocities: TextureId,
) -> Result<(PingPongBuffer, PingPongBuffer, TextureId, TextureId)> {
    let bindings = ProgramBindings {
        positions: initial_positions,
        velocities: initial_velocities,
        frame: FrameUniforms::new(0.0, 0.0, dimensions, dimensions.pixel_count() as u32),
        params: None,
    };

    let mut velocity_buffer = PingPongBuffer::new(backend, "Velocity", dimensions, precision)?;
    let mut position_buffer = match PingPongBuffer::new(backend, "Position", dimensions, precision) {
        Ok(buffer) => buffer,
        Err(err) => {
            velocity_buffer.release(backend);
            return Err(err);
        }
    };

    match run_seed_passes(backend, &mut velocity_buffer, &mut position_buffer, &bindings) {
        Ok((velocity_texture, position_texture)) => {
            Ok((velocity_buffer, position_buffer, velocity_texture, position_texture))
        }
        Err(err) => {
            velocity_buffer.release(backend);
            position_buffer.release(backend);
            Err(err)
        }
    }
}

fn run_seed_passes<B: RenderBackend>(
    backend: &mut B,
    velocity_buffer: &mut PingPongBuffer,
    position_buffer: &mut PingPongBuffer,
    bindings: &ProgramBindings,
) -> Result<(TextureId, TextureId)> {
    let mut seed_velocity = backend.create_seed_program(StateKind::Velocity)?;
    let velocity_texture = velocity_buffer.pass(backend, &mut seed_velocity, bindings)?;
    let mut seed_position = backend.create_seed_program(StateKind::Position)?;
    let position_texture = position_buffer.pass(backend, &mut seed_position, bindings)?;
    Ok((velocity_texture, position_texture))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCapabilities, SoftwareBackend, SoftwareProgram};

    fn passthrough(kind: StateKind) -> SoftwareProgram {
        SoftwareProgram::new("Passthrough", move |f| match kind {
            StateKind::Position => f.positions.fetch(f.texel.0, f.texel.1),
            StateKind::Velocity => f.velocities.fetch(f.texel.0, f.texel.1),
        })
    }

    fn engine(config: &EngineConfig) -> (SoftwareBackend, SimulationEngine<SoftwareBackend>) {
        let backend = SoftwareBackend::new();
        let engine = SimulationEngine::new(
            backend.clone(),
            config,
            passthrough(StateKind::Velocity),
            passthrough(StateKind::Position),
        )
        .unwrap();
        (backend, engine)
    }

    #[test]
    fn construction_seeds_front_textures_with_initial_state() {
        let config = EngineConfig::with_item_count(10);
        let (_, mut engine) = engine(&config);
        let dims = engine.texture_dimensions();

        let expected = initialize_state(dims, 10, StateKind::Position, config.position_seed, config.position_spread)
            .unwrap();
        let positions = engine.read_positions().unwrap();
        assert_eq!(positions.len(), 10);
        for (i, texel) in positions.iter().enumerate() {
            assert_eq!(texel[..], expected[i * 4..i * 4 + 4]);
        }
        assert_eq!(engine.ticks(), 0);
    }

    #[test]
    fn only_ping_pong_targets_survive_construction() {
        let (backend, engine) = engine(&EngineConfig::with_item_count(33));
        assert_eq!(backend.live_textures(), 4);
        assert_eq!(backend.passes().len(), 2);

        let backend = engine.destroy();
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn zero_items_allocate_nothing() {
        let backend = SoftwareBackend::new();
        let result = SimulationEngine::new(
            backend.clone(),
            &EngineConfig::with_item_count(0),
            passthrough(StateKind::Velocity),
            passthrough(StateKind::Position),
        );
        assert!(matches!(result, Err(SimError::InvalidArgument(_))));
        assert_eq!(backend.textures_created(), 0);
    }

    #[test]
    fn missing_float_targets_is_unsupported() {
        let backend = SoftwareBackend::with_capabilities(DeviceCapabilities {
            float32_targets: false,
            float16_targets: false,
            max_texture_dimension: 4096,
        });
        let result = SimulationEngine::new(
            backend.clone(),
            &EngineConfig::with_item_count(16),
            passthrough(StateKind::Velocity),
            passthrough(StateKind::Position),
        );
        assert!(matches!(result, Err(SimError::UnsupportedDevice(_))));
        assert_eq!(backend.textures_created(), 0);
    }

    #[test]
    fn precision_fallback_selects_half_targets() {
        let mut config = EngineConfig::with_item_count(16);
        config.device_precision_fallback = true;
        let (backend, engine) = engine(&config);
        assert_eq!(engine.precision(), TargetPrecision::Half);
        assert_eq!(backend.precision_of(engine.position_texture()), Some(TargetPrecision::Half));
    }

    #[test]
    fn oversized_texture_is_rejected() {
        let backend = SoftwareBackend::with_capabilities(DeviceCapabilities {
            float32_targets: true,
            float16_targets: true,
            max_texture_dimension: 8,
        });
        let result = SimulationEngine::new(
            backend.clone(),
            &EngineConfig::with_item_count(200),
            passthrough(StateKind::Velocity),
            passthrough(StateKind::Position),
        );
        assert!(matches!(result, Err(SimError::InvalidArgument(_))));
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn step_rejects_bad_time() {
        let (_, mut engine) = engine(&EngineConfig::with_item_count(4));
        assert!(matches!(engine.step(f32::NAN, 0.0), Err(SimError::InvalidArgument(_))));
        assert!(matches!(engine.step(-1.0, 0.0), Err(SimError::InvalidArgument(_))));
        assert!(!engine.is_faulted());
        engine.step(0.016, 0.016).unwrap();
    }

    #[test]
    fn render_fault_is_sticky() {
        let (backend, mut engine) = engine(&EngineConfig::with_item_count(4));
        backend.fail_next_draw();
        assert!(matches!(engine.step(0.1, 0.1), Err(SimError::RenderFault(_))));
        assert!(engine.is_faulted());
        assert!(matches!(engine.step(0.1, 0.2), Err(SimError::RenderFault(_))));
        assert_eq!(backend.current_render_target(), None);
    }

    #[test]
    fn advance_accumulates_elapsed_time() {
        let (_, mut engine) = engine(&EngineConfig::with_item_count(4));
        engine.advance(0.25).unwrap();
        engine.advance(0.5).unwrap();
        assert_eq!(engine.elapsed_time(), 0.75);
        assert_eq!(engine.ticks(), 2);
    }
}
