use std::cell::RefCell;
use std::rc::Rc;

use gpu_swarm::backend::{Fragment, SoftwareBackend, SoftwareProgram, Texel};
use gpu_swarm::config::EngineConfig;
use gpu_swarm::error::SimError;
use gpu_swarm::rendering::RenderBridge;
use gpu_swarm::simulation::{SimParam, SimulationEngine, SimulationParams};

fn own_velocity(f: &Fragment<'_>) -> Texel {
    f.velocities.fetch(f.texel.0, f.texel.1)
}

fn integrate(f: &Fragment<'_>) -> Texel {
    let [px, py, pz, pw] = f.positions.fetch(f.texel.0, f.texel.1);
    let [vx, vy, vz, _] = f.velocities.fetch(f.texel.0, f.texel.1);
    let dt = f.frame.delta_time;
    [px + vx * dt, py + vy * dt, pz + vz * dt, pw]
}

fn build(
    config: &EngineConfig,
    velocity: SoftwareProgram,
    position: SoftwareProgram,
) -> (SoftwareBackend, SimulationEngine<SoftwareBackend>) {
    let backend = SoftwareBackend::new();
    let engine = SimulationEngine::new(backend.clone(), config, velocity, position).unwrap();
    (backend, engine)
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * (1.0 + a.abs().max(b.abs()))
}

#[test]
fn constant_velocity_moves_positions_linearly() {
    let config = EngineConfig::with_item_count(37);
    let (_, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    );
    let p0 = engine.read_positions().unwrap();
    let v0 = engine.read_velocities().unwrap();
    assert_eq!(p0.len(), 37);

    engine.step(1.0, 1.0).unwrap();
    let p1 = engine.read_positions().unwrap();
    for i in 0..37 {
        for c in 0..3 {
            assert!(close(p1[i][c], p0[i][c] + v0[i][c]), "item {i} channel {c}");
        }
        assert_eq!(p1[i][3], p0[i][3]);
    }

    engine.step(1.0, 2.0).unwrap();
    let p2 = engine.read_positions().unwrap();
    for i in 0..37 {
        for c in 0..3 {
            assert!(close(p2[i][c], p0[i][c] + 2.0 * v0[i][c]), "item {i} channel {c}");
        }
    }
    assert_eq!(engine.read_velocities().unwrap(), v0);
}

#[test]
fn position_pass_sees_this_ticks_velocity() {
    let config = EngineConfig::with_item_count(16);
    let (_, mut engine) = build(
        &config,
        SoftwareProgram::new("Accelerate", |f| {
            let [vx, vy, vz, vw] = f.velocities.fetch(f.texel.0, f.texel.1);
            [vx + 1.0, vy, vz, vw]
        }),
        SoftwareProgram::new("Position", integrate),
    );
    let p0 = engine.read_positions().unwrap();
    let v0 = engine.read_velocities().unwrap();

    engine.step(1.0, 1.0).unwrap();
    let p1 = engine.read_positions().unwrap();
    for i in 0..16 {
        // Stale velocity would give p0 + v0.
        assert!(close(p1[i][0], p0[i][0] + v0[i][0] + 1.0));
    }
}

#[test]
fn parameter_change_applies_from_the_next_step() {
    let config = EngineConfig::with_item_count(4);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let (_, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", move |f| {
            if f.index == 0 {
                log.borrow_mut().push(f.params.map(|p| p.max_speed));
            }
            own_velocity(f)
        }),
        SoftwareProgram::new("Position", integrate),
    );

    engine.step(0.1, 0.1).unwrap();
    engine.set_param(SimParam::MaxSpeed, 3.0).unwrap();
    assert_eq!(engine.params().max_speed, 3.0);
    engine.step(0.1, 0.2).unwrap();

    let default_speed = SimulationParams::default().max_speed;
    assert_eq!(*seen.borrow(), vec![Some(default_speed), Some(3.0)]);
}

#[test]
fn only_the_velocity_program_receives_params() {
    let config = EngineConfig::with_item_count(8);
    let position_frames = Rc::new(RefCell::new(Vec::new()));
    let log = position_frames.clone();
    let (_, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", |f| {
            assert!(f.params.is_some());
            own_velocity(f)
        }),
        SoftwareProgram::new("Position", move |f| {
            assert!(f.params.is_none());
            if f.index == 0 {
                log.borrow_mut().push(*f.frame);
            }
            integrate(f)
        }),
    );

    engine.step(0.25, 3.0).unwrap();
    let frames = position_frames.borrow();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].delta_time, 0.25);
    assert_eq!(frames[0].elapsed_time, 3.0);
    assert_eq!(frames[0].item_count, 8);
    assert_eq!(frames[0].resolution, [4.0, 2.0]);
}

#[test]
fn passes_alternate_targets_and_order() {
    let config = EngineConfig::with_item_count(100);
    let (backend, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    );
    let seeded = backend.passes().len();
    assert_eq!(seeded, 2);

    let mut position_textures = vec![engine.position_texture()];
    for tick in 1..=5u32 {
        engine.advance(0.016).unwrap();
        position_textures.push(engine.position_texture());
        assert_eq!(engine.ticks(), u64::from(tick));
    }
    // Two targets, used alternately.
    for pair in position_textures.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
    assert_eq!(position_textures[0], position_textures[2]);

    let passes = backend.passes();
    assert_eq!(passes.len(), seeded + 10);
    for tick in passes[seeded..].chunks(2) {
        assert_eq!(tick[0].program, "Velocity");
        assert_eq!(tick[1].program, "Position");
        assert_eq!(tick[1].velocities, tick[0].target);
    }
}

#[test]
fn bridge_samples_what_the_engine_wrote() {
    let config = EngineConfig::with_item_count(50);
    let (backend, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    );
    let mut bridge = RenderBridge::new(&engine);
    engine.advance(0.5).unwrap();
    assert_ne!(bridge.sampled_texture(), engine.position_texture());

    bridge.update(&engine);
    assert_eq!(bridge.sampled_texture(), engine.position_texture());

    let mut reader = backend.clone();
    let texels = gpu_swarm::RenderBackend::read_texels(&mut reader, bridge.sampled_texture()).unwrap();
    let fetched = bridge.fetch_positions(&texels).unwrap();
    let expected = engine.read_positions().unwrap();
    assert_eq!(fetched.len(), 50);
    for (got, want) in fetched.iter().zip(&expected) {
        assert_eq!(*got, [want[0], want[1], want[2]]);
    }
}

#[test]
fn fault_is_sticky_until_rebuilt() {
    let config = EngineConfig::with_item_count(10);
    let (backend, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    );
    backend.fail_next_draw();
    assert!(matches!(engine.step(0.1, 0.1), Err(SimError::RenderFault(_))));
    assert!(engine.is_faulted());
    assert!(matches!(engine.step(0.1, 0.2), Err(SimError::RenderFault(_))));

    let backend = engine.destroy();
    assert_eq!(backend.live_textures(), 0);
    let engine = SimulationEngine::new(
        backend.clone(),
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    )
    .unwrap();
    assert!(!engine.is_faulted());
    assert_eq!(backend.live_textures(), 4);
}

#[test]
fn invalid_parameters_leave_the_engine_unchanged() {
    let config = EngineConfig::with_item_count(10);
    let (_, mut engine) = build(
        &config,
        SoftwareProgram::new("Velocity", own_velocity),
        SoftwareProgram::new("Position", integrate),
    );
    let before = *engine.params();
    assert!(matches!(
        engine.set_param(SimParam::CohesionWeight, f32::NAN),
        Err(SimError::InvalidArgument(_))
    ));
    assert_eq!(*engine.params(), before);
    assert!(matches!(engine.step(-1.0, 0.0), Err(SimError::InvalidArgument(_))));
    assert!(!engine.is_faulted());
    assert_eq!(engine.ticks(), 0);
}
