use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::types::{CHANNELS, StateKind};

/// Builds the RGBA32F pixel buffer a state texture starts from.
///
/// Returns `width * height * 4` floats. Live items (index < `item_count`) get
/// seeded random state; padding pixels are zeroed so full-texture passes see
/// defined values. `spread` is the position half-extent for position state
/// and the speed scale for velocity state.
pub fn initialize_state(
    dimensions: TextureDimensions,
    item_count: u32,
    kind: StateKind,
    seed: u64,
    spread: f32,
) -> Result<Vec<f32>> {
    if item_count == 0 || item_count as usize > dimensions.pixel_count() {
        return Err(SimError::InvalidArgument(format!(
            "{item_count} items do not fit a {}x{} texture",
            dimensions.width, dimensions.height
        )));
    }
    if !spread.is_finite() || spread <= 0.0 {
        return Err(SimError::InvalidArgument(format!("spread must be positive, got {spread}")));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut texels = vec![0.0f32; dimensions.pixel_count() * CHANNELS];

    for pixel in texels.chunks_exact_mut(CHANNELS).take(item_count as usize) {
        let record = match kind {
            StateKind::Position => random_position(&mut rng, spread),
            StateKind::Velocity => random_velocity(&mut rng, spread),
        };
        pixel.copy_from_slice(&record);
    }

    Ok(texels)
}

// Uniform inside a cube of half-extent `spread`, w = phase in [0, 1).
fn random_position(rng: &mut StdRng, spread: f32) -> [f32; 4] {
    [
        rng.gen_range(-spread..spread),
        rng.gen_range(-spread..spread),
        rng.gen_range(-spread..spread),
        rng.gen_range(0.0..1.0),
    ]
}

// Random direction with speed in [0.5, 1] * scale, w = per-item scalar in [0, 1).
fn random_velocity(rng: &mut StdRng, scale: f32) -> [f32; 4] {
    let theta = rng.gen_range(0.0..std::f32::consts::TAU);
    let z: f32 = rng.gen_range(-1.0..1.0);
    let ring = (1.0 - z * z).sqrt();
    let speed = scale * rng.gen_range(0.5..=1.0);

    [
        ring * theta.cos() * speed,
        ring * theta.sin() * speed,
        z * speed,
        rng.gen_range(0.0..1.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(item_count: u32) -> TextureDimensions {
        TextureDimensions::allocate(item_count).unwrap()
    }

    #[test]
    fn buffer_covers_whole_texture() {
        let d = dims(5);
        let texels = initialize_state(d, 5, StateKind::Position, 1, 10.0).unwrap();
        assert_eq!(texels.len(), d.pixel_count() * CHANNELS);
    }

    #[test]
    fn padding_is_zero_and_everything_is_finite() {
        let d = dims(100);
        for kind in [StateKind::Position, StateKind::Velocity] {
            let texels = initialize_state(d, 100, kind, 7, 3.0).unwrap();
            assert!(texels.iter().all(|v| v.is_finite()));
            assert!(texels[100 * CHANNELS..].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn positions_stay_inside_the_volume() {
        let d = dims(512);
        let texels = initialize_state(d, 512, StateKind::Position, 3, 50.0).unwrap();
        for pixel in texels.chunks_exact(CHANNELS) {
            assert!(pixel[..3].iter().all(|c| c.abs() <= 50.0));
            assert!((0.0..1.0).contains(&pixel[3]));
        }
    }

    #[test]
    fn velocities_have_bounded_speed_and_non_negative_w() {
        let d = dims(512);
        let texels = initialize_state(d, 512, StateKind::Velocity, 3, 2.0).unwrap();
        for pixel in texels.chunks_exact(CHANNELS) {
            let speed = (pixel[0] * pixel[0] + pixel[1] * pixel[1] + pixel[2] * pixel[2]).sqrt();
            assert!(speed >= 0.99 && speed <= 2.01, "speed {speed}");
            assert!(pixel[3] >= 0.0);
        }
    }

    #[test]
    fn seeding_is_deterministic_and_independent() {
        let d = dims(64);
        let a = initialize_state(d, 64, StateKind::Velocity, 42, 1.0).unwrap();
        let b = initialize_state(d, 64, StateKind::Velocity, 42, 1.0).unwrap();
        let c = initialize_state(d, 64, StateKind::Velocity, 43, 1.0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_counts_that_overflow_the_texture() {
        let d = TextureDimensions { width: 2, height: 1 };
        assert!(initialize_state(d, 3, StateKind::Position, 0, 1.0).is_err());
        assert!(initialize_state(d, 0, StateKind::Position, 0, 1.0).is_err());
        assert!(initialize_state(d, 2, StateKind::Position, 0, 0.0).is_err());
    }
}
