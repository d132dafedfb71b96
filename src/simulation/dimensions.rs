use crate::error::{Result, SimError};

/// Size of a state texture. Both sides are powers of two and
/// `width` is either `height` or `2 * height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDimensions {
    pub width: u32,
    pub height: u32,
}

impl TextureDimensions {
    /// Smallest near-square power-of-two texture holding `item_count` pixels.
    ///
    /// Two candidates are compared: the square root of the next power of two
    /// of the count, and the next power of two of the square root of the
    /// count. When they agree the texture is square, otherwise it is twice as
    /// wide as it is tall.
    pub fn allocate(item_count: u32) -> Result<Self> {
        if item_count == 0 {
            return Err(SimError::InvalidArgument("item count must be at least 1".into()));
        }

        let major = exact_sqrt_of_power_of_two(next_power_of_two(item_count as u64));
        let minor = next_power_of_two_of_sqrt(item_count as u64);

        let (width, height) = match major {
            Some(side) if side == minor => (minor, minor),
            _ => (minor, minor / 2),
        };

        Ok(Self {
            width: u32::try_from(width).map_err(|_| too_large(item_count))?,
            height: u32::try_from(height).map_err(|_| too_large(item_count))?,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Texel coordinate of an item: row-major, `width` items per row.
    pub fn texel_of(&self, index: u32) -> (u32, u32) {
        (index % self.width, index / self.width)
    }

    /// Normalized lookup coordinate of an item, as sampled by the point renderer.
    pub fn lookup_coordinate(&self, index: u32) -> [f32; 2] {
        let (u, v) = self.texel_of(index);
        [u as f32 / self.width as f32, v as f32 / self.height as f32]
    }

    pub fn as_extent(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

fn too_large(item_count: u32) -> SimError {
    SimError::InvalidArgument(format!("item count {item_count} does not fit a texture"))
}

/// `2^ceil(log2(v))`, with `next_power_of_two(1) == 1`.
pub fn next_power_of_two(v: u64) -> u64 {
    v.max(1).next_power_of_two()
}

// sqrt(2^k) is only an integer for even k.
fn exact_sqrt_of_power_of_two(p: u64) -> Option<u64> {
    let exponent = p.trailing_zeros();
    (exponent % 2 == 0).then(|| 1u64 << (exponent / 2))
}

// Smallest 2^m with 2^m >= sqrt(v), i.e. (2^m)^2 >= v.
fn next_power_of_two_of_sqrt(v: u64) -> u64 {
    let mut side = 1u64;
    while side * side < v {
        side <<= 1;
    }
    side
}
