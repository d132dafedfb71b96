use crate::backend::{RenderBackend, TextureId};
use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::engine::SimulationEngine;

/// Maps each rendered point onto its pixel in the position texture.
///
/// Lookup coordinates are computed once; only the sampled texture handle
/// changes from frame to frame. The bridge never writes simulation state.
#[derive(Debug, Clone)]
pub struct RenderBridge {
    item_count: u32,
    dimensions: TextureDimensions,
    lookup: Vec<[f32; 2]>,
    positions: TextureId,
}

impl RenderBridge {
    pub fn new<B: RenderBackend>(engine: &SimulationEngine<B>) -> Self {
        let dimensions = engine.texture_dimensions();
        let item_count = engine.item_count();
        Self {
            item_count,
            dimensions,
            lookup: lookup_coordinates(item_count, dimensions),
            positions: engine.position_texture(),
        }
    }

    pub fn with_layout(item_count: u32, dimensions: TextureDimensions, positions: TextureId) -> Result<Self> {
        if item_count == 0 || item_count as usize > dimensions.pixel_count() {
            return Err(SimError::InvalidArgument(format!(
                "{item_count} items do not fit a {}x{} texture",
                dimensions.width, dimensions.height
            )));
        }
        Ok(Self {
            item_count,
            dimensions,
            lookup: lookup_coordinates(item_count, dimensions),
            positions,
        })
    }

    /// Samples the engine's latest position texture on the next draw.
    pub fn update<B: RenderBackend>(&mut self, engine: &SimulationEngine<B>) {
        self.positions = engine.position_texture();
    }

    pub fn lookup_coordinates(&self) -> &[[f32; 2]] {
        &self.lookup
    }

    pub fn sampled_texture(&self) -> TextureId {
        self.positions
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn dimensions(&self) -> TextureDimensions {
        self.dimensions
    }

    /// World positions as the point shader fetches them from a full read-back
    /// of the sampled texture.
    pub fn fetch_positions(&self, texels: &[[f32; 4]]) -> Result<Vec<[f32; 3]>> {
        if texels.len() < self.dimensions.pixel_count() {
            return Err(SimError::InvalidArgument(format!(
                "read-back has {} texels, a {}x{} texture needs {}",
                texels.len(),
                self.dimensions.width,
                self.dimensions.height,
                self.dimensions.pixel_count()
            )));
        }
        Ok(self
            .lookup
            .iter()
            .map(|&[u, v]| {
                let x = (u * self.dimensions.width as f32).floor() as usize;
                let y = (v * self.dimensions.height as f32).floor() as usize;
                let [px, py, pz, _] = texels[y * self.dimensions.width as usize + x];
                [px, py, pz]
            })
            .collect())
    }
}

fn lookup_coordinates(item_count: u32, dimensions: TextureDimensions) -> Vec<[f32; 2]> {
    (0..item_count).map(|i| dimensions.lookup_coordinate(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_for_five_items_in_four_by_two() {
        let dims = TextureDimensions { width: 4, height: 2 };
        let bridge = RenderBridge::with_layout(5, dims, TextureId(0)).unwrap();
        let lookup = bridge.lookup_coordinates();
        assert_eq!(lookup.len(), 5);
        assert_eq!(lookup[0], [0.0, 0.0]);
        assert_eq!(lookup[3], [0.75, 0.0]);
        assert_eq!(lookup[4], [0.0, 0.5]);
    }

    #[test]
    fn fetch_reads_each_items_own_pixel() {
        let dims = TextureDimensions { width: 4, height: 2 };
        let bridge = RenderBridge::with_layout(6, dims, TextureId(0)).unwrap();
        let texels: Vec<[f32; 4]> = (0..8).map(|i| [i as f32, 0.0, -(i as f32), 9.0]).collect();
        let fetched = bridge.fetch_positions(&texels).unwrap();
        assert_eq!(fetched.len(), 6);
        for (i, p) in fetched.iter().enumerate() {
            assert_eq!(*p, [i as f32, 0.0, -(i as f32)]);
        }
    }

    #[test]
    fn short_read_back_is_rejected() {
        let dims = TextureDimensions { width: 4, height: 2 };
        let bridge = RenderBridge::with_layout(5, dims, TextureId(0)).unwrap();
        assert!(matches!(
            bridge.fetch_positions(&[[0.0; 4]; 3]),
            Err(SimError::InvalidArgument(_))
        ));
        assert!(matches!(bridge.fetch_positions(&[]), Err(SimError::InvalidArgument(_))));
    }

    #[test]
    fn layout_must_fit() {
        let dims = TextureDimensions { width: 2, height: 1 };
        assert!(RenderBridge::with_layout(3, dims, TextureId(0)).is_err());
        assert!(RenderBridge::with_layout(0, dims, TextureId(0)).is_err());
    }
}
