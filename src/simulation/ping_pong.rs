use log::debug;

use crate::backend::{RenderBackend, TargetPrecision, TextureId};
use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::types::ProgramBindings;

/// Two equally sized render targets written alternately.
///
/// Each [`pass`](PingPongBuffer::pass) draws into the back target, flips the
/// roles and returns the target just written. Callers only ever hold the
/// returned handle for reading; the targets themselves belong to the buffer.
#[derive(Debug)]
pub struct PingPongBuffer {
    label: String,
    dimensions: TextureDimensions,
    precision: TargetPrecision,
    targets: [TextureId; 2],
    write_index: usize,
    passes: u64,
}

impl PingPongBuffer {
    pub fn new<B: RenderBackend>(
        backend: &mut B,
        label: &str,
        dimensions: TextureDimensions,
        precision: TargetPrecision,
    ) -> Result<Self> {
        let first = backend.create_render_target(&format!("{label} Target 0"), dimensions, precision)?;
        let second = match backend.create_render_target(&format!("{label} Target 1"), dimensions, precision) {
            Ok(second) => second,
            Err(err) => {
                backend.release_texture(first);
                return Err(err);
            }
        };

        debug!(
            "{label}: ping-pong targets {first:?}/{second:?} at {}x{} ({precision:?})",
            dimensions.width, dimensions.height
        );
        Ok(Self {
            label: label.to_owned(),
            dimensions,
            precision,
            targets: [first, second],
            write_index: 0,
            passes: 0,
        })
    }

    /// Runs `program` once over the back target and returns that target.
    ///
    /// The render target is redirected for the draw and always reset to the
    /// default afterwards. On failure the roles are not flipped.
    pub fn pass<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        program: &mut B::Program,
        bindings: &ProgramBindings,
    ) -> Result<TextureId> {
        let target = self.targets[self.write_index];
        if bindings.reads(target) {
            return Err(SimError::InvalidArgument(format!(
                "{}: pass would read from its own write target {target:?}",
                self.label
            )));
        }

        backend.bind_program(program, bindings)?;
        backend.set_render_target(Some(target));
        let drawn = backend.draw_fullscreen_quad(program);
        backend.set_render_target(None);
        drawn?;

        self.write_index = 1 - self.write_index;
        self.passes += 1;
        Ok(self.targets[1 - self.write_index])
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// The most recently written target, if any pass has run.
    pub fn front(&self) -> Option<TextureId> {
        (self.passes > 0).then(|| self.targets[1 - self.write_index])
    }

    /// The target the next pass will write.
    pub fn back(&self) -> TextureId {
        self.targets[self.write_index]
    }

    pub fn targets(&self) -> [TextureId; 2] {
        self.targets
    }

    pub fn dimensions(&self) -> TextureDimensions {
        self.dimensions
    }

    pub fn precision(&self) -> TargetPrecision {
        self.precision
    }

    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    pub fn release<B: RenderBackend>(self, backend: &mut B) {
        for target in self.targets {
            backend.release_texture(target);
        }
    }
}
