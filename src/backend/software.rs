use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use half::f16;
use log::{debug, error};

use crate::backend::{DeviceCapabilities, RenderBackend, TargetPrecision, TextureId};
use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::params::SimulationParams;
use crate::simulation::types::{CHANNELS, FrameUniforms, ProgramBindings, StateKind};

pub type Texel = [f32; 4];

/// Read-only view of one texture as seen by a software program.
#[derive(Debug, Clone, Copy)]
pub struct TexelView<'a> {
    dimensions: TextureDimensions,
    texels: &'a [Texel],
}

impl TexelView<'_> {
    pub fn dimensions(&self) -> TextureDimensions {
        self.dimensions
    }

    /// Nearest fetch; coordinates outside the texture clamp to the edge.
    pub fn fetch(&self, x: u32, y: u32) -> Texel {
        let x = x.min(self.dimensions.width - 1);
        let y = y.min(self.dimensions.height - 1);
        self.texels[(y * self.dimensions.width + x) as usize]
    }

    pub fn item(&self, index: u32) -> Texel {
        let (x, y) = self.dimensions.texel_of(index);
        self.fetch(x, y)
    }
}

/// Inputs for one invocation of a software program.
pub struct Fragment<'a> {
    pub texel: (u32, u32),
    pub index: u32,
    pub positions: TexelView<'a>,
    pub velocities: TexelView<'a>,
    pub frame: &'a FrameUniforms,
    pub params: Option<&'a SimulationParams>,
}

type Shader = Box<dyn Fn(&Fragment<'_>) -> Texel>;

/// A per-pixel program executed on the CPU.
pub struct SoftwareProgram {
    label: String,
    shader: Shader,
    bindings: Option<ProgramBindings>,
}

impl SoftwareProgram {
    pub fn new(label: &str, shader: impl Fn(&Fragment<'_>) -> Texel + 'static) -> Self {
        Self {
            label: label.to_owned(),
            shader: Box::new(shader),
            bindings: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// What a single draw read from and wrote to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub program: String,
    pub target: TextureId,
    pub positions: TextureId,
    pub velocities: TextureId,
}

struct SoftwareTexture {
    label: String,
    dimensions: TextureDimensions,
    // None for uploaded state textures, which cannot be drawn into.
    precision: Option<TargetPrecision>,
    texels: Vec<Texel>,
}

struct SoftwareDevice {
    capabilities: DeviceCapabilities,
    textures: HashMap<TextureId, SoftwareTexture>,
    next_id: u32,
    current_target: Option<TextureId>,
    passes: Vec<PassRecord>,
    fail_next_draw: bool,
}

/// CPU implementation of the rendering context.
///
/// Clones share the same device, so a test can keep a handle for
/// inspection while the engine owns another.
#[derive(Clone)]
pub struct SoftwareBackend {
    inner: Rc<RefCell<SoftwareDevice>>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities {
            float32_targets: true,
            float16_targets: true,
            max_texture_dimension: 8192,
        })
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SoftwareDevice {
                capabilities,
                textures: HashMap::new(),
                next_id: 0,
                current_target: None,
                passes: Vec::new(),
                fail_next_draw: false,
            })),
        }
    }

    /// Textures currently allocated.
    pub fn live_textures(&self) -> usize {
        self.inner.borrow().textures.len()
    }

    /// Textures ever allocated, including released ones.
    pub fn textures_created(&self) -> u32 {
        self.inner.borrow().next_id
    }

    pub fn passes(&self) -> Vec<PassRecord> {
        self.inner.borrow().passes.clone()
    }

    pub fn current_render_target(&self) -> Option<TextureId> {
        self.inner.borrow().current_target
    }

    pub fn precision_of(&self, texture: TextureId) -> Option<TargetPrecision> {
        self.inner.borrow().textures.get(&texture).and_then(|t| t.precision)
    }

    pub fn label_of(&self, texture: TextureId) -> Option<String> {
        self.inner.borrow().textures.get(&texture).map(|t| t.label.clone())
    }

    /// Makes the next draw fail the way a lost context would.
    pub fn fail_next_draw(&self) {
        self.inner.borrow_mut().fail_next_draw = true;
    }
}

impl SoftwareDevice {
    fn insert(&mut self, texture: SoftwareTexture) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        id
    }

    fn check_size(&self, dimensions: TextureDimensions) -> Result<()> {
        let max = self.capabilities.max_texture_dimension;
        if dimensions.width > max || dimensions.height > max {
            return Err(SimError::InvalidArgument(format!(
                "{}x{} exceeds the device limit of {max}",
                dimensions.width, dimensions.height
            )));
        }
        Ok(())
    }

    fn view(&self, texture: TextureId) -> Result<TexelView<'_>> {
        let entry = self
            .textures
            .get(&texture)
            .ok_or_else(|| SimError::RenderFault(format!("{texture:?} is not a live texture")))?;
        Ok(TexelView {
            dimensions: entry.dimensions,
            texels: &entry.texels,
        })
    }
}

impl RenderBackend for SoftwareBackend {
    type Program = SoftwareProgram;

    fn capabilities(&self) -> DeviceCapabilities {
        self.inner.borrow().capabilities
    }

    fn create_state_texture(&mut self, label: &str, dimensions: TextureDimensions, texels: &[f32]) -> Result<TextureId> {
        if texels.len() != dimensions.pixel_count() * CHANNELS {
            return Err(SimError::InvalidArgument(format!(
                "{label}: expected {} floats, got {}",
                dimensions.pixel_count() * CHANNELS,
                texels.len()
            )));
        }
        let mut device = self.inner.borrow_mut();
        device.check_size(dimensions)?;
        let texels = texels
            .chunks_exact(CHANNELS)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        Ok(device.insert(SoftwareTexture {
            label: label.to_owned(),
            dimensions,
            precision: None,
            texels,
        }))
    }

    fn create_render_target(
        &mut self,
        label: &str,
        dimensions: TextureDimensions,
        precision: TargetPrecision,
    ) -> Result<TextureId> {
        let mut device = self.inner.borrow_mut();
        device.check_size(dimensions)?;
        let supported = match precision {
            TargetPrecision::Full => device.capabilities.float32_targets,
            TargetPrecision::Half => device.capabilities.float16_targets,
        };
        if !supported {
            return Err(SimError::UnsupportedDevice(format!("{precision:?} targets are not renderable")));
        }
        Ok(device.insert(SoftwareTexture {
            label: label.to_owned(),
            dimensions,
            precision: Some(precision),
            texels: vec![[0.0; 4]; dimensions.pixel_count()],
        }))
    }

    fn create_seed_program(&mut self, source: StateKind) -> Result<SoftwareProgram> {
        let label = format!("Seed {}", source.label());
        Ok(SoftwareProgram::new(&label, move |fragment| {
            let view = match source {
                StateKind::Position => fragment.positions,
                StateKind::Velocity => fragment.velocities,
            };
            view.fetch(fragment.texel.0, fragment.texel.1)
        }))
    }

    fn bind_program(&mut self, program: &mut SoftwareProgram, bindings: &ProgramBindings) -> Result<()> {
        let device = self.inner.borrow();
        device.view(bindings.positions)?;
        device.view(bindings.velocities)?;
        program.bindings = Some(*bindings);
        Ok(())
    }

    fn set_render_target(&mut self, target: Option<TextureId>) {
        self.inner.borrow_mut().current_target = target;
    }

    fn draw_fullscreen_quad(&mut self, program: &SoftwareProgram) -> Result<()> {
        let mut device = self.inner.borrow_mut();

        if std::mem::take(&mut device.fail_next_draw) {
            error!("{}: injected context loss", program.label);
            return Err(SimError::RenderFault("rendering context lost".into()));
        }

        let target = device
            .current_target
            .ok_or_else(|| SimError::RenderFault("no render target set".into()))?;
        let bindings = program
            .bindings
            .ok_or_else(|| SimError::RenderFault(format!("{} drawn before binding", program.label)))?;
        if bindings.reads(target) {
            return Err(SimError::RenderFault(format!(
                "{} reads from its own render target {target:?}",
                program.label
            )));
        }

        let (dimensions, precision) = match device.textures.get(&target) {
            Some(SoftwareTexture {
                dimensions,
                precision: Some(precision),
                ..
            }) => (*dimensions, *precision),
            _ => return Err(SimError::RenderFault(format!("{target:?} is not a render target"))),
        };

        let output: Vec<Texel> = {
            let positions = device.view(bindings.positions)?;
            let velocities = device.view(bindings.velocities)?;
            let mut output = Vec::with_capacity(dimensions.pixel_count());
            for y in 0..dimensions.height {
                for x in 0..dimensions.width {
                    let fragment = Fragment {
                        texel: (x, y),
                        index: y * dimensions.width + x,
                        positions,
                        velocities,
                        frame: &bindings.frame,
                        params: bindings.params.as_ref(),
                    };
                    output.push(store(precision, (program.shader)(&fragment)));
                }
            }
            output
        };

        if let Some(entry) = device.textures.get_mut(&target) {
            entry.texels = output;
        }
        device.passes.push(PassRecord {
            program: program.label.clone(),
            target,
            positions: bindings.positions,
            velocities: bindings.velocities,
        });
        debug!("{} -> {target:?} ({}x{})", program.label, dimensions.width, dimensions.height);
        Ok(())
    }

    fn read_texels(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        let device = self.inner.borrow();
        Ok(device.view(texture)?.texels.to_vec())
    }

    fn release_texture(&mut self, texture: TextureId) {
        let mut device = self.inner.borrow_mut();
        if device.current_target == Some(texture) {
            device.current_target = None;
        }
        device.textures.remove(&texture);
    }
}

fn store(precision: TargetPrecision, texel: Texel) -> Texel {
    match precision {
        TargetPrecision::Full => texel,
        TargetPrecision::Half => texel.map(|c| f16::from_f32(c).to_f32()),
    }
}
