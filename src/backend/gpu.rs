use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use bytemuck::Zeroable;
use log::{debug, error, info};
use wgpu::util::DeviceExt;

use crate::backend::{DeviceCapabilities, RenderBackend, TargetPrecision, TextureId};
use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::params::SimulationParams;
use crate::simulation::types::{CHANNELS, FrameUniforms, ProgramBindings, StateKind};

const PRELUDE: &str = include_str!("../shaders/prelude.wgsl");
const PARAMS_PRELUDE: &str = include_str!("../shaders/params.wgsl");

const STATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

fn target_format(precision: TargetPrecision) -> wgpu::TextureFormat {
    match precision {
        TargetPrecision::Full => wgpu::TextureFormat::Rgba32Float,
        TargetPrecision::Half => wgpu::TextureFormat::Rgba16Float,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: TextureDimensions,
    format: wgpu::TextureFormat,
}

/// A simulation program compiled for the full-screen quad.
///
/// The fragment source is appended to the shared prelude and must define
/// `fs_main(in: QuadOutput) -> @location(0) vec4<f32>`.
pub struct WgpuProgram {
    label: String,
    with_params: bool,
    // One pipeline per renderable target format.
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    frame_buffer: wgpu::Buffer,
    params_buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
    bindings: Option<ProgramBindings>,
}

/// wgpu implementation of the rendering context.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: DeviceCapabilities,
    base_layout: wgpu::BindGroupLayout,
    velocity_layout: wgpu::BindGroupLayout,
    textures: HashMap<TextureId, GpuTexture>,
    next_id: u32,
    current_target: Option<TextureId>,
    device_lost: Arc<AtomicBool>,
}

impl WgpuBackend {
    pub fn new(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let renderable = |format| {
            adapter
                .get_texture_format_features(format)
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        };
        let capabilities = DeviceCapabilities {
            float32_targets: renderable(wgpu::TextureFormat::Rgba32Float),
            float16_targets: renderable(wgpu::TextureFormat::Rgba16Float),
            max_texture_dimension: device.limits().max_texture_dimension_2d,
        };
        info!("Render target capabilities: {capabilities:?}");

        let device_lost = Arc::new(AtomicBool::new(false));
        let lost = device_lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!("Device lost ({reason:?}): {message}");
            lost.store(true, Ordering::SeqCst);
        });

        let base_layout = create_state_layout(&device, false);
        let velocity_layout = create_state_layout(&device, true);

        Self {
            device,
            queue,
            capabilities,
            base_layout,
            velocity_layout,
            textures: HashMap::new(),
            next_id: 0,
            current_target: None,
            device_lost,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture_view(&self, texture: TextureId) -> Option<&wgpu::TextureView> {
        self.textures.get(&texture).map(|t| &t.view)
    }

    /// Compiles a program that writes `kind` state.
    ///
    /// Velocity programs additionally see the `params` uniform block.
    pub fn create_program(&self, label: &str, kind: StateKind, fragment_source: &str) -> Result<WgpuProgram> {
        let with_params = kind == StateKind::Velocity;
        let mut source = String::from(PRELUDE);
        if with_params {
            source.push_str(PARAMS_PRELUDE);
        }
        source.push_str(fragment_source);

        let layout = if with_params { &self.velocity_layout } else { &self.base_layout };
        let (pipelines, frame_buffer, params_buffer) = self.scoped(label, || {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });

            let mut pipelines = HashMap::new();
            for precision in [TargetPrecision::Full, TargetPrecision::Half] {
                let renderable = match precision {
                    TargetPrecision::Full => self.capabilities.float32_targets,
                    TargetPrecision::Half => self.capabilities.float16_targets,
                };
                if renderable {
                    let format = target_format(precision);
                    pipelines.insert(format, create_quad_pipeline(&self.device, label, &pipeline_layout, &module, format));
                }
            }

            let frame_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Uniforms"),
                contents: bytemuck::bytes_of(&FrameUniforms::zeroed()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let params_buffer = with_params.then(|| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Simulation Params"),
                    contents: bytemuck::bytes_of(&SimulationParams::default()),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                })
            });
            (pipelines, frame_buffer, params_buffer)
        })?;

        debug!("Compiled program {label} ({} pipelines)", pipelines.len());
        Ok(WgpuProgram {
            label: label.to_owned(),
            with_params,
            pipelines,
            frame_buffer,
            params_buffer,
            bind_group: None,
            bindings: None,
        })
    }

    fn check_device(&self) -> Result<()> {
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(SimError::RenderFault("device lost".into()));
        }
        Ok(())
    }

    // Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, what: &str, f: impl FnOnce() -> T) -> Result<T> {
        self.check_device()?;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            error!("{what}: {err}");
            return Err(SimError::RenderFault(format!("{what}: {err}")));
        }
        self.check_device()?;
        Ok(value)
    }

    fn insert(&mut self, texture: wgpu::Texture, dimensions: TextureDimensions, format: wgpu::TextureFormat) -> TextureId {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                dimensions,
                format,
            },
        );
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

    fn view_of(&self, texture: TextureId) -> Result<&wgpu::TextureView> {
        self.texture_view(texture)
            .ok_or_else(|| SimError::RenderFault(format!("{texture:?} is not a live texture")))
    }
}

impl RenderBackend for WgpuBackend {
    type Program = WgpuProgram;

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_state_texture(&mut self, label: &str, dimensions: TextureDimensions, texels: &[f32]) -> Result<TextureId> {
        if texels.len() != dimensions.pixel_count() * CHANNELS {
            return Err(SimError::InvalidArgument(format!(
                "{label}: expected {} floats, got {}",
                dimensions.pixel_count() * CHANNELS,
                texels.len()
            )));
        }
        self.check_size(dimensions)?;

        let size = extent(dimensions);
        let texture = self.scoped(label, || {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: STATE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(texels),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(dimensions.width * bytes_per_texel(STATE_FORMAT)),
                    rows_per_image: Some(dimensions.height),
                },
                size,
            );
            texture
        })?;

        Ok(self.insert(texture, dimensions, STATE_FORMAT))
    }

    fn create_render_target(
        &mut self,
        label: &str,
        dimensions: TextureDimensions,
        precision: TargetPrecision,
    ) -> Result<TextureId> {
        self.check_size(dimensions)?;
        let format = target_format(precision);
        let texture = self.scoped(label, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(dimensions),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })?;

        Ok(self.insert(texture, dimensions, format))
    }

    fn create_seed_program(&mut self, source: StateKind) -> Result<WgpuProgram> {
        // Seeds never see params, whichever state they copy.
        self.create_program(&format!("Seed {}", source.label()), StateKind::Position, &seed_fragment(source))
    }

    fn bind_program(&mut self, program: &mut WgpuProgram, bindings: &ProgramBindings) -> Result<()> {
        self.check_device()?;
        let positions = self.view_of(bindings.positions)?;
        let velocities = self.view_of(bindings.velocities)?;

        self.queue
            .write_buffer(&program.frame_buffer, 0, bytemuck::bytes_of(&bindings.frame));
        if let (Some(buffer), Some(params)) = (&program.params_buffer, &bindings.params) {
            self.queue.write_buffer(buffer, 0, bytemuck::bytes_of(params));
        }

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(positions),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(velocities),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: program.frame_buffer.as_entire_binding(),
            },
        ];
        if let Some(buffer) = &program.params_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: buffer.as_entire_binding(),
            });
        }

        let layout = if program.with_params { &self.velocity_layout } else { &self.base_layout };
        program.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label.as_str()),
            layout,
            entries: &entries,
        }));
        program.bindings = Some(*bindings);
        Ok(())
    }

    fn set_render_target(&mut self, target: Option<TextureId>) {
        self.current_target = target;
    }

    fn draw_fullscreen_quad(&mut self, program: &WgpuProgram) -> Result<()> {
        let target = self
            .current_target
            .ok_or_else(|| SimError::RenderFault("no render target set".into()))?;
        let (bindings, bind_group) = match (&program.bindings, &program.bind_group) {
            (Some(bindings), Some(bind_group)) => (bindings, bind_group),
            _ => return Err(SimError::RenderFault(format!("{} drawn before binding", program.label))),
        };
        if bindings.reads(target) {
            return Err(SimError::RenderFault(format!(
                "{} reads from its own render target {target:?}",
                program.label
            )));
        }
        let entry = self
            .textures
            .get(&target)
            .ok_or_else(|| SimError::RenderFault(format!("{target:?} is not a live texture")))?;
        let pipeline = program.pipelines.get(&entry.format).ok_or_else(|| {
            SimError::RenderFault(format!("{} has no pipeline for {:?}", program.label, entry.format))
        })?;

        self.scoped(&program.label, || {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(program.label.as_str()),
            });
            {
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(program.label.as_str()),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &entry.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..6, 0..1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        })?;

        debug!(
            "{} -> {target:?} ({}x{})",
            program.label, entry.dimensions.width, entry.dimensions.height
        );
        Ok(())
    }

    fn read_texels(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        self.check_device()?;
        let entry = self
            .textures
            .get(&texture)
            .ok_or_else(|| SimError::RenderFault(format!("{texture:?} is not a live texture")))?;
        let dimensions = entry.dimensions;
        let texel_bytes = bytes_per_texel(entry.format);
        let row_bytes = dimensions.width * texel_bytes;
        let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row_bytes as u64 * dimensions.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(dimensions.height),
                },
            },
            extent(dimensions),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| SimError::RenderFault(format!("readback poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| SimError::RenderFault("readback callback dropped".into()))?
            .map_err(|err| SimError::RenderFault(format!("readback map failed: {err}")))?;

        let mut texels = Vec::with_capacity(dimensions.pixel_count());
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded_row_bytes as usize) {
                let row = &row[..row_bytes as usize];
                match entry.format {
                    wgpu::TextureFormat::Rgba16Float => {
                        for texel in row.chunks_exact(8) {
                            let halves: [half::f16; 4] = bytemuck::pod_read_unaligned(texel);
                            texels.push(halves.map(|h| h.to_f32()));
                        }
                    }
                    _ => {
                        for texel in row.chunks_exact(16) {
                            texels.push(bytemuck::pod_read_unaligned::<[f32; 4]>(texel));
                        }
                    }
                }
            }
        }
        staging.unmap();
        Ok(texels)
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.current_target == Some(texture) {
            self.current_target = None;
        }
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }
}

// Copies one state texture through unchanged.
fn seed_fragment(source: StateKind) -> String {
    let texture = match source {
        StateKind::Position => "positions_tex",
        StateKind::Velocity => "velocities_tex",
    };
    format!(
        "@fragment\nfn fs_main(in: QuadOutput) -> @location(0) vec4<f32> {{\n    return textureLoad({texture}, texel_of(in), 0);\n}}\n"
    )
}

fn extent(dimensions: TextureDimensions) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: dimensions.width,
        height: dimensions.height,
        depth_or_array_layers: 1,
    }
}

fn bytes_per_texel(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::Rgba16Float => 8,
        _ => 16,
    }
}

fn create_state_layout(device: &wgpu::Device, with_params: bool) -> wgpu::BindGroupLayout {
    let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let mut entries = vec![
        // positions
        texture_entry(0),
        // velocities
        texture_entry(1),
        // frame
        uniform_entry(2),
    ];
    if with_params {
        entries.push(uniform_entry(3));
    }

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(if with_params { "Velocity Program Layout" } else { "State Program Layout" }),
        entries: &entries,
    })
}

fn create_quad_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_quad"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                // Float targets are not blendable everywhere; the pass overwrites.
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
