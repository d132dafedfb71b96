use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use log::debug;
use wgpu::util::DeviceExt;

use crate::backend::{TextureId, WgpuBackend};
use crate::error::{Result, SimError};
use crate::rendering::bridge::RenderBridge;

// Matches `Camera` in points.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct CameraUniforms {
    view_proj: [f32; 16],
    viewport: [f32; 2],
    point_size: f32,
    _padding: f32,
}

/// Draws the swarm as instanced sprites whose positions are fetched from the
/// bridge's sampled position texture.
pub struct PointsRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    lookup_buffer: wgpu::Buffer,
    camera_buffer: wgpu::Buffer,
    // One bind group per position target; the engine only alternates two.
    bind_groups: HashMap<TextureId, wgpu::BindGroup>,
    instance_count: u32,
    point_size: f32,
}

impl PointsRenderer {
    pub fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat, bridge: &RenderBridge, point_size: f32) -> Self {
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Points Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/points.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Points Bind Group Layout"),
            entries: &[
                // positions
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // camera
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Points Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Points Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
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
        });

        let lookup_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Lookup Coordinates"),
            contents: bytemuck::cast_slice(bridge.lookup_coordinates()),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Points Camera"),
            contents: bytemuck::bytes_of(&CameraUniforms {
                view_proj: Mat4::IDENTITY.to_cols_array(),
                viewport: [1.0, 1.0],
                point_size,
                _padding: 0.0,
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            pipeline,
            bind_group_layout,
            lookup_buffer,
            camera_buffer,
            bind_groups: HashMap::new(),
            instance_count: bridge.item_count(),
            point_size,
        }
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, view_proj: Mat4, viewport: [f32; 2]) {
        let camera = CameraUniforms {
            view_proj: view_proj.to_cols_array(),
            viewport,
            point_size: self.point_size,
            _padding: 0.0,
        };
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera));
    }

    /// Forgets cached bind groups, e.g. after the engine was rebuilt.
    pub fn clear_cache(&mut self) {
        self.bind_groups.clear();
    }

    pub fn draw(&mut self, backend: &WgpuBackend, bridge: &RenderBridge, render_pass: &mut wgpu::RenderPass<'_>) -> Result<()> {
        let texture = bridge.sampled_texture();
        if !self.bind_groups.contains_key(&texture) {
            let view = backend
                .texture_view(texture)
                .ok_or_else(|| SimError::RenderFault(format!("{texture:?} is not a live texture")))?;
            let bind_group = backend.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Points Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.camera_buffer.as_entire_binding(),
                    },
                ],
            });
            debug!("Points bind group created for {texture:?}");
            self.bind_groups.insert(texture, bind_group);
        }

        let Some(bind_group) = self.bind_groups.get(&texture) else {
            return Ok(());
        };
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.lookup_buffer.slice(..));
        render_pass.draw(0..6, 0..self.instance_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use wgpu::naga;

    use super::*;

    #[test]
    fn camera_uniforms_match_the_wgsl_block() {
        let module = naga::front::wgsl::parse_str(include_str!("../shaders/points.wgsl")).unwrap();
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .unwrap();

        let (span, members) = module
            .types
            .iter()
            .find_map(|(_, ty)| match &ty.inner {
                naga::TypeInner::Struct { members, span } if ty.name.as_deref() == Some("Camera") => {
                    Some((*span, members.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(span as usize, size_of::<CameraUniforms>());
        assert_eq!(span, 80);

        let offset = |field: &str| {
            members
                .iter()
                .find(|m| m.name.as_deref() == Some(field))
                .map(|m| m.offset as usize)
                .unwrap()
        };
        assert_eq!(offset("view_proj"), offset_of!(CameraUniforms, view_proj));
        assert_eq!(offset("viewport"), offset_of!(CameraUniforms, viewport));
        assert_eq!(offset("point_size"), offset_of!(CameraUniforms, point_size));
    }
}
