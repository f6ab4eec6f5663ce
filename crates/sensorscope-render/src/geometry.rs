//! GPU geometry containers shared by the display and pick passes.

use wgpu::util::DeviceExt;

/// A vertex carrying only a position. Display appearance and pick colors both
/// come from per-item uniforms, so geometry stays position-only.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
}

/// Per-instance transform for instanced meshes, one mat4 in column vectors.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceTransform {
    /// Column-major model matrix columns.
    pub model: [[f32; 4]; 4],
}

/// How the geometry's vertex stream is laid out and billboarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// Triangle mesh with object-space positions.
    Mesh,
    /// Camera-facing quad; vertices are 2D corner offsets.
    SpriteQuad,
}

/// GPU geometry: vertex data plus optional index and instance buffers.
#[derive(Debug)]
pub struct Geometry {
    vertex_buffer: wgpu::Buffer,
    vertex_count: u32,
    index: Option<(wgpu::Buffer, u32)>,
    instances: Option<(wgpu::Buffer, u32)>,
    kind: GeometryKind,
}

impl Geometry {
    /// Creates an indexed triangle mesh.
    #[must_use]
    pub fn mesh(device: &wgpu::Device, positions: &[Vertex], indices: &[u32]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh vertices"),
            contents: bytemuck::cast_slice(positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            vertex_count: positions.len() as u32,
            index: Some((index_buffer, indices.len() as u32)),
            instances: None,
            kind: GeometryKind::Mesh,
        }
    }

    /// Creates an indexed triangle mesh drawn once per instance transform.
    #[must_use]
    pub fn mesh_instanced(
        device: &wgpu::Device,
        positions: &[Vertex],
        indices: &[u32],
        transforms: &[InstanceTransform],
    ) -> Self {
        let mut geometry = Self::mesh(device, positions, indices);
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh instances"),
            contents: bytemuck::cast_slice(transforms),
            usage: wgpu::BufferUsages::VERTEX,
        });
        geometry.instances = Some((instance_buffer, transforms.len() as u32));
        geometry
    }

    /// Creates a unit sprite quad. Corner offsets span `[-0.5, 0.5]` and are
    /// billboarded in the vertex stage.
    #[must_use]
    pub fn sprite_quad(device: &wgpu::Device) -> Self {
        let corners: [[f32; 2]; 4] = [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]];
        let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sprite corners"),
            contents: bytemuck::cast_slice(&corners),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sprite indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            vertex_count: 4,
            index: Some((index_buffer, 6)),
            instances: None,
            kind: GeometryKind::SpriteQuad,
        }
    }

    /// The geometry kind.
    #[must_use]
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Whether the geometry carries per-instance transforms.
    #[must_use]
    pub fn is_instanced(&self) -> bool {
        self.instances.is_some()
    }

    /// Records the draw call for this geometry on an active render pass. The
    /// pipeline and bind groups must already be set.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        let instance_range = match &self.instances {
            Some((buffer, count)) => {
                pass.set_vertex_buffer(1, buffer.slice(..));
                0..*count
            }
            None => 0..1,
        };
        match &self.index {
            Some((buffer, count)) => {
                pass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..*count, 0, instance_range);
            }
            None => pass.draw(0..self.vertex_count, instance_range),
        }
    }

    /// Vertex buffer layout for mesh positions.
    #[must_use]
    pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            }],
        }
    }

    /// Vertex buffer layout for sprite corner offsets.
    #[must_use]
    pub fn sprite_corner_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: (std::mem::size_of::<f32>() * 2) as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        }
    }

    /// Instance buffer layout: a mat4 split across four vec4 attributes.
    #[must_use]
    pub fn instance_layout() -> wgpu::VertexBufferLayout<'static> {
        const COLUMN: u64 = (std::mem::size_of::<f32>() * 4) as u64;
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceTransform>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: 0,
                    shader_location: 4,
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: COLUMN,
                    shader_location: 5,
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: 2 * COLUMN,
                    shader_location: 6,
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: 3 * COLUMN,
                    shader_location: 7,
                },
            ],
        }
    }
}
