//! Mesh data structures and upload

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::Owned;

/// Interleaved vertex as the geometry passes consume it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// xyz = tangent, w = bitangent sign
    pub tangent: [f32; 4],
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub const DEFAULT_NORMAL: [f32; 3] = [0.0, 0.0, 1.0];
    pub const DEFAULT_TANGENT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    pub const DEFAULT_COLOR: [f32; 4] = [1.0; 4];

    /// Vertex buffer layout shared by every geometry pipeline.
    pub fn layout() -> VertexBufferLayout {
        let attributes = [
            (0, VertexFormat::Float32x3, 0),
            (1, VertexFormat::Float32x3, 12),
            (2, VertexFormat::Float32x4, 24),
            (3, VertexFormat::Float32x2, 40),
            (4, VertexFormat::Float32x2, 48),
            (5, VertexFormat::Float32x4, 56),
        ];
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: attributes
                .into_iter()
                .map(|(location, format, offset)| VertexAttribute {
                    location,
                    format,
                    offset,
                })
                .collect(),
        }
    }
}

/// Separate attribute arrays of a mesh. Only positions are required.
///
/// Without `indices` the positions are drawn in order as a triangle list.
#[derive(Debug, Clone, Default)]
pub struct MeshDesc {
    pub label: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 4]>>,
    pub uv0: Option<Vec<[f32; 2]>>,
    pub uv1: Option<Vec<[f32; 2]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    /// Triangle list of the full-detail mesh. Empty for a non-indexed mesh.
    pub indices: Vec<u32>,
    /// Additional triangle lists, each coarser than the previous one. Only
    /// indexed meshes have them.
    pub lods: Vec<Vec<u32>>,
}

impl MeshDesc {
    /// Check that every attribute and index list is consistent.
    pub fn validate(&self) -> RenderResult<()> {
        let invalid =
            |message: String| RenderError::resource("mesh", format!("'{}' {message}", self.label));
        let count = self.positions.len();
        if count == 0 {
            return Err(invalid("has no positions".into()));
        }

        let attributes = [
            ("normals", self.normals.as_ref().map(Vec::len)),
            ("tangents", self.tangents.as_ref().map(Vec::len)),
            ("uv0", self.uv0.as_ref().map(Vec::len)),
            ("uv1", self.uv1.as_ref().map(Vec::len)),
            ("colors", self.colors.as_ref().map(Vec::len)),
        ];
        for (name, len) in attributes {
            if let Some(len) = len {
                if len != count {
                    return Err(invalid(format!("has {len} {name} for {count} positions")));
                }
            }
        }

        if self.indices.is_empty() {
            if count % 3 != 0 {
                return Err(invalid(format!("has {count} unindexed vertices, not a triangle list")));
            }
            if !self.lods.is_empty() {
                return Err(invalid("has LODs but no indices".into()));
            }
            return Ok(());
        }

        for (level, indices) in std::iter::once(&self.indices).chain(&self.lods).enumerate() {
            if indices.is_empty() || indices.len() % 3 != 0 {
                return Err(invalid(format!(
                    "LOD {level} has {} indices, not a triangle list",
                    indices.len()
                )));
            }
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= count) {
                return Err(invalid(format!(
                    "LOD {level} references vertex {index} of {count}"
                )));
            }
        }
        Ok(())
    }

    /// Interleave the attribute arrays, filling missing ones with defaults.
    pub fn interleave(&self) -> Vec<Vertex> {
        (0..self.positions.len())
            .map(|i| Vertex {
                position: self.positions[i],
                normal: self
                    .normals
                    .as_ref()
                    .map_or(Vertex::DEFAULT_NORMAL, |n| n[i]),
                tangent: self
                    .tangents
                    .as_ref()
                    .map_or(Vertex::DEFAULT_TANGENT, |t| t[i]),
                uv0: self.uv0.as_ref().map_or([0.0; 2], |uv| uv[i]),
                uv1: self.uv1.as_ref().map_or([0.0; 2], |uv| uv[i]),
                color: self.colors.as_ref().map_or(Vertex::DEFAULT_COLOR, |c| c[i]),
            })
            .collect()
    }

    /// A unit cube centered at the origin
    pub fn cube() -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // normal, u axis, v axis
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let corners = [
            (-0.5, -0.5, [0.0, 1.0]),
            (0.5, -0.5, [1.0, 1.0]),
            (0.5, 0.5, [1.0, 0.0]),
            (-0.5, 0.5, [0.0, 0.0]),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut tangents = Vec::with_capacity(24);
        let mut uv0 = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (face, (n, u, v)) in faces.iter().enumerate() {
            for (su, sv, uv) in corners {
                positions.push([
                    n[0] * 0.5 + u[0] * su + v[0] * sv,
                    n[1] * 0.5 + u[1] * su + v[1] * sv,
                    n[2] * 0.5 + u[2] * su + v[2] * sv,
                ]);
                normals.push(*n);
                tangents.push([u[0], u[1], u[2], 1.0]);
                uv0.push(uv);
            }
            // Two triangles per face
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        MeshDesc {
            label: "cube".into(),
            positions,
            normals: Some(normals),
            tangents: Some(tangents),
            uv0: Some(uv0),
            indices,
            ..Default::default()
        }
    }

    /// A square on the XZ plane facing +Y, with a two-triangle LOD.
    pub fn plane(size: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let half = size / 2.0;
        let step = size / subdivisions as f32;
        let row = subdivisions + 1;

        let mut desc = MeshDesc {
            label: "plane".into(),
            ..Default::default()
        };
        let mut uv0 = Vec::new();
        for z in 0..row {
            for x in 0..row {
                desc.positions
                    .push([-half + x as f32 * step, 0.0, -half + z as f32 * step]);
                uv0.push([
                    x as f32 / subdivisions as f32,
                    z as f32 / subdivisions as f32,
                ]);
            }
        }
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * row + x;
                let next = current + row;
                desc.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }
        let last = row * row - 1;
        if subdivisions > 1 {
            desc.lods
                .push(vec![0, row * subdivisions, subdivisions, subdivisions, row * subdivisions, last]);
        }
        desc.normals = Some(vec![[0.0, 1.0, 0.0]; desc.positions.len()]);
        desc.uv0 = Some(uv0);
        desc
    }
}

/// Element range of one level of detail: indices of an indexed mesh,
/// vertices otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshLod {
    pub first: u32,
    pub count: u32,
}

/// Buffers and range of one draw, detached from the owning [`Mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawGeometry {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub lod: MeshLod,
}

impl DrawGeometry {
    /// Bind the buffers and issue one draw, indexed when the mesh has
    /// indices.
    pub fn record<D: RenderDevice>(&self, device: &mut D) {
        let range = self.lod.first..self.lod.first + self.lod.count;
        device.set_vertex_buffer(0, self.vertex_buffer, 0);
        match self.index_buffer {
            Some(index_buffer) => {
                device.set_index_buffer(index_buffer, 0, IndexFormat::Uint32);
                device.draw_indexed(range, 0, 0..1);
            }
            None => device.draw(range, 0..1),
        }
    }
}

/// Uploaded mesh with every LOD packed into one index buffer.
///
/// A non-indexed mesh has no index buffer and a single LOD over all of its
/// vertices.
#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: Owned<BufferHandle>,
    index_buffer: Option<Owned<BufferHandle>>,
    lods: Vec<MeshLod>,
    vertex_count: u32,
}

impl Mesh {
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    /// Range of `level`, clamped to the coarsest level.
    pub fn lod(&self, level: usize) -> MeshLod {
        self.lods[level.min(self.lods.len() - 1)]
    }

    pub fn coarsest_lod(&self) -> MeshLod {
        self.lod(self.lods.len() - 1)
    }

    pub fn geometry(&self, lod: MeshLod) -> DrawGeometry {
        DrawGeometry {
            vertex_buffer: self.vertex_buffer.handle(),
            index_buffer: self.index_buffer.as_ref().map(Owned::handle),
            lod,
        }
    }
}

impl<D: RenderDevice> GpuContext<D> {
    /// Validate, interleave and upload a mesh.
    pub fn make_mesh(&mut self, desc: &MeshDesc) -> RenderResult<Mesh> {
        desc.validate()?;
        let vertices = desc.interleave();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);

        let vertex_buffer = self.device_mut().create_buffer(&BufferDescriptor {
            label: Some(format!("{} vertices", desc.label)),
            size: vertex_bytes.len() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::MAP_WRITE,
        })?;
        let vertex_buffer = self.own(vertex_buffer);
        self.device_mut()
            .write_buffer(vertex_buffer.handle(), 0, vertex_bytes)?;

        if desc.indices.is_empty() {
            return Ok(Mesh {
                vertex_buffer,
                index_buffer: None,
                lods: vec![MeshLod {
                    first: 0,
                    count: vertices.len() as u32,
                }],
                vertex_count: vertices.len() as u32,
            });
        }

        let mut indices = Vec::new();
        let mut lods = Vec::with_capacity(desc.lods.len() + 1);
        for level in std::iter::once(&desc.indices).chain(&desc.lods) {
            lods.push(MeshLod {
                first: indices.len() as u32,
                count: level.len() as u32,
            });
            indices.extend_from_slice(level);
        }
        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);

        let index_buffer = self.device_mut().create_buffer(&BufferDescriptor {
            label: Some(format!("{} indices", desc.label)),
            size: index_bytes.len() as u64,
            usage: BufferUsage::INDEX | BufferUsage::MAP_WRITE,
        })?;
        let index_buffer = self.own(index_buffer);
        self.device_mut()
            .write_buffer(index_buffer.handle(), 0, index_bytes)?;

        Ok(Mesh {
            vertex_buffer,
            index_buffer: Some(index_buffer),
            lods,
            vertex_count: vertices.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_vertex_is_72_bytes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 72);
        let layout = Vertex::layout();
        let last = layout.attributes.last().unwrap();
        assert_eq!(last.offset + last.format.size(), layout.array_stride);
    }

    #[test]
    fn test_cube_is_valid() {
        let cube = MeshDesc::cube();
        assert!(cube.validate().is_ok());
        assert_eq!(cube.positions.len(), 24);
        assert_eq!(cube.indices.len(), 36);
    }

    #[test]
    fn test_missing_attributes_get_defaults() {
        let desc = MeshDesc {
            label: "triangle".into(),
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        let vertices = desc.interleave();
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[1].normal, Vertex::DEFAULT_NORMAL);
        assert_eq!(vertices[1].tangent, Vertex::DEFAULT_TANGENT);
        assert_eq!(vertices[1].color, Vertex::DEFAULT_COLOR);
    }

    #[test]
    fn test_rejects_inconsistent_descriptions() {
        let mut desc = MeshDesc {
            label: "broken".into(),
            positions: vec![[0.0; 3]; 3],
            normals: Some(vec![[0.0; 3]; 2]),
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        assert!(desc.validate().is_err());

        desc.normals = None;
        desc.indices = vec![0, 1, 3];
        assert!(desc.validate().is_err());

        desc.indices = vec![0, 1];
        assert!(desc.validate().is_err());

        desc.indices = vec![0, 1, 2];
        desc.lods = vec![vec![]];
        assert!(desc.validate().is_err());

        // Unindexed positions must form whole triangles, and carry no LODs.
        desc.indices.clear();
        assert!(desc.validate().is_err());
        desc.lods.clear();
        assert!(desc.validate().is_ok());
        desc.positions.push([0.0; 3]);
        assert!(desc.validate().is_err());

        assert!(MeshDesc::default().validate().is_err());
    }

    #[test]
    fn test_lods_are_packed_in_order() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let desc = MeshDesc::plane(2.0, 4);
        assert_eq!(desc.lods.len(), 1);

        let mesh = ctx.make_mesh(&desc).unwrap();
        assert_eq!(mesh.lod_count(), 2);
        assert!(mesh.is_indexed());
        assert_eq!(mesh.lod(0), MeshLod { first: 0, count: 96 });
        assert_eq!(mesh.coarsest_lod(), MeshLod { first: 96, count: 6 });
        assert_eq!(mesh.lod(7), mesh.coarsest_lod());
        assert_eq!(mesh.vertex_count(), 25);
    }

    #[test]
    fn test_unindexed_mesh_draws_its_vertices() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let desc = MeshDesc {
            label: "triangles".into(),
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].repeat(2),
            ..Default::default()
        };
        let mesh = ctx.make_mesh(&desc).unwrap();

        assert!(!mesh.is_indexed());
        assert_eq!(mesh.lod_count(), 1);
        assert_eq!(mesh.lod(0), MeshLod { first: 0, count: 6 });
        assert_eq!(mesh.coarsest_lod(), mesh.lod(0));
        assert_eq!(mesh.geometry(mesh.lod(0)).index_buffer, None);
    }
}
