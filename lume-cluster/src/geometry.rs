use anyhow::{Result, bail, ensure};
use bytemuck::Zeroable;
use lume_core::{Buffer, BufferDescriptor, BufferUsage, Device, LumeResult};
use serde::{Deserialize, Serialize};

use crate::{Cluster, MAX_MESH_LODS, MAX_TRIANGLES_PER_CLUSTER, MAX_VERTICES_PER_CLUSTER, Mesh, MeshLod, Vertex};

/// One baked mesh. Every offset in here is relative to this mesh's own
/// arrays; [`Geometry::append`] rebases them when the mesh joins the scene.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BakedMesh {
    pub vertex_count: u32,
    pub center: [f32; 3],
    pub radius: f32,
    pub lod_count: u32,
    pub vertices: Vec<Vertex>,
    pub lods: Vec<MeshLod>,
    pub clusters: Vec<Cluster>,
    pub indices: Vec<u32>,
    pub cluster_vertices: Vec<u32>,
    pub cluster_triangles: Vec<u8>,
}

impl BakedMesh {
    /// Checks counts and every range. A cache file that fails this is corrupt.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.vertex_count as usize == self.vertices.len(), "vertex count {} does not match {} vertices", self.vertex_count, self.vertices.len());
        ensure!(self.lod_count as usize == self.lods.len(), "lod count {} does not match {} lods", self.lod_count, self.lods.len());
        ensure!((1..=MAX_MESH_LODS).contains(&self.lods.len()), "mesh has {} lods", self.lods.len());
        ensure!(self.radius.is_finite() && self.radius >= 0.0, "invalid bounding radius {}", self.radius);

        if let Some(&bad) = self.indices.iter().find(|&&i| i >= self.vertex_count) {
            bail!("index {} out of range for {} vertices", bad, self.vertex_count);
        }

        // LOD 与簇的区间必须首尾相接，覆盖整个数组
        let (mut next_index, mut next_cluster) = (0u64, 0u64);
        for (level, lod) in self.lods.iter().enumerate() {
            ensure!(lod.index_count % 3 == 0 && lod.index_count > 0, "lod {} has {} indices", level, lod.index_count);
            ensure!(lod.cluster_count > 0, "lod {} has no clusters", level);
            ensure!(lod.first_index as u64 == next_index, "lod {} starts at index {}, expected {}", level, lod.first_index, next_index);
            ensure!(
                lod.cluster_offset as u64 == next_cluster,
                "lod {} starts at cluster {}, expected {}",
                level,
                lod.cluster_offset,
                next_cluster
            );
            next_index += lod.index_count as u64;
            next_cluster += lod.cluster_count as u64;
        }
        ensure!(next_index == self.indices.len() as u64, "lods cover {} of {} indices", next_index, self.indices.len());
        ensure!(next_cluster == self.clusters.len() as u64, "lods cover {} of {} clusters", next_cluster, self.clusters.len());

        let mut referenced = vec![false; self.vertex_count as usize];
        for &i in &self.indices[..self.lods[0].index_count as usize] {
            referenced[i as usize] = true;
        }
        if let Some(unused) = referenced.iter().position(|&r| !r) {
            bail!("vertex {} is not referenced by lod 0", unused);
        }

        let (mut next_vertex, mut next_triangle) = (0u64, 0u64);
        for (i, c) in self.clusters.iter().enumerate() {
            ensure!(c.vertex_count as usize <= MAX_VERTICES_PER_CLUSTER, "cluster {} has {} vertices", i, c.vertex_count);
            ensure!(
                (1..=MAX_TRIANGLES_PER_CLUSTER).contains(&(c.triangle_count as usize)),
                "cluster {} has {} triangles",
                i,
                c.triangle_count
            );
            ensure!(c.vertex_offset as u64 == next_vertex, "cluster {} vertex offset {}, expected {}", i, c.vertex_offset, next_vertex);
            ensure!(
                c.triangle_offset as u64 == next_triangle,
                "cluster {} triangle offset {}, expected {}",
                i,
                c.triangle_offset,
                next_triangle
            );
            let v_end = next_vertex + c.vertex_count as u64;
            let t_end = next_triangle + c.triangle_count as u64 * 3;
            ensure!(v_end <= self.cluster_vertices.len() as u64, "cluster {} vertex range out of bounds", i);
            ensure!(t_end <= self.cluster_triangles.len() as u64, "cluster {} triangle range out of bounds", i);

            let local = &self.cluster_triangles[next_triangle as usize..t_end as usize];
            ensure!(local.iter().all(|&t| (t as u32) < c.vertex_count), "cluster {} references a vertex it does not own", i);
            let verts = &self.cluster_vertices[next_vertex as usize..v_end as usize];
            ensure!(verts.iter().all(|&v| v < self.vertex_count), "cluster {} vertex out of mesh range", i);

            next_vertex = v_end;
            next_triangle = t_end.next_multiple_of(4);
        }
        ensure!(next_vertex == self.cluster_vertices.len() as u64, "clusters cover {} of {} cluster vertices", next_vertex, self.cluster_vertices.len());
        ensure!(
            next_triangle == self.cluster_triangles.len() as u64,
            "clusters cover {} of {} triangle bytes",
            next_triangle,
            self.cluster_triangles.len()
        );
        Ok(())
    }
}

/// Shared arenas for every mesh in the scene, addressed by integer offsets.
///
/// LOD index lists and cluster vertex lists hold mesh-local vertex numbers;
/// consumers add `Mesh::vertex_offset`.
#[derive(Default)]
pub struct Geometry {
    pub clusters: Vec<Cluster>,
    pub cluster_vertices: Vec<u32>,
    pub cluster_triangles: Vec<u8>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a baked mesh and returns its mesh index.
    pub fn append(&mut self, baked: &BakedMesh) -> u32 {
        let vertex_offset = self.vertices.len() as u32;
        let index_offset = self.indices.len() as u32;
        let cluster_offset = self.clusters.len() as u32;
        let cluster_vertex_offset = self.cluster_vertices.len() as u32;
        let cluster_triangle_offset = self.cluster_triangles.len() as u32;

        let mut mesh = Mesh::zeroed();
        mesh.vertex_offset = vertex_offset;
        mesh.vertex_count = baked.vertex_count;
        mesh.center = baked.center;
        mesh.radius = baked.radius;
        mesh.lod_count = baked.lods.len().min(MAX_MESH_LODS) as u32;
        for (dst, src) in mesh.lods.iter_mut().zip(&baked.lods) {
            *dst = MeshLod {
                first_index: src.first_index + index_offset,
                index_count: src.index_count,
                cluster_offset: src.cluster_offset + cluster_offset,
                cluster_count: src.cluster_count,
            };
        }

        self.clusters.extend(baked.clusters.iter().map(|c| Cluster {
            vertex_offset: c.vertex_offset + cluster_vertex_offset,
            triangle_offset: c.triangle_offset + cluster_triangle_offset,
            ..*c
        }));
        self.cluster_vertices.extend_from_slice(&baked.cluster_vertices);
        self.cluster_triangles.extend_from_slice(&baked.cluster_triangles);
        self.vertices.extend_from_slice(&baked.vertices);
        self.indices.extend_from_slice(&baked.indices);

        self.meshes.push(mesh);
        (self.meshes.len() - 1) as u32
    }

    pub fn mesh(&self, index: u32) -> Option<&Mesh> {
        self.meshes.get(index as usize)
    }

    /// Byte-packed triangle corners of a cluster, three per triangle.
    pub fn cluster_triangles(&self, cluster: &Cluster) -> &[u8] {
        let start = cluster.triangle_offset as usize;
        &self.cluster_triangles[start..start + cluster.triangle_count as usize * 3]
    }

    pub fn cluster_vertices(&self, cluster: &Cluster) -> &[u32] {
        let start = cluster.vertex_offset as usize;
        &self.cluster_vertices[start..start + cluster.vertex_count as usize]
    }
}

/// Device copies of the geometry arenas, in binding order.
pub struct GeometryBuffers<D: Device> {
    pub clusters: D::Buffer,
    pub cluster_vertices: D::Buffer,
    pub cluster_triangles: D::Buffer,
    pub vertices: D::Buffer,
    pub indices: D::Buffer,
    pub meshes: D::Buffer,
}

impl<D: Device> GeometryBuffers<D> {
    pub fn new(device: &D, geometry: &Geometry) -> LumeResult<Self> {
        Ok(Self {
            clusters: upload_storage(device, bytemuck::cast_slice(&geometry.clusters))?,
            cluster_vertices: upload_storage(device, bytemuck::cast_slice(&geometry.cluster_vertices))?,
            cluster_triangles: upload_storage(device, &geometry.cluster_triangles)?,
            vertices: upload_storage(device, bytemuck::cast_slice(&geometry.vertices))?,
            indices: upload_storage(device, bytemuck::cast_slice(&geometry.indices))?,
            meshes: upload_storage(device, bytemuck::cast_slice(&geometry.meshes))?,
        })
    }
}

/// Creates a storage buffer holding `bytes`. Empty arrays still get a
/// four byte buffer so they can be bound.
pub(crate) fn upload_storage<D: Device>(device: &D, bytes: &[u8]) -> LumeResult<D::Buffer> {
    let size = (bytes.len() as u64).max(4).next_multiple_of(4);
    let buffer = device.create_buffer(BufferDescriptor {
        size,
        usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        mapped_at_creation: false,
    })?;
    buffer.write_data(0, bytes)?;
    Ok(buffer)
}
