use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod camera;
pub mod cull;
pub mod draw;
pub mod frame;
pub mod generate;
pub mod geometry;
pub mod hzb;
pub mod processor;
pub mod quantize;
pub mod raster;
pub mod settings;
pub mod shaders;

pub use camera::{Camera, FrameCamera};
pub use draw::{DrawState, DrawStream, VisibilityBits};
pub use frame::{FrameOutcome, Renderer};
pub use geometry::{BakedMesh, Geometry};
pub use hzb::{DepthBuffer, Hzb};
pub use processor::load_mesh;
pub use settings::{RendererConfig, Settings};

pub const MAX_VERTICES_PER_CLUSTER: usize = 64;
pub const MAX_TRIANGLES_PER_CLUSTER: usize = 124;
pub const MAX_MESH_LODS: usize = 16;
/// Left, right, bottom, top, near. The projection has no far plane.
pub const FRUSTUM_PLANE_COUNT: usize = 5;
pub const TASK_GROUP_SIZE: u32 = 32;
pub const CLUSTER_CONE_WEIGHT: f32 = 0.7;

// 以下结构体与 shaders/*.wgsl 中的布局一一对应，字段顺序不可调整

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [u16; 3],  // half
    pub normal: [u8; 4],     // unorm8, w 保留
    pub tex_coord: [u16; 2], // half
    pub color: [u16; 3],     // half，调试颜色
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Cluster {
    pub vertex_offset: u32,
    pub triangle_offset: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub center: [f32; 3],
    pub radius: f32,
    pub cone_axis: [i8; 3],
    pub cone_cutoff: i8,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MeshLod {
    pub first_index: u32,
    pub index_count: u32,
    pub cluster_offset: u32,
    pub cluster_count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Mesh {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub center: [f32; 3],
    pub radius: f32,
    pub lod_count: u32,
    pub lods: [MeshLod; MAX_MESH_LODS],
}

impl Mesh {
    pub fn lods(&self) -> &[MeshLod] {
        &self.lods[..(self.lod_count as usize).min(MAX_MESH_LODS)]
    }

    /// Clusters over every LOD; each instance reserves this many visibility bits.
    pub fn total_cluster_count(&self) -> u32 {
        self.lods().iter().map(|lod| lod.cluster_count).sum()
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PerDrawData {
    pub model: Mat4,
    pub mesh_index: u32,
    pub cluster_visibility_offset: u32,
    pub _padding: [u32; 2],
}

/// One indirect task dispatch emitted by draw generation.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    pub task_x: u32,
    pub task_y: u32,
    pub task_z: u32,
    pub draw_index: u32,
    pub lod_index: u32,
    /// Instance visibility at emission time; nonzero means the prepass already drew it.
    pub mesh_visibility: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PerFrameData {
    pub view: Mat4,
    pub freeze_view: Mat4,
    pub projection: Mat4,
    pub freeze_frustum_planes: [Vec4; FRUSTUM_PLANE_COUNT],
    pub camera_position: Vec4,
    pub freeze_camera_position: Vec4,
    pub screen_width: u32,
    pub screen_height: u32,
    pub max_draw_count: u32,
    pub lod_transition_base: f32,
    pub lod_transition_step: f32,
    pub forced_lod: i32,
    pub hzb_size: u32,
    pub enable_mesh_frustum_culling: i32,
    pub enable_mesh_occlusion_culling: i32,
    pub enable_cluster_cone_culling: i32,
    pub enable_cluster_frustum_culling: i32,
    pub enable_cluster_occlusion_culling: i32,
    pub enable_small_triangle_culling: i32,
    pub enable_triangle_backface_culling: i32,
    pub _padding: [u32; 2],
}

impl PerFrameData {
    pub fn z_near(&self) -> f32 {
        self.projection.w_axis.z
    }
}

const _: () = {
    assert!(std::mem::size_of::<Vertex>() == 20);
    assert!(std::mem::size_of::<Cluster>() == 36);
    assert!(std::mem::size_of::<MeshLod>() == 16);
    assert!(std::mem::size_of::<Mesh>() == 284);
    assert!(std::mem::size_of::<PerDrawData>() == 80);
    assert!(std::mem::size_of::<DrawCommand>() == 24);
    assert!(std::mem::size_of::<PerFrameData>() == 368);
};
