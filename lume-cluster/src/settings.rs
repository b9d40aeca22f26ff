use glam::Vec4;

use crate::camera::FrameCamera;
use crate::{MAX_MESH_LODS, PerFrameData};

/// Fixed renderer configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    /// Capacity of the draw command stream and number of spawned instances.
    pub max_draw_count: u32,
    /// Edge length of the cube instances are spread over.
    pub spawn_cube_size: f32,
    pub frames_in_flight: usize,
    pub lod_transition_base: f32,
    pub lod_transition_step: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 2048,
            height: 1080,
            max_draw_count: 1_000_000,
            spawn_cube_size: 150.0,
            frames_in_flight: 2,
            lod_transition_base: 4.0,
            lod_transition_step: 1.25,
        }
    }
}

impl RendererConfig {
    /// A scene small enough for the host device to render every frame
    /// in reasonable time.
    pub fn headless() -> Self {
        Self {
            width: 512,
            height: 270,
            max_draw_count: 4096,
            spawn_cube_size: 60.0,
            ..Self::default()
        }
    }
}

/// Runtime toggles, mirrored into [`PerFrameData`] every frame.
#[derive(Clone, Debug)]
pub struct Settings {
    pub mesh_frustum_culling: bool,
    pub mesh_occlusion_culling: bool,
    pub cluster_cone_culling: bool,
    pub cluster_frustum_culling: bool,
    pub cluster_occlusion_culling: bool,
    pub small_triangle_culling: bool,
    pub triangle_backface_culling: bool,
    /// Pin every instance to this LOD (clamped per mesh).
    pub forced_lod: Option<u32>,
    /// Keep culling against the camera as it was when this was switched on.
    pub freeze_camera: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mesh_frustum_culling: true,
            mesh_occlusion_culling: true,
            cluster_cone_culling: true,
            cluster_frustum_culling: true,
            cluster_occlusion_culling: true,
            small_triangle_culling: true,
            triangle_backface_culling: true,
            forced_lod: None,
            freeze_camera: false,
        }
    }
}

impl PerFrameData {
    pub fn new(camera: &FrameCamera, settings: &Settings, config: &RendererConfig, extent: (u32, u32), hzb_size: u32) -> Self {
        let forced_lod = match settings.forced_lod {
            Some(level) => level.min(MAX_MESH_LODS as u32 - 1) as i32,
            None => -1,
        };
        Self {
            view: camera.live.view,
            freeze_view: camera.frozen.view,
            projection: camera.projection,
            freeze_frustum_planes: camera.frozen.frustum_planes,
            camera_position: camera.live.position.extend(1.0),
            freeze_camera_position: camera.frozen.position.extend(1.0),
            screen_width: extent.0,
            screen_height: extent.1,
            max_draw_count: config.max_draw_count,
            lod_transition_base: config.lod_transition_base,
            lod_transition_step: config.lod_transition_step,
            forced_lod,
            hzb_size,
            enable_mesh_frustum_culling: settings.mesh_frustum_culling as i32,
            enable_mesh_occlusion_culling: settings.mesh_occlusion_culling as i32,
            enable_cluster_cone_culling: settings.cluster_cone_culling as i32,
            enable_cluster_frustum_culling: settings.cluster_frustum_culling as i32,
            enable_cluster_occlusion_culling: settings.cluster_occlusion_culling as i32,
            enable_small_triangle_culling: settings.small_triangle_culling as i32,
            enable_triangle_backface_culling: settings.triangle_backface_culling as i32,
            _padding: [0; 2],
        }
    }

    pub fn freeze_position(&self) -> glam::Vec3 {
        self.freeze_camera_position.truncate()
    }

    pub fn frustum_planes(&self) -> &[Vec4] {
        &self.freeze_frustum_planes
    }
}
