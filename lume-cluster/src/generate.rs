//! Per-instance visibility and LOD selection, emitting one indirect task
//! dispatch per surviving instance.
//!
//! Both passes run the same kernel; `CullPass` selects between them. The
//! prepass only considers instances that were visible last frame and tests
//! them against last frame's HZB. The final pass re-tests every instance
//! against the HZB built from this frame's prepass, records the result for
//! the next frame and draws whatever the prepass missed.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::cull::{select_lod, sphere_in_frustum, sphere_occluded, transform_sphere};
use crate::draw::{DrawState, DrawStream};
use crate::hzb::Hzb;
use crate::{DrawCommand, Mesh, PerFrameData, TASK_GROUP_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullPass {
    Prepass,
    Final,
}

#[derive(Default)]
pub struct GenerateStats {
    pub tested: AtomicU32,
    pub frustum_culled: AtomicU32,
    pub occlusion_culled: AtomicU32,
    pub emitted: AtomicU32,
    pub dropped: AtomicU32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerateSummary {
    pub tested: u32,
    pub frustum_culled: u32,
    pub occlusion_culled: u32,
    pub emitted: u32,
    /// Commands lost because the stream was full.
    pub dropped: u32,
}

impl GenerateStats {
    pub fn summary(&self) -> GenerateSummary {
        GenerateSummary {
            tested: self.tested.load(Ordering::Relaxed),
            frustum_culled: self.frustum_culled.load(Ordering::Relaxed),
            occlusion_culled: self.occlusion_culled.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct DrawGenerator<'a> {
    pub frame: &'a PerFrameData,
    pub meshes: &'a [Mesh],
    pub state: &'a DrawState,
    pub hzb: &'a Hzb,
}

impl DrawGenerator<'_> {
    /// Runs one pass over every instance. `stream` must have been reset.
    pub fn run(&self, pass: CullPass, stream: &DrawStream) -> GenerateSummary {
        let stats = GenerateStats::default();
        (0..self.state.instances.len()).into_par_iter().for_each(|i| self.process(i, pass, stream, &stats));
        stats.summary()
    }

    fn process(&self, index: usize, pass: CullPass, stream: &DrawStream, stats: &GenerateStats) {
        let frame = self.frame;
        let visibility = &self.state.instance_visibility;
        let was_visible = visibility.get(index);

        if pass == CullPass::Prepass && !was_visible {
            return;
        }

        let draw = &self.state.instances[index];
        let Some(mesh) = self.meshes.get(draw.mesh_index as usize) else {
            return;
        };
        if mesh.lod_count == 0 {
            return;
        }
        stats.tested.fetch_add(1, Ordering::Relaxed);

        let (center, radius) = transform_sphere(&draw.model, mesh.center.into(), mesh.radius);

        let mut visible = true;
        if frame.enable_mesh_frustum_culling != 0 && !sphere_in_frustum(frame.frustum_planes(), center, radius) {
            stats.frustum_culled.fetch_add(1, Ordering::Relaxed);
            visible = false;
        }

        let view_center = frame.freeze_view.transform_point3(center);
        if visible && frame.enable_mesh_occlusion_culling != 0 && sphere_occluded(self.hzb, frame, view_center, radius) {
            stats.occlusion_culled.fetch_add(1, Ordering::Relaxed);
            visible = false;
        }

        let emit = match pass {
            CullPass::Prepass => {
                if !visible {
                    visibility.set(index, false);
                }
                visible
            }
            CullPass::Final => {
                visibility.set(index, visible);
                // 预处理阶段已经画过的实例，只有开启簇遮挡剔除时才需要再发一次，
                // 用来补画新露出来的簇
                visible && (!was_visible || frame.enable_cluster_occlusion_culling != 0)
            }
        };
        if !emit {
            return;
        }

        let lod_index = select_lod(frame, view_center, radius, mesh.lod_count);
        let lod = &mesh.lods[lod_index as usize];
        let command = DrawCommand {
            task_x: lod.cluster_count.div_ceil(TASK_GROUP_SIZE),
            task_y: 1,
            task_z: 1,
            draw_index: index as u32,
            lod_index,
            mesh_visibility: was_visible as u32,
        };
        if stream.push(command).is_some() {
            stats.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
