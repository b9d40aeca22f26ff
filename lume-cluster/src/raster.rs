//! Cluster stage: expands each draw command into its clusters, culls them,
//! and rasterizes the survivors into the depth buffer.
//!
//! Culling uses the frozen camera; triangles are transformed with the live
//! one so a frozen view can be inspected from outside.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use glam::{Mat4, Vec3, Vec4};
use rayon::prelude::*;

use crate::cull::{cone_culled, decode_snorm8, max_scale, sphere_in_frustum, sphere_occluded};
use crate::draw::DrawState;
use crate::generate::CullPass;
use crate::geometry::Geometry;
use crate::hzb::{DepthBuffer, Hzb};
use crate::quantize::dequantize_half;
use crate::{Cluster, DrawCommand, MAX_VERTICES_PER_CLUSTER, PerDrawData, PerFrameData, TASK_GROUP_SIZE};

#[derive(Default)]
struct RasterStats {
    clusters_tested: AtomicU32,
    clusters_culled: AtomicU32,
    clusters_drawn: AtomicU32,
    triangles_drawn: AtomicU64,
}

/// What the cluster stage does with one cluster in the current pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClusterVerdict {
    Draw,
    Cull,
    /// Already in the depth buffer from the prepass.
    AlreadyDrawn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RasterSummary {
    pub clusters_tested: u32,
    pub clusters_culled: u32,
    pub clusters_drawn: u32,
    pub triangles_drawn: u64,
}

pub struct ClusterRasterizer<'a> {
    pub frame: &'a PerFrameData,
    pub geometry: &'a Geometry,
    pub state: &'a DrawState,
    pub hzb: &'a Hzb,
    pub depth: &'a DepthBuffer,
}

impl ClusterRasterizer<'_> {
    pub fn run(&self, pass: CullPass, commands: &[DrawCommand]) -> RasterSummary {
        let stats = RasterStats::default();
        let view_projection = self.frame.projection * self.frame.view;
        commands.par_iter().for_each(|command| self.process_command(pass, command, &view_projection, &stats));
        RasterSummary {
            clusters_tested: stats.clusters_tested.into_inner(),
            clusters_culled: stats.clusters_culled.into_inner(),
            clusters_drawn: stats.clusters_drawn.into_inner(),
            triangles_drawn: stats.triangles_drawn.into_inner(),
        }
    }

    fn process_command(&self, pass: CullPass, command: &DrawCommand, view_projection: &Mat4, stats: &RasterStats) {
        let Some(draw) = self.state.instances.get(command.draw_index as usize) else {
            return;
        };
        let Some(mesh) = self.geometry.mesh(draw.mesh_index) else {
            return;
        };
        if mesh.lod_count == 0 {
            return;
        }
        // Indices coming from the accelerator are clamped, never trusted.
        let lod = mesh.lods[command.lod_index.min(mesh.lod_count - 1) as usize];
        let first_bit = draw.cluster_visibility_offset as usize + (lod.cluster_offset - mesh.lods[0].cluster_offset) as usize;
        let drawn_in_prepass = command.mesh_visibility != 0;
        let mvp = *view_projection * draw.model;

        for group in 0..command.task_x {
            for lane in 0..TASK_GROUP_SIZE {
                let k = group * TASK_GROUP_SIZE + lane;
                if k >= lod.cluster_count {
                    break;
                }
                let cluster = &self.geometry.clusters[(lod.cluster_offset + k) as usize];
                let bit = first_bit + k as usize;
                stats.clusters_tested.fetch_add(1, Ordering::Relaxed);

                match self.cluster_verdict(pass, cluster, draw, bit, drawn_in_prepass) {
                    ClusterVerdict::Draw => {
                        stats.clusters_drawn.fetch_add(1, Ordering::Relaxed);
                        let triangles = self.rasterize_cluster(cluster, mesh.vertex_offset, &mvp);
                        stats.triangles_drawn.fetch_add(triangles as u64, Ordering::Relaxed);
                    }
                    ClusterVerdict::Cull | ClusterVerdict::AlreadyDrawn => {
                        stats.clusters_culled.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    fn cluster_verdict(&self, pass: CullPass, cluster: &Cluster, draw: &PerDrawData, bit: usize, drawn_in_prepass: bool) -> ClusterVerdict {
        let frame = self.frame;
        let occlusion = frame.enable_cluster_occlusion_culling != 0;
        let bits = &self.state.cluster_visibility;
        let was_visible = bits.get(bit);

        match pass {
            // 预处理阶段只画上一帧可见的簇
            CullPass::Prepass if occlusion && !was_visible => return ClusterVerdict::Cull,
            CullPass::Final if drawn_in_prepass && !occlusion => return ClusterVerdict::AlreadyDrawn,
            _ => {}
        }

        let center = draw.model.transform_point3(Vec3::from(cluster.center));
        let radius = cluster.radius * max_scale(&draw.model);

        let mut visible = true;
        if frame.enable_cluster_frustum_culling != 0 && !sphere_in_frustum(frame.frustum_planes(), center, radius) {
            visible = false;
        }
        if visible && frame.enable_cluster_cone_culling != 0 && cluster.cone_cutoff != 127 {
            let axis = Vec3::from(cluster.cone_axis.map(decode_snorm8));
            let axis = draw.model.transform_vector3(axis).normalize_or_zero();
            if cone_culled(center, radius, axis, decode_snorm8(cluster.cone_cutoff), frame.freeze_position()) {
                visible = false;
            }
        }

        if pass == CullPass::Final {
            if visible && occlusion {
                let view_center = frame.freeze_view.transform_point3(center);
                visible = !sphere_occluded(self.hzb, frame, view_center, radius);
            }
            if occlusion {
                // Clusters drawn in the prepass are re-tested too, so their bit
                // drops once they leave the view or turn away.
                bits.set(bit, visible);
                if drawn_in_prepass && was_visible {
                    return if visible { ClusterVerdict::AlreadyDrawn } else { ClusterVerdict::Cull };
                }
            }
        }
        if visible { ClusterVerdict::Draw } else { ClusterVerdict::Cull }
    }

    fn rasterize_cluster(&self, cluster: &Cluster, vertex_offset: u32, mvp: &Mat4) -> u32 {
        let vertices = self.geometry.cluster_vertices(cluster);
        let mut clip = [Vec4::ZERO; MAX_VERTICES_PER_CLUSTER];
        for (dst, &v) in clip.iter_mut().zip(vertices) {
            let Some(vertex) = self.geometry.vertices.get((vertex_offset + v) as usize) else {
                continue;
            };
            let p = Vec3::from(vertex.position.map(dequantize_half));
            *dst = *mvp * p.extend(1.0);
        }

        let mut drawn = 0;
        for t in self.geometry.cluster_triangles(cluster).chunks_exact(3) {
            if self.rasterize_triangle(clip[t[0] as usize], clip[t[1] as usize], clip[t[2] as usize]) {
                drawn += 1;
            }
        }
        drawn
    }

    /// Returns whether the triangle survived culling.
    fn rasterize_triangle(&self, a: Vec4, b: Vec4, c: Vec4) -> bool {
        let frame = self.frame;
        let z_near = frame.z_near();
        // Near plane crossings are dropped; the depth buffer only has to be
        // conservative for occlusion.
        if a.w < z_near || b.w < z_near || c.w < z_near {
            return false;
        }

        let (width, height) = (self.depth.width() as f32, self.depth.height() as f32);
        let to_screen = |p: Vec4| {
            let inv = 1.0 / p.w;
            Vec3::new((0.5 + 0.5 * p.x * inv) * width, (0.5 - 0.5 * p.y * inv) * height, p.z * inv)
        };
        let (s0, s1, s2) = (to_screen(a), to_screen(b), to_screen(c));

        // Screen y points down, so counter-clockwise (front) triangles have negative area.
        let area = (s1.x - s0.x) * (s2.y - s0.y) - (s1.y - s0.y) * (s2.x - s0.x);
        if area == 0.0 || (frame.enable_triangle_backface_culling != 0 && area > 0.0) {
            return false;
        }

        let min = s0.min(s1).min(s2);
        let max = s0.max(s1).max(s2);
        if frame.enable_small_triangle_culling != 0
            && ((min.x - 0.5).round() == (max.x - 0.5).round() || (min.y - 0.5).round() == (max.y - 0.5).round())
        {
            return false;
        }

        let x0 = (min.x - 0.5).ceil().max(0.0);
        let y0 = (min.y - 0.5).ceil().max(0.0);
        let x1 = (max.x - 0.5).floor().min(width - 1.0);
        let y1 = (max.y - 0.5).floor().min(height - 1.0);
        if x0 > x1 || y0 > y1 {
            return true;
        }

        let edge = |p: Vec3, q: Vec3, x: f32, y: f32| (q.x - p.x) * (y - p.y) - (q.y - p.y) * (x - p.x);
        let inv_area = 1.0 / area;
        for y in y0 as u32..=y1 as u32 {
            let py = y as f32 + 0.5;
            for x in x0 as u32..=x1 as u32 {
                let px = x as f32 + 0.5;
                let l0 = edge(s1, s2, px, py) * inv_area;
                let l1 = edge(s2, s0, px, py) * inv_area;
                let l2 = edge(s0, s1, px, py) * inv_area;
                if l0 < 0.0 || l1 < 0.0 || l2 < 0.0 {
                    continue;
                }
                let z = l0 * s0.z + l1 * s1.z + l2 * s2.z;
                self.depth.write(x, y, z);
            }
        }
        true
    }
}
