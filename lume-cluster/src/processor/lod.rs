use anyhow::Result;
use log::debug;
use meshopt::optimize_vertex_cache_in_place;

use crate::geometry::BakedMesh;
use crate::processor::clusterer::build_clusters;
use crate::processor::simplifier::simplify_level;
use crate::quantize::RawVertex;
use crate::{MAX_MESH_LODS, MeshLod};

/// Each level aims for this share of the previous level's indices.
pub const LOD_TARGET_RATIO: f32 = 0.6;
/// Maximum surface deviation per simplification step, in mesh units.
pub const LOD_TARGET_ERROR: f32 = 1e-2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodTermination {
    /// All `MAX_MESH_LODS` levels were recorded.
    BudgetExhausted,
    /// The simplifier could not reach the target within the error bound.
    SimplifierStalled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LodState {
    Record,
    Simplify,
    Done(LodTermination),
}

pub struct LodChain {
    pub baked: BakedMesh,
    pub termination: LodTermination,
    /// Simplification error of each level; level 0 is exact.
    pub errors: Vec<f32>,
}

/// Builds the LOD chain of one mesh, level by level.
///
/// `baked` must already hold the mesh's vertices and bounds; this fills in
/// `indices`, `lods` and the cluster arrays.
pub struct LodChainBuilder<'a> {
    vertices: &'a [RawVertex],
    current: Vec<u32>,
    baked: BakedMesh,
    errors: Vec<f32>,
    pending_error: f32,
    state: LodState,
}

impl<'a> LodChainBuilder<'a> {
    pub fn new(vertices: &'a [RawVertex], indices: Vec<u32>, baked: BakedMesh) -> Self {
        Self {
            vertices,
            current: indices,
            baked,
            errors: Vec::with_capacity(MAX_MESH_LODS),
            pending_error: 0.0,
            state: LodState::Record,
        }
    }

    pub fn build(mut self) -> Result<LodChain> {
        loop {
            self.state = match self.state {
                LodState::Record => self.record()?,
                LodState::Simplify => self.simplify()?,
                LodState::Done(termination) => {
                    self.baked.lod_count = self.baked.lods.len() as u32;
                    return Ok(LodChain { baked: self.baked, termination, errors: self.errors });
                }
            };
        }
    }

    fn record(&mut self) -> Result<LodState> {
        let first_index = self.baked.indices.len() as u32;
        self.baked.indices.extend_from_slice(&self.current);
        let (cluster_offset, cluster_count) = build_clusters(&self.current, self.vertices, &mut self.baked)?;

        self.baked.lods.push(MeshLod {
            first_index,
            index_count: self.current.len() as u32,
            cluster_offset,
            cluster_count,
        });
        self.errors.push(self.pending_error);
        debug!(
            "lod {}: {} triangles, {} clusters, error {:.5}",
            self.baked.lods.len() - 1,
            self.current.len() / 3,
            cluster_count,
            self.pending_error
        );

        if self.baked.lods.len() == MAX_MESH_LODS {
            Ok(LodState::Done(LodTermination::BudgetExhausted))
        } else {
            Ok(LodState::Simplify)
        }
    }

    fn simplify(&mut self) -> Result<LodState> {
        let target = (self.current.len() as f32 * LOD_TARGET_RATIO) as usize;
        let target = target - target % 3;
        let level = simplify_level(self.vertices, &self.current, target, LOD_TARGET_ERROR)?;

        // 达不到目标就停止，不保留半成品层级
        if level.indices.is_empty() || level.indices.len() > target {
            debug!("lod chain stops: {} -> {} indices (target {})", self.current.len(), level.indices.len(), target);
            return Ok(LodState::Done(LodTermination::SimplifierStalled));
        }

        self.current = level.indices;
        optimize_vertex_cache_in_place(&mut self.current, self.vertices.len());
        self.pending_error = level.error;
        Ok(LodState::Record)
    }
}
