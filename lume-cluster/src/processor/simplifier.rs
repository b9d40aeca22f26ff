use anyhow::{Context, Result};
use meshopt::{SimplifyOptions, VertexDataAdapter, simplify, simplify_scale};

use crate::quantize::RawVertex;

pub struct SimplifiedLevel {
    pub indices: Vec<u32>,
    /// Deviation from the input surface, in mesh position units.
    pub error: f32,
}

pub(crate) fn position_adapter(vertices: &[RawVertex]) -> Result<VertexDataAdapter<'_>> {
    VertexDataAdapter::new(bytemuck::cast_slice(vertices), std::mem::size_of::<RawVertex>(), 0)
        .context("failed to build vertex adapter for mesh positions")
}

/// Simplifies `indices` towards `target_index_count` without moving the
/// surface by more than `target_error` (absolute units).
///
/// Topology is preserved; the result may stop well above the target when
/// the error bound is hit first.
pub fn simplify_level(
    vertices: &[RawVertex],
    indices: &[u32],
    target_index_count: usize,
    target_error: f32,
) -> Result<SimplifiedLevel> {
    let adapter = position_adapter(vertices)?;

    // meshopt 的误差是相对于网格尺寸的，这里换算成绝对单位
    let scale = simplify_scale(&adapter);
    let relative_error = if scale > 0.0 { target_error / scale } else { 0.0 };

    let mut error = 0.0;
    let simplified = simplify(
        indices,
        &adapter,
        target_index_count,
        relative_error,
        SimplifyOptions::empty(),
        Some(&mut error),
    );

    Ok(SimplifiedLevel { indices: simplified, error: error * scale })
}
