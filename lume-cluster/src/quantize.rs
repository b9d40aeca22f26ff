//! Compact vertex encoding: half floats for positions, texture coordinates and
//! colors, unorm8 for normals.

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::Vertex;

/// Full precision vertex as it comes out of the importer.
///
/// `normal` is stored already mapped from [-1, 1] to [0, 1].
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RawVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
    pub color: [f32; 3],
}

/// Magenta, so unshaded geometry stands out.
pub const DEBUG_COLOR: [f32; 3] = [1.0, 0.0, 1.0];

pub fn quantize_half(v: f32) -> u16 {
    f16::from_f32(v).to_bits()
}

pub fn dequantize_half(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// `v` is clamped to [0, 1] and rounded to the nearest of 256 steps.
pub fn quantize_unorm8(v: f32) -> u8 {
    let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    (v * 255.0 + 0.5) as u8
}

pub fn dequantize_unorm8(q: u8) -> f32 {
    q as f32 / 255.0
}

pub fn quantize_vertex(v: &RawVertex) -> Vertex {
    Vertex {
        position: v.position.map(quantize_half),
        normal: [
            quantize_unorm8(v.normal[0]),
            quantize_unorm8(v.normal[1]),
            quantize_unorm8(v.normal[2]),
            0,
        ],
        tex_coord: v.tex_coord.map(quantize_half),
        color: v.color.map(quantize_half),
    }
}

pub fn dequantize_vertex(v: &Vertex) -> RawVertex {
    RawVertex {
        position: v.position.map(dequantize_half),
        normal: [
            dequantize_unorm8(v.normal[0]),
            dequantize_unorm8(v.normal[1]),
            dequantize_unorm8(v.normal[2]),
        ],
        tex_coord: v.tex_coord.map(dequantize_half),
        color: v.color.map(dequantize_half),
    }
}
