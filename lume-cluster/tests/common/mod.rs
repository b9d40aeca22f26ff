#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec3};
use lume_cluster::geometry::Geometry;
use lume_cluster::processor::{RawMesh, bake_mesh};
use lume_cluster::quantize::{DEBUG_COLOR, RawVertex};
use lume_cluster::{BakedMesh, PerDrawData};

fn vertex(position: Vec3, normal: Vec3, uv: [f32; 2]) -> RawVertex {
    RawVertex {
        position: position.to_array(),
        normal: (normal * 0.5 + 0.5).to_array(),
        tex_coord: uv,
        color: DEBUG_COLOR,
    }
}

/// `n`×`n` quads spanning [-1, 1]² in the XY plane, facing +Z.
pub fn grid(n: u32) -> RawMesh {
    let mut mesh = RawMesh::default();
    for y in 0..=n {
        for x in 0..=n {
            let u = x as f32 / n as f32;
            let v = y as f32 / n as f32;
            mesh.vertices.push(vertex(Vec3::new(u * 2.0 - 1.0, v * 2.0 - 1.0, 0.0), Vec3::Z, [u, 1.0 - v]));
        }
    }
    let row = n + 1;
    for y in 0..n {
        for x in 0..n {
            let i = y * row + x;
            mesh.indices.extend_from_slice(&[i, i + 1, i + row + 1, i, i + row + 1, i + row]);
        }
    }
    mesh
}

pub fn tetrahedron() -> RawMesh {
    let corners = [Vec3::new(1.0, 1.0, 1.0), Vec3::new(-1.0, -1.0, 1.0), Vec3::new(-1.0, 1.0, -1.0), Vec3::new(1.0, -1.0, -1.0)];
    RawMesh {
        vertices: corners.iter().map(|&p| vertex(p, p.normalize(), [0.0, 0.0])).collect(),
        indices: vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3],
    }
}

/// Closed unit sphere with outward facing, counter-clockwise triangles.
pub fn uv_sphere(segments: u32, rings: u32) -> RawMesh {
    let mut mesh = RawMesh::default();
    mesh.vertices.push(vertex(Vec3::Y, Vec3::Y, [0.5, 0.0]));
    for r in 1..rings {
        let theta = std::f32::consts::PI * r as f32 / rings as f32;
        for s in 0..segments {
            let phi = std::f32::consts::TAU * s as f32 / segments as f32;
            let p = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            mesh.vertices.push(vertex(p, p, [s as f32 / segments as f32, r as f32 / rings as f32]));
        }
    }
    mesh.vertices.push(vertex(-Vec3::Y, -Vec3::Y, [0.5, 1.0]));

    let bottom = mesh.vertices.len() as u32 - 1;
    let at = |r: u32, s: u32| -> u32 {
        match r {
            0 => 0,
            r if r == rings => bottom,
            r => 1 + (r - 1) * segments + s % segments,
        }
    };
    for r in 0..rings {
        for s in 0..segments {
            let (a, b, c, d) = (at(r, s), at(r + 1, s), at(r + 1, s + 1), at(r, s + 1));
            if r + 1 < rings {
                mesh.indices.extend_from_slice(&[a, c, b]);
            }
            if r > 0 {
                mesh.indices.extend_from_slice(&[a, d, c]);
            }
        }
    }
    mesh
}

pub fn bake(raw: RawMesh) -> BakedMesh {
    bake_mesh(raw).unwrap().baked
}

/// Writes positions and faces only; normals fall back to the importer default.
pub fn write_obj(dir: &Path, name: &str, mesh: &RawMesh) -> PathBuf {
    let mut text = String::new();
    for v in &mesh.vertices {
        writeln!(text, "v {} {} {}", v.position[0], v.position[1], v.position[2]).unwrap();
    }
    for t in mesh.indices.chunks_exact(3) {
        writeln!(text, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1).unwrap();
    }
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// One instance per `(mesh, model)` pair, cluster bits packed back to back.
pub fn place(geometry: &Geometry, placements: &[(u32, Mat4)]) -> Vec<PerDrawData> {
    let mut offset = 0;
    placements
        .iter()
        .map(|&(mesh_index, model)| {
            let draw = PerDrawData { model, mesh_index, cluster_visibility_offset: offset, _padding: [0; 2] };
            offset += geometry.meshes[mesh_index as usize].total_cluster_count();
            draw
        })
        .collect()
}

/// Triangles as sorted vertex triples, for comparing triangle sets.
pub fn canonical(triangles: impl Iterator<Item = [u32; 3]>) -> Vec<[u32; 3]> {
    let mut out: Vec<[u32; 3]> = triangles
        .map(|mut t| {
            t.sort_unstable();
            t
        })
        .collect();
    out.sort_unstable();
    out
}
