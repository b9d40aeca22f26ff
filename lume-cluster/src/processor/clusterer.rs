use anyhow::{Result, ensure};
use meshopt::{build_meshlets, compute_meshlet_bounds};

use crate::geometry::BakedMesh;
use crate::processor::simplifier::position_adapter;
use crate::quantize::RawVertex;
use crate::{CLUSTER_CONE_WEIGHT, Cluster, MAX_TRIANGLES_PER_CLUSTER, MAX_VERTICES_PER_CLUSTER};

/// Splits one LOD's index list into clusters and appends them to `out`.
///
/// Returns `(cluster_offset, cluster_count)` relative to `out.clusters`.
/// Cluster vertex numbers are mesh-local.
pub fn build_clusters(indices: &[u32], vertices: &[RawVertex], out: &mut BakedMesh) -> Result<(u32, u32)> {
    ensure!(!indices.is_empty() && indices.len() % 3 == 0, "cannot cluster {} indices", indices.len());

    let adapter = position_adapter(vertices)?;
    let meshlets = build_meshlets(
        indices,
        &adapter,
        MAX_VERTICES_PER_CLUSTER,
        MAX_TRIANGLES_PER_CLUSTER,
        CLUSTER_CONE_WEIGHT,
    );

    let cluster_offset = out.clusters.len() as u32;
    for meshlet in meshlets.iter() {
        let (meshlet_vertices, meshlet_triangles) = (meshlet.vertices, meshlet.triangles);
        let triangle_count = meshlet_triangles.len() / 3;
        if triangle_count == 0 {
            continue;
        }
        let bounds = compute_meshlet_bounds(meshlet, &adapter);

        let vertex_offset = out.cluster_vertices.len() as u32;
        let triangle_offset = out.cluster_triangles.len() as u32;
        out.cluster_vertices.extend_from_slice(meshlet_vertices);
        out.cluster_triangles.extend_from_slice(&meshlet_triangles[..triangle_count * 3]);
        // 三角形字节按 4 对齐
        let padded = out.cluster_triangles.len().next_multiple_of(4);
        out.cluster_triangles.resize(padded, 0);

        out.clusters.push(Cluster {
            vertex_offset,
            triangle_offset,
            vertex_count: meshlet_vertices.len() as u32,
            triangle_count: triangle_count as u32,
            center: bounds.center,
            radius: bounds.radius,
            cone_axis: bounds.cone_axis_s8.map(|c| c as i8),
            cone_cutoff: bounds.cone_cutoff_s8 as i8,
        });
    }

    let cluster_count = out.clusters.len() as u32 - cluster_offset;
    ensure!(cluster_count > 0, "clustering produced no clusters");
    Ok((cluster_offset, cluster_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: u32) -> (Vec<RawVertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(RawVertex {
                    position: [x as f32, y as f32, 0.0],
                    normal: [0.5, 0.5, 1.0],
                    ..Default::default()
                });
            }
        }
        let mut indices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                indices.extend_from_slice(&[i, i + 1, i + n + 1, i + 1, i + n + 2, i + n + 1]);
            }
        }
        (vertices, indices)
    }

    #[test]
    fn grid_clusters_cover_every_triangle_once() {
        let (vertices, indices) = grid(24);
        let mut out = BakedMesh::default();
        let (offset, count) = build_clusters(&indices, &vertices, &mut out).unwrap();
        assert_eq!(offset, 0);
        assert!(count > 1);

        let mut seen = Vec::new();
        for c in &out.clusters {
            assert!(c.vertex_count as usize <= MAX_VERTICES_PER_CLUSTER);
            assert!(c.triangle_count as usize <= MAX_TRIANGLES_PER_CLUSTER);
            assert_eq!(c.triangle_offset % 4, 0);
            let verts = &out.cluster_vertices[c.vertex_offset as usize..][..c.vertex_count as usize];
            let tris = &out.cluster_triangles[c.triangle_offset as usize..][..c.triangle_count as usize * 3];
            for t in tris.chunks(3) {
                let mut tri = [verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]];
                tri.sort();
                seen.push(tri);
            }
        }
        let mut expected: Vec<[u32; 3]> = indices
            .chunks(3)
            .map(|t| {
                let mut tri = [t[0], t[1], t[2]];
                tri.sort();
                tri
            })
            .collect();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn flat_grid_cone_faces_up() {
        let (vertices, indices) = grid(4);
        let mut out = BakedMesh::default();
        build_clusters(&indices, &vertices, &mut out).unwrap();
        let c = out.clusters[0];
        // Every triangle faces +Z: the cone is the +Z half space.
        assert!(c.cone_axis[2] > 100);
        assert!(c.cone_cutoff.abs() <= 2);
    }

    #[test]
    fn empty_input_is_rejected() {
        let mut out = BakedMesh::default();
        assert!(build_clusters(&[], &[], &mut out).is_err());
    }
}
