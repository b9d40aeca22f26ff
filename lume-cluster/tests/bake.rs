mod common;

use common::{bake, canonical, grid, tetrahedron, uv_sphere, write_obj};
use lume_cluster::geometry::Geometry;
use lume_cluster::processor::lod::LOD_TARGET_RATIO;
use lume_cluster::processor::{LodTermination, bake_mesh, load_obj};
use lume_cluster::{BakedMesh, MAX_MESH_LODS, MAX_TRIANGLES_PER_CLUSTER, MAX_VERTICES_PER_CLUSTER, cache, load_mesh};

fn lod_triangles(baked: &BakedMesh, level: usize) -> Vec<[u32; 3]> {
    let lod = &baked.lods[level];
    let start = lod.first_index as usize;
    let indices = &baked.indices[start..start + lod.index_count as usize];
    canonical(indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]))
}

fn cluster_triangles(baked: &BakedMesh, level: usize) -> Vec<[u32; 3]> {
    let lod = &baked.lods[level];
    let clusters = &baked.clusters[lod.cluster_offset as usize..(lod.cluster_offset + lod.cluster_count) as usize];
    canonical(clusters.iter().flat_map(|c| {
        let vertices = &baked.cluster_vertices[c.vertex_offset as usize..(c.vertex_offset + c.vertex_count) as usize];
        let start = c.triangle_offset as usize;
        baked.cluster_triangles[start..start + c.triangle_count as usize * 3]
            .chunks_exact(3)
            .map(move |t| [vertices[t[0] as usize], vertices[t[1] as usize], vertices[t[2] as usize]])
            .collect::<Vec<_>>()
    }))
}

#[test]
fn clusters_cover_each_lod_exactly() {
    let baked = bake(uv_sphere(48, 24));
    assert!(baked.lod_count > 1);
    for level in 0..baked.lod_count as usize {
        assert_eq!(cluster_triangles(&baked, level), lod_triangles(&baked, level), "level {}", level);
    }
}

#[test]
fn clusters_respect_capacity() {
    let baked = bake(grid(40));
    for cluster in &baked.clusters {
        assert!(cluster.vertex_count as usize <= MAX_VERTICES_PER_CLUSTER);
        assert!((1..=MAX_TRIANGLES_PER_CLUSTER).contains(&(cluster.triangle_count as usize)));
        assert_eq!(cluster.triangle_offset % 4, 0);
    }
    // 3200 triangles cannot fit in fewer clusters than this.
    assert!(baked.lods[0].cluster_count as usize >= 3200usize.div_ceil(MAX_TRIANGLES_PER_CLUSTER));
}

#[test]
fn lod_chain_shrinks_monotonically() {
    let chain = bake_mesh(uv_sphere(64, 32)).unwrap();
    let baked = &chain.baked;
    assert!((2..=MAX_MESH_LODS as u32).contains(&baked.lod_count));
    assert_eq!(chain.errors.len(), baked.lods.len());
    assert_eq!(chain.errors[0], 0.0);

    for pair in baked.lods.windows(2) {
        let target = (pair[0].index_count as f32 * LOD_TARGET_RATIO) as u32;
        assert!(pair[1].index_count <= target, "{} -> {}", pair[0].index_count, pair[1].index_count);
        assert!(pair[1].cluster_count <= pair[0].cluster_count);
    }
    if baked.lod_count < MAX_MESH_LODS as u32 {
        assert_eq!(chain.termination, LodTermination::SimplifierStalled);
    }
}

#[test]
fn tetrahedron_stops_after_one_level() {
    let chain = bake_mesh(tetrahedron()).unwrap();
    assert_eq!(chain.baked.lod_count, 1);
    assert_eq!(chain.baked.lods[0].index_count, 12);
    assert_eq!(chain.termination, LodTermination::SimplifierStalled);
}

#[test]
fn bounds_enclose_every_vertex() {
    let raw = uv_sphere(32, 16);
    let baked = bake(raw);
    assert!((baked.radius - 1.0).abs() < 1e-3);
    assert!(baked.center.iter().all(|c| c.abs() < 1e-3));
}

#[test]
fn obj_import_defaults_normals_and_rejects_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(dir.path(), "grid.obj", &grid(4));
    let raw = load_obj(&path).unwrap();
    assert_eq!(raw.indices.len(), 4 * 4 * 6);
    assert!(raw.vertices.iter().all(|v| v.normal == [0.5, 1.0, 0.5]));

    assert!(load_obj(&dir.path().join("missing.obj")).is_err());
    let empty = dir.path().join("empty.obj");
    std::fs::write(&empty, "v 0 0 0\nv 1 0 0\n").unwrap();
    assert!(load_obj(&empty).is_err());
}

#[test]
fn load_mesh_bakes_then_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(dir.path(), "sphere.obj", &uv_sphere(32, 16));

    let mut first = Geometry::new();
    assert_eq!(load_mesh(&path, &mut first).unwrap(), 0);
    assert!(cache::cache_path(&path).exists());

    let mut second = Geometry::new();
    load_mesh(&path, &mut second).unwrap();
    assert_eq!(first.clusters, second.clusters);
    assert_eq!(first.vertices, second.vertices);
    assert_eq!(first.indices, second.indices);
    assert_eq!(first.meshes[0].lods(), second.meshes[0].lods());
}
