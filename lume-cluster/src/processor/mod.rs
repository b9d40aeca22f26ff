pub mod clusterer;
pub mod lod;
pub mod simplifier;

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use glam::Vec3;
use log::info;
use meshopt::{
    generate_vertex_remap, optimize_overdraw_in_place, optimize_vertex_cache_in_place, optimize_vertex_fetch_in_place,
    remap_index_buffer, remap_vertex_buffer,
};

use crate::cache;
use crate::geometry::{BakedMesh, Geometry};
use crate::quantize::{DEBUG_COLOR, RawVertex, quantize_vertex};

pub use lod::{LodChain, LodChainBuilder, LodTermination};

/// Overdraw optimisation may make vertex cache efficiency this much worse.
const OVERDRAW_THRESHOLD: f32 = 1.01;

#[derive(Clone, Debug, Default)]
pub struct RawMesh {
    pub vertices: Vec<RawVertex>,
    pub indices: Vec<u32>,
}

/// Loads a mesh into `geometry`, baking it first unless a cache file exists.
/// Returns the new mesh index.
pub fn load_mesh(path: &Path, geometry: &mut Geometry) -> Result<u32> {
    let start = Instant::now();

    if let Some(baked) = cache::try_load(path)? {
        info!("{}: loaded from cache in {:.2}s", path.display(), start.elapsed().as_secs_f32());
        return Ok(geometry.append(&baked));
    }

    let raw = load_obj(path)?;
    info!("{}: {} triangles loaded in {:.2}s", path.display(), raw.indices.len() / 3, start.elapsed().as_secs_f32());

    let bake_start = Instant::now();
    let chain = bake_mesh(raw).with_context(|| format!("failed to bake {}", path.display()))?;
    info!(
        "{}: {} lods, {} clusters baked in {:.2}s ({:?})",
        path.display(),
        chain.baked.lod_count,
        chain.baked.clusters.len(),
        bake_start.elapsed().as_secs_f32(),
        chain.termination
    );

    cache::try_save(path, &chain.baked)?;
    Ok(geometry.append(&chain.baked))
}

/// Reads every model of a Wavefront OBJ file into one triangle list.
pub fn load_obj(path: &Path) -> Result<RawMesh> {
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .with_context(|| format!("Failed to load OBJ file: {}", path.display()))?;

    let mut mesh = RawMesh::default();
    for model in &models {
        let m = &model.mesh;
        let base = mesh.vertices.len() as u32;
        let count = m.positions.len() / 3;

        if !m.normals.is_empty() && m.normals.len() != m.positions.len() {
            bail!("{}: model '{}' has {} normals for {} positions", path.display(), model.name, m.normals.len() / 3, count);
        }
        if !m.texcoords.is_empty() && m.texcoords.len() / 2 != count {
            bail!("{}: model '{}' has mismatched texture coordinates", path.display(), model.name);
        }

        for i in 0..count {
            let normal = if m.normals.is_empty() {
                [0.0, 1.0, 0.0]
            } else {
                [m.normals[i * 3], m.normals[i * 3 + 1], m.normals[i * 3 + 2]]
            };
            mesh.vertices.push(RawVertex {
                position: [m.positions[i * 3], m.positions[i * 3 + 1], m.positions[i * 3 + 2]],
                // 法线预先映射到 [0, 1]
                normal: normal.map(|n| 0.5 + 0.5 * n),
                tex_coord: if m.texcoords.is_empty() { [0.0, 0.0] } else { [m.texcoords[i * 2], m.texcoords[i * 2 + 1]] },
                color: DEBUG_COLOR,
            });
        }

        if let Some(&bad) = m.indices.iter().find(|&&i| i as usize >= count) {
            bail!("{}: model '{}' references vertex {} of {}", path.display(), model.name, bad, count);
        }
        mesh.indices.extend(m.indices.iter().map(|&i| i + base));
    }

    if mesh.indices.is_empty() || mesh.indices.len() % 3 != 0 {
        bail!("{}: no triangles found", path.display());
    }
    Ok(mesh)
}

/// Welds identical vertices and reorders the mesh for the post-transform
/// cache, overdraw and vertex fetch, in that order.
pub fn prepare_mesh(raw: RawMesh) -> Result<RawMesh> {
    let (vertex_count, remap) = generate_vertex_remap(&raw.vertices, Some(&raw.indices));
    let mut vertices = remap_vertex_buffer(&raw.vertices, vertex_count, &remap);
    let mut indices = remap_index_buffer(Some(&raw.indices), raw.vertices.len(), &remap);

    optimize_vertex_cache_in_place(&mut indices, vertices.len());
    {
        let adapter = simplifier::position_adapter(&vertices)?;
        optimize_overdraw_in_place(&mut indices, &adapter, OVERDRAW_THRESHOLD);
    }
    let used = optimize_vertex_fetch_in_place(&mut indices, &mut vertices);
    vertices.truncate(used);

    Ok(RawMesh { vertices, indices })
}

/// Centroid of the vertices and the largest distance from it.
pub fn mesh_bounds(vertices: &[RawVertex]) -> (Vec3, f32) {
    if vertices.is_empty() {
        return (Vec3::ZERO, 0.0);
    }
    let center = vertices.iter().map(|v| Vec3::from(v.position)).sum::<Vec3>() / vertices.len() as f32;
    let radius = vertices
        .iter()
        .map(|v| Vec3::from(v.position).distance(center))
        .fold(0.0f32, f32::max);
    (center, radius)
}

pub fn bake_mesh(raw: RawMesh) -> Result<LodChain> {
    if raw.indices.is_empty() {
        bail!("mesh has no triangles");
    }
    let prepared = prepare_mesh(raw)?;
    let (center, radius) = mesh_bounds(&prepared.vertices);

    let baked = BakedMesh {
        vertex_count: prepared.vertices.len() as u32,
        center: center.to_array(),
        radius,
        vertices: prepared.vertices.iter().map(quantize_vertex).collect(),
        ..Default::default()
    };

    let chain = LodChainBuilder::new(&prepared.vertices, prepared.indices, baked).build()?;
    chain.baked.validate()?;
    Ok(chain)
}
