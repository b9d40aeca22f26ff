use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use log::info;
use lume_cluster::draw::spawn_instances;
use lume_cluster::shaders::compile_kernels;
use lume_cluster::{Camera, FrameOutcome, Geometry, Renderer, RendererConfig, Settings, load_mesh};
use lume_core::HostDevice;

/// Number of frames in the camera orbit.
const ORBIT_FRAMES: u32 = 12;

#[derive(Parser, Debug)]
#[command(name = "lume-runner", about = "Bakes meshes into clustered LODs and renders them headless")]
struct Args {
    /// Wavefront OBJ files. Each is baked once and cached next to the source.
    #[arg(required = true)]
    meshes: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let start = Instant::now();
    let mut geometry = Geometry::new();
    for path in &args.meshes {
        load_mesh(path, &mut geometry).with_context(|| format!("Failed to load mesh: {}", path.display()))?;
    }
    info!(
        "{} meshes, {} clusters, {} vertices ready in {:.2}s",
        geometry.meshes.len(),
        geometry.clusters.len(),
        geometry.vertices.len(),
        start.elapsed().as_secs_f32()
    );

    let kernels = compile_kernels().context("Failed to compile kernels")?;
    info!(
        "kernels: generate_draws {} words, hzb_downsample {} words",
        kernels.generate_draws.len(),
        kernels.hzb_downsample.len()
    );

    let config = RendererConfig::headless();
    let instances = spawn_instances(&geometry, config.max_draw_count, config.spawn_cube_size)?;
    let orbit_radius = config.spawn_cube_size;
    let mut renderer = Renderer::new(HostDevice::new(), geometry, instances, config)?;

    let mut camera = Camera::default();
    let mut settings = Settings::default();
    for i in 0..ORBIT_FRAMES {
        let angle = i as f32 / ORBIT_FRAMES as f32 * std::f32::consts::TAU;
        camera.position = Vec3::new(angle.sin() * orbit_radius, 0.25 * orbit_radius, angle.cos() * orbit_radius);
        camera.look_at(Vec3::ZERO);
        // 最后几帧冻结相机，检查剔除结果是否保持不变
        settings.freeze_camera = i + 2 >= ORBIT_FRAMES;

        let frame_start = Instant::now();
        match renderer.render_frame(&camera, &settings)? {
            FrameOutcome::Rendered(report) => info!(
                "frame {} (slot {}): prepass {} draws {} clusters, final {} draws {} clusters, {} triangles, hzb {}, {:.1}ms",
                report.frame_index,
                report.slot,
                report.prepass.generate.emitted,
                report.prepass.raster.clusters_drawn,
                report.final_pass.generate.emitted,
                report.final_pass.raster.clusters_drawn,
                report.prepass.raster.triangles_drawn + report.final_pass.raster.triangles_drawn,
                if report.hzb_rebuilt { "rebuilt" } else { "kept" },
                frame_start.elapsed().as_secs_f64() * 1000.0
            ),
            FrameOutcome::Skipped => info!("frame skipped"),
        }
    }

    let state = renderer.state();
    info!(
        "{} of {} instances visible, {} of {} clusters visible",
        state.instance_visibility.count_ones(),
        state.instances.len(),
        state.cluster_visibility.count_ones(),
        state.cluster_visibility.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_one_mesh_is_required() {
        assert!(Args::try_parse_from(["lume-runner"]).is_err());
        let args = Args::try_parse_from(["lume-runner", "bunny.obj"]).unwrap();
        assert_eq!(args.meshes, vec![PathBuf::from("bunny.obj")]);
    }
}
