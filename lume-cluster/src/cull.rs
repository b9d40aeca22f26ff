//! Bounding sphere tests shared by draw generation and the cluster stage.
//!
//! View space is right handed with the camera looking down -Z; the helpers
//! below flip it to a +Z forward frame before projecting.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::PerFrameData;
use crate::hzb::Hzb;

/// Largest axis scale of an affine transform.
pub fn max_scale(model: &Mat4) -> f32 {
    model.x_axis.truncate().length().max(model.y_axis.truncate().length()).max(model.z_axis.truncate().length())
}

pub fn transform_sphere(model: &Mat4, center: Vec3, radius: f32) -> (Vec3, f32) {
    (model.transform_point3(center), radius * max_scale(model))
}

pub fn sphere_in_frustum(planes: &[Vec4], center: Vec3, radius: f32) -> bool {
    planes.iter().all(|p| p.truncate().dot(center) + p.w > -radius)
}

/// Screen-space UV bounds `(min_u, min_v, max_u, max_v)` of a sphere given
/// in a +Z forward view frame. `None` when the sphere touches the near
/// plane, where the projection is unbounded.
pub fn project_sphere(c: Vec3, r: f32, z_near: f32, p00: f32, p11: f32) -> Option<Vec4> {
    if c.z < r + z_near {
        return None;
    }

    let cx = Vec2::new(-c.x, -c.z);
    let vx = Vec2::new((cx.dot(cx) - r * r).sqrt(), r);
    let min_x = Vec2::new(vx.x * cx.x - vx.y * cx.y, vx.y * cx.x + vx.x * cx.y);
    let max_x = Vec2::new(vx.x * cx.x + vx.y * cx.y, -vx.y * cx.x + vx.x * cx.y);

    let cy = Vec2::new(-c.y, -c.z);
    let vy = Vec2::new((cy.dot(cy) - r * r).sqrt(), r);
    let min_y = Vec2::new(vy.x * cy.x - vy.y * cy.y, vy.y * cy.x + vy.x * cy.y);
    let max_y = Vec2::new(vy.x * cy.x + vy.y * cy.y, -vy.y * cy.x + vy.x * cy.y);

    let ndc = Vec4::new(
        min_x.x / min_x.y * p00,
        min_y.x / min_y.y * p11,
        max_x.x / max_x.y * p00,
        max_y.x / max_y.y * p11,
    );
    // NDC y points up, texture v points down.
    Some(Vec4::new(0.5 + 0.5 * ndc.x, 0.5 - 0.5 * ndc.w, 0.5 + 0.5 * ndc.z, 0.5 - 0.5 * ndc.y))
}

/// `view_center` is the sphere center in (right handed) view space.
/// Spheres that cannot be projected are never reported occluded.
pub fn sphere_occluded(hzb: &Hzb, frame: &PerFrameData, view_center: Vec3, radius: f32) -> bool {
    let z_near = frame.z_near();
    let c = Vec3::new(view_center.x, view_center.y, -view_center.z);
    let Some(uv) = project_sphere(c, radius, z_near, frame.projection.x_axis.x, frame.projection.y_axis.y) else {
        return false;
    };

    let size = hzb.size() as f32;
    let width = (uv.z - uv.x) * size;
    let height = (uv.w - uv.y) * size;
    let extent = width.max(height).max(1.0);
    let level = (extent.log2().ceil() as u32).min(hzb.mip_count() - 1);

    let ls = hzb.level_size(level) as f32;
    let occluder = hzb.sample_min(
        level,
        (uv.x * ls).floor() as i64,
        (uv.y * ls).floor() as i64,
        (uv.z * ls).floor() as i64,
        (uv.w * ls).floor() as i64,
    );

    let sphere_depth = z_near / (c.z - radius);
    sphere_depth < occluder
}

/// Normal cone test. `axis` is in world space, `cutoff` already decoded.
/// True when every triangle of the cluster faces away from `camera`.
pub fn cone_culled(center: Vec3, radius: f32, axis: Vec3, cutoff: f32, camera: Vec3) -> bool {
    let v = center - camera;
    v.dot(axis) >= cutoff * v.length() + radius
}

pub fn decode_snorm8(v: i8) -> f32 {
    (v as f32 / 127.0).max(-1.0)
}

/// Picks the LOD for a sphere at `view_center` (frozen view space).
///
/// The proxy is the view distance divided by the projected radius scale;
/// level `n` is acceptable while the proxy stays below `base * step^n`.
pub fn select_lod(frame: &PerFrameData, view_center: Vec3, radius: f32, lod_count: u32) -> u32 {
    let last = lod_count.saturating_sub(1);
    if frame.forced_lod >= 0 {
        return (frame.forced_lod as u32).min(last);
    }

    let distance = (view_center.length() - radius).max(frame.z_near());
    let proxy = distance / (radius.max(f32::EPSILON) * frame.projection.y_axis.y);

    let mut threshold = frame.lod_transition_base;
    for level in 0..lod_count {
        if proxy <= threshold {
            return level;
        }
        threshold *= frame.lod_transition_step;
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, FrameCamera};
    use crate::hzb::DepthBuffer;
    use crate::settings::{RendererConfig, Settings};

    fn frame(settings: &Settings) -> PerFrameData {
        let camera = Camera::default();
        let frame_camera = FrameCamera::new(&camera, 1.0);
        PerFrameData::new(&frame_camera, settings, &RendererConfig::default(), (256, 256), 256)
    }

    #[test]
    fn centered_sphere_projects_symmetrically() {
        let uv = project_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0, 0.1, 1.0, 1.0).unwrap();
        assert!((uv.x + uv.z - 1.0).abs() < 1e-5);
        assert!((uv.y + uv.w - 1.0).abs() < 1e-5);
        let half_width = uv.z - 0.5;
        // tan(asin(1/10)) / 2
        assert!((half_width - 0.0503).abs() < 1e-3);
        assert!(project_sphere(Vec3::new(0.0, 0.0, 0.5), 1.0, 0.1, 1.0, 1.0).is_none());
    }

    #[test]
    fn sphere_above_center_maps_to_top_of_screen() {
        let uv = project_sphere(Vec3::new(0.0, 3.0, 10.0), 1.0, 0.1, 1.0, 1.0).unwrap();
        assert!(uv.w < 0.5);
    }

    #[test]
    fn frustum_rejects_spheres_behind() {
        let f = frame(&Settings::default());
        assert!(sphere_in_frustum(f.frustum_planes(), Vec3::new(0.0, 0.0, -10.0), 1.0));
        assert!(!sphere_in_frustum(f.frustum_planes(), Vec3::new(0.0, 0.0, 10.0), 1.0));
        // Straddling the camera still intersects the near plane region.
        assert!(sphere_in_frustum(f.frustum_planes(), Vec3::ZERO, 1.0));
    }

    #[test]
    fn occlusion_against_wall() {
        let f = frame(&Settings::default());
        let depth = DepthBuffer::new(256, 256);
        // A wall at distance 5 across the whole screen.
        depth.fill(f.z_near() / 5.0);
        let mut hzb = Hzb::new(256, 256);
        hzb.build(&depth);

        assert!(sphere_occluded(&hzb, &f, Vec3::new(0.0, 0.0, -20.0), 1.0));
        assert!(!sphere_occluded(&hzb, &f, Vec3::new(0.0, 0.0, -3.0), 1.0));
        // Intersecting the near plane: cannot be projected, kept.
        assert!(!sphere_occluded(&hzb, &f, Vec3::new(0.0, 0.0, -0.5), 1.0));
    }

    #[test]
    fn empty_hzb_occludes_nothing() {
        let f = frame(&Settings::default());
        let hzb = Hzb::new(256, 256);
        assert!(!sphere_occluded(&hzb, &f, Vec3::new(0.0, 0.0, -1000.0), 0.1));
    }

    #[test]
    fn cone_faces_away() {
        let axis = Vec3::Z;
        // Camera behind a +Z facing patch sees its back.
        assert!(cone_culled(Vec3::ZERO, 0.1, axis, 0.0, Vec3::new(0.0, 0.0, -5.0)));
        assert!(!cone_culled(Vec3::ZERO, 0.1, axis, 0.0, Vec3::new(0.0, 0.0, 5.0)));
        // A degenerate cone never culls.
        assert!(!cone_culled(Vec3::ZERO, 0.1, Vec3::ZERO, 1.0, Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn lod_grows_with_distance_and_respects_forced() {
        let mut settings = Settings::default();
        let f = frame(&settings);
        let mut last = 0;
        for d in [1.0, 10.0, 30.0, 60.0, 120.0, 500.0, 5000.0] {
            let level = select_lod(&f, Vec3::new(0.0, 0.0, -d), 1.0, 16);
            assert!(level >= last);
            last = level;
        }
        assert_eq!(select_lod(&f, Vec3::new(0.0, 0.0, -1.0), 1.0, 16), 0);
        assert_eq!(last, 15);
        assert_eq!(select_lod(&f, Vec3::new(0.0, 0.0, -5000.0), 1.0, 3), 2);

        settings.forced_lod = Some(7);
        let forced = frame(&settings);
        assert_eq!(select_lod(&forced, Vec3::new(0.0, 0.0, -1.0), 1.0, 16), 7);
        assert_eq!(select_lod(&forced, Vec3::new(0.0, 0.0, -1.0), 1.0, 4), 3);
    }
}
