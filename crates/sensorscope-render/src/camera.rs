//! Camera and view management.

use glam::{Mat4, Vec3, Vec4};

/// Restriction of the camera projection to a device-pixel sub-rectangle of
/// the full viewport.
///
/// While set, the projection matrix covers only the selected window, so
/// rendering through the camera rasterizes exactly that region of the full
/// frame. Used by the picker to render a small window around the probe point
/// at full-frame precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOffset {
    /// Full viewport width in device pixels.
    pub full_width: f32,
    /// Full viewport height in device pixels.
    pub full_height: f32,
    /// Window origin x in device pixels.
    pub offset_x: f32,
    /// Window origin y in device pixels.
    pub offset_y: f32,
    /// Window width in device pixels.
    pub width: f32,
    /// Window height in device pixels.
    pub height: f32,
}

/// A perspective camera for viewing the scene.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space.
    pub position: Vec3,
    /// Point the camera is looking at.
    pub target: Vec3,
    /// Up vector.
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    /// Aspect ratio (width / height).
    pub aspect_ratio: f32,
    /// Near clipping plane.
    pub near: f32,
    /// Far clipping plane.
    pub far: f32,
    view_offset: Option<ViewOffset>,
}

impl Camera {
    /// Creates a new camera with default settings.
    #[must_use]
    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect_ratio,
            near: 0.01,
            far: 1000.0,
            view_offset: None,
        }
    }

    /// Sets the aspect ratio.
    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = aspect_ratio;
    }

    /// Restricts the projection to a sub-rectangle of the full viewport.
    ///
    /// Replaces any previously set offset.
    pub fn set_view_offset(&mut self, offset: ViewOffset) {
        self.view_offset = Some(offset);
    }

    /// Removes the view restriction, returning to the full frustum.
    pub fn clear_view_offset(&mut self) {
        self.view_offset = None;
    }

    /// Returns the current view restriction, if any.
    #[must_use]
    pub fn view_offset(&self) -> Option<ViewOffset> {
        self.view_offset
    }

    /// Returns the view matrix.
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Returns the projection matrix, honoring the view offset when set.
    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        // When a view offset is active the full frame's aspect comes from the
        // offset, not from the (possibly stale) aspect_ratio field.
        let aspect = self
            .view_offset
            .map_or(self.aspect_ratio, |v| v.full_width / v.full_height);

        let mut top = self.near * (self.fov * 0.5).tan();
        let mut height = 2.0 * top;
        let mut width = aspect * height;
        let mut left = -0.5 * width;

        if let Some(v) = self.view_offset {
            left += v.offset_x * width / v.full_width;
            top -= v.offset_y * height / v.full_height;
            width *= v.width / v.full_width;
            height *= v.height / v.full_height;
        }

        frustum_rh(left, left + width, top - height, top, self.near, self.far)
    }

    /// Returns the combined view-projection matrix.
    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Off-center right-handed perspective frustum with wgpu's `[0, 1]` depth
/// range. Written out explicitly; for a symmetric frustum this is identical
/// to `Mat4::perspective_rh`.
fn frustum_rh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let rw = 1.0 / (right - left);
    let rh = 1.0 / (top - bottom);
    let r = far / (near - far);
    Mat4::from_cols(
        Vec4::new(2.0 * near * rw, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near * rh, 0.0, 0.0),
        Vec4::new((right + left) * rw, (top + bottom) * rh, r, -1.0),
        Vec4::new(0.0, 0.0, r * near, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ndc_of(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn symmetric_frustum_matches_perspective() {
        let camera = Camera::new(16.0 / 9.0);
        let reference =
            Mat4::perspective_rh(camera.fov, camera.aspect_ratio, camera.near, camera.far);
        let projection = camera.projection_matrix();
        for (a, b) in projection
            .to_cols_array()
            .iter()
            .zip(reference.to_cols_array().iter())
        {
            assert!((a - b).abs() < 1e-5, "{projection:?} vs {reference:?}");
        }
    }

    #[test]
    fn view_offset_maps_window_pixels_to_full_ndc() {
        let full_w = 640.0;
        let full_h = 480.0;
        let mut camera = Camera::new(full_w / full_h);
        let full = camera.view_projection_matrix();

        // A point in front of the camera, off-center.
        let p = Vec3::new(0.3, -0.2, -5.0) + camera.position;
        let ndc = ndc_of(full, p);
        let px = (ndc.x + 1.0) * 0.5 * full_w;
        let py = (1.0 - ndc.y) * 0.5 * full_h;

        // Restrict to a 9x9 window whose origin sits just left/up of the
        // projected pixel; the point must land at the matching offset within
        // the window.
        let (ox, oy) = (px.floor() - 4.0, py.floor() - 4.0);
        camera.set_view_offset(ViewOffset {
            full_width: full_w,
            full_height: full_h,
            offset_x: ox,
            offset_y: oy,
            width: 9.0,
            height: 9.0,
        });
        let restricted = ndc_of(camera.view_projection_matrix(), p);
        let expected_x = (px - ox) / 9.0 * 2.0 - 1.0;
        let expected_y = 1.0 - (py - oy) / 9.0 * 2.0;
        assert!((restricted.x - expected_x).abs() < 1e-3);
        assert!((restricted.y - expected_y).abs() < 1e-3);
    }

    #[test]
    fn clear_view_offset_restores_full_frustum() {
        let mut camera = Camera::new(1.0);
        let before = camera.projection_matrix();
        camera.set_view_offset(ViewOffset {
            full_width: 100.0,
            full_height: 100.0,
            offset_x: 10.0,
            offset_y: 20.0,
            width: 9.0,
            height: 9.0,
        });
        assert_ne!(camera.projection_matrix(), before);
        camera.clear_view_offset();
        assert_eq!(camera.projection_matrix(), before);
        assert!(camera.view_offset().is_none());
    }
}
