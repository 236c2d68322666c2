//! Pinhole projection of camera-space points to viewport pixels. Runs on the
//! blocking pool through the async dispatcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    /// Vertical field of view in degrees.
    pub fov_degrees: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            fov_degrees: 60.0,
        }
    }
}

/// Projects a camera-space point (camera looks down -Z) to pixel coordinates
/// with the origin at the top-left corner.
pub fn project_point(point: [f64; 3], viewport: &Viewport) -> Result<[f64; 2], String> {
    let [x, y, z] = point;
    if z >= 0.0 {
        return Err(format!("point ({x}, {y}, {z}) is behind the camera"));
    }
    if !(viewport.fov_degrees > 0.0 && viewport.fov_degrees < 180.0) {
        return Err(format!("invalid field of view {}", viewport.fov_degrees));
    }
    let focal = 1.0 / (viewport.fov_degrees.to_radians() / 2.0).tan();
    let aspect = viewport.width / viewport.height;
    let ndc_x = focal * x / (-z * aspect);
    let ndc_y = focal * y / -z;
    Ok([
        (ndc_x + 1.0) * 0.5 * viewport.width,
        (1.0 - ndc_y) * 0.5 * viewport.height,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_maps_to_middle() {
        let viewport = Viewport::default();
        let [px, py] = project_point([0.0, 0.0, -5.0], &viewport).unwrap();
        assert!((px - 960.0).abs() < 1e-9);
        assert!((py - 540.0).abs() < 1e-9);
    }

    #[test]
    fn test_up_is_towards_top() {
        let viewport = Viewport::default();
        let [_, py] = project_point([0.0, 1.0, -5.0], &viewport).unwrap();
        assert!(py < 540.0);
    }

    #[test]
    fn test_behind_camera_rejected() {
        assert!(project_point([0.0, 0.0, 1.0], &Viewport::default()).is_err());
    }
}
