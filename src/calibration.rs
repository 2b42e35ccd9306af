//! Depth-to-color projection.

use nalgebra::{Matrix3, Point3, Vector3};

/// Pinhole parameters of a single camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Rigid transform taking depth-camera coordinates into color-camera
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

/// Calibration of the depth-to-color mapping, delivered with every depth
/// frame and compared by value to detect runtime recalibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoCalibration {
    pub color: Intrinsics,
    pub depth: Intrinsics,
    pub extrinsics: Extrinsics,
}

/// Maps sensor-space vertices onto the color image plane.
///
/// Built lazily from the first depth frame's calibration and updated in place
/// when a later frame carries different parameters.
#[derive(Debug, Clone)]
pub struct Projector {
    calibration: StereoCalibration,
}

impl Projector {
    pub fn new(calibration: StereoCalibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &StereoCalibration {
        &self.calibration
    }

    pub fn set_calibration(&mut self, calibration: StereoCalibration) {
        self.calibration = calibration;
    }

    /// Project a sensor-space vertex onto the color plane.
    ///
    /// Coordinates are continuous; callers bound-check against the color
    /// resolution. Returns `None` for vertices at or behind the color
    /// camera's focal plane.
    pub fn to_color_plane(&self, vertex: &Point3<f32>) -> Option<(f32, f32)> {
        let e = &self.calibration.extrinsics;
        let p = e.rotation * vertex.coords + e.translation;
        if p.z <= 0.0 {
            return None;
        }
        let c = &self.calibration.color;
        Some((p.x / p.z * c.fx + c.cx, p.y / p.z * c.fy + c.cy))
    }
}
