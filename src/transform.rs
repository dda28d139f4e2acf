//! Map frame to vehicle frame conversion.

use nalgebra::{Isometry2, Point2, Vector2};

/// Vehicle pose in the map frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, counter-clockwise from the map x axis.
    pub psi: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, psi: f64) -> Self {
        Self { x, y, psi }
    }

    /// Rigid transform taking vehicle-frame points into the map frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.psi)
    }
}

/// Translates by `(-px, -py)` then rotates by `-psi`.
///
/// An empty input yields an empty output; rejecting too few points is left to
/// the fitter.
pub fn to_vehicle_frame(pose: &Pose, waypoints: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let iso = pose.isometry();
    waypoints
        .iter()
        .map(|p| iso.inverse_transform_point(p))
        .collect()
}

pub fn to_map_frame(pose: &Pose, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let iso = pose.isometry();
    points.iter().map(|p| iso.transform_point(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: &Point2<f64>, b: &Point2<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn point_ahead_of_vehicle_lands_on_x_axis() {
        let pose = Pose::new(1.0, 1.0, FRAC_PI_2);
        let local = to_vehicle_frame(&pose, &[Point2::new(1.0, 3.0), Point2::new(0.0, 1.0)]);
        assert!(close(&local[0], &Point2::new(2.0, 0.0)));
        // One metre to the left of a vehicle facing +y
        assert!(close(&local[1], &Point2::new(0.0, 1.0)));
    }

    #[test]
    fn empty_input_is_not_an_error() {
        assert!(to_vehicle_frame(&Pose::new(3.0, -2.0, 0.4), &[]).is_empty());
    }

    #[test]
    fn round_trip_is_identity() {
        let waypoints: Vec<_> = (0..12)
            .map(|i| Point2::new(-40.0 + 7.3 * i as f64, 12.0 - 1.1 * (i * i) as f64))
            .collect();
        for (k, psi) in [-3.0, -1.2, 0.0, 0.7, 2.9, 6.5].iter().enumerate() {
            let pose = Pose::new(100.0 * k as f64 - 250.0, 3.5 * k as f64, *psi);
            let back = to_map_frame(&pose, &to_vehicle_frame(&pose, &waypoints));
            assert_eq!(back.len(), waypoints.len());
            for (a, b) in back.iter().zip(&waypoints) {
                assert!(close(a, b), "{a} != {b} for pose {pose:?}");
            }
        }
    }

    #[test]
    fn distances_are_preserved() {
        let pose = Pose::new(-12.0, 40.0, 1.3);
        let a = Point2::new(5.0, 7.0);
        let b = Point2::new(-3.0, 11.0);
        let local = to_vehicle_frame(&pose, &[a, b]);
        assert!(((local[0] - local[1]).norm() - (a - b).norm()).abs() < 1e-9);
    }
}
