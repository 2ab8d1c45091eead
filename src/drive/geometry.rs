// Planar geometry shared by the drive stack
// Poses, chassis speeds and module states, all SI units (meters, seconds, radians).

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Below this angle the pose exponential switches to its Taylor expansion
const SMALL_ANGLE: f64 = 1e-9;

/// Wrap an angle in radians into (-PI, PI]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Planar pose in the field frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2d {
    pub x: f64,
    pub y: f64,
    /// Counter-clockwise heading in radians
    pub heading: f64,
}

impl Pose2d {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn rotation(&self) -> Rotation2<f64> {
        Rotation2::new(self.heading)
    }

    /// Apply a body-frame twist (dx, dy, dtheta) as constant-curvature motion.
    ///
    /// Moving along an arc rather than a straight chord keeps the estimate
    /// honest while the vehicle translates and rotates at the same time.
    pub fn exp(&self, dx: f64, dy: f64, dtheta: f64) -> Self {
        let (s, c) = if dtheta.abs() < SMALL_ANGLE {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (dtheta.sin() / dtheta, (1.0 - dtheta.cos()) / dtheta)
        };

        let local = Vector2::new(dx * s - dy * c, dx * c + dy * s);
        let delta = self.rotation() * local;

        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
            heading: wrap_angle(self.heading + dtheta),
        }
    }
}

/// Body velocity: forward (x), left (y) in m/s and counter-clockwise omega in rad/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Rotate a field-frame velocity into the body frame of a vehicle facing `heading`
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: f64) -> Self {
        let body = Rotation2::new(-heading) * Vector2::new(vx, vy);
        Self::new(body.x, body.y, omega)
    }

    pub fn linear(&self) -> Vector2<f64> {
        Vector2::new(self.vx, self.vy)
    }

    pub fn is_finite(&self) -> bool {
        self.vx.is_finite() && self.vy.is_finite() && self.omega.is_finite()
    }
}

/// Speed and heading of one module, used for targets, commands and measurements
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Wheel surface speed in m/s, negative means driving backwards
    pub speed: f64,
    /// Azimuth in radians, body frame, not wrapped
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }

    /// Zero speed while holding `angle`
    pub fn parked(angle: f64) -> Self {
        Self { speed: 0.0, angle }
    }

    /// Planar velocity vector of the wheel contact point
    pub fn velocity(&self) -> Vector2<f64> {
        Rotation2::new(self.angle) * Vector2::new(self.speed, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_wrap_angle_range() {
        assert_abs_diff_eq!(wrap_angle(0.0), 0.0);
        assert_abs_diff_eq!(wrap_angle(PI), PI);
        // -PI is excluded from the range and maps onto +PI
        assert_abs_diff_eq!(wrap_angle(-PI), PI);
        assert_abs_diff_eq!(wrap_angle(3.0 * FRAC_PI_2), -FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-5.0 * PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_field_relative_rotation() {
        // Facing +y in the field, a field +y command is body forward
        let speeds = ChassisSpeeds::from_field_relative(0.0, 1.0, 0.3, FRAC_PI_2);
        assert_abs_diff_eq!(speeds.vx, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(speeds.vy, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(speeds.omega, 0.3);
    }

    #[test]
    fn test_pose_exp_straight_line() {
        let pose = Pose2d::new(1.0, 2.0, FRAC_PI_2).exp(0.5, 0.0, 0.0);
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.heading, FRAC_PI_2);
    }

    #[test]
    fn test_pose_exp_quarter_arc() {
        // Driving a quarter circle of radius 1 ends at (1, 1) facing +y
        let pose = Pose2d::origin().exp(FRAC_PI_2, 0.0, FRAC_PI_2);
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.y, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.heading, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_module_state_velocity() {
        let v = ModuleState::new(2.0, FRAC_PI_2).velocity();
        assert_abs_diff_eq!(v.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.y, 2.0, epsilon = 1e-12);
    }
}
