// Swerve kinematics for a 4-module base
// Converts chassis velocities (vx, vy, omega) to per-module speed/heading targets and back.

use nalgebra::{Matrix3, RowVector3, SMatrix, SVector, Vector2, Vector3};

use super::geometry::{ChassisSpeeds, ModuleState};
use crate::config::ConfigError;

/// Offsets closer than this (meters) count as the same point
const POINT_EPSILON: f64 = 1e-6;

/// Module speeds below this (m/s) are treated as "not moving"
const ZERO_SPEED: f64 = 1e-9;

/// Least squares needs at least two distinct modules to pin down 3 unknowns
const MIN_MODULES_FOR_SOLVE: usize = 2;

/// Fixed geometry of the four modules plus the precomputed inverse solution
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    offsets: [Vector2<f64>; 4],
    /// Pseudo-inverse of the 8x3 forward matrix, maps stacked module vectors to chassis speeds
    pseudo_inverse: SMatrix<f64, 3, 8>,
}

impl SwerveKinematics {
    /// Build kinematics for the given module offsets (FL, FR, BL, BR)
    ///
    /// Fails if an offset is not finite, two modules share a point, or every
    /// module sits on the rotation center.
    pub fn new(offsets: [Vector2<f64>; 4]) -> Result<Self, ConfigError> {
        for (index, offset) in offsets.iter().enumerate() {
            if !offset.x.is_finite() || !offset.y.is_finite() {
                return Err(ConfigError::NonFiniteOffset { index });
            }
        }

        if offsets.iter().all(|o| o.norm() < POINT_EPSILON) {
            return Err(ConfigError::AllModulesCentered);
        }

        for (index, offset) in offsets.iter().enumerate() {
            for other in 0..index {
                if (offset - offsets[other]).norm() < POINT_EPSILON {
                    return Err(ConfigError::DuplicateOffset {
                        index,
                        other,
                        x: offset.x,
                        y: offset.y,
                    });
                }
            }
        }

        // Each module contributes two rows: [1, 0, -y] and [0, 1, x]
        let mut forward = SMatrix::<f64, 8, 3>::zeros();
        for (i, offset) in offsets.iter().enumerate() {
            forward.set_row(2 * i, &RowVector3::new(1.0, 0.0, -offset.y));
            forward.set_row(2 * i + 1, &RowVector3::new(0.0, 1.0, offset.x));
        }

        let normal = forward.transpose() * forward;
        let normal_inv = normal
            .try_inverse()
            .ok_or(ConfigError::AllModulesCentered)?;

        Ok(Self {
            offsets,
            pseudo_inverse: normal_inv * forward.transpose(),
        })
    }

    pub fn offsets(&self) -> &[Vector2<f64>; 4] {
        &self.offsets
    }

    /// Velocity of one module's contact point for the given chassis speeds
    fn module_velocity(&self, index: usize, speeds: &ChassisSpeeds) -> Vector2<f64> {
        let r = self.offsets[index];
        // v + omega x r
        Vector2::new(speeds.vx - speeds.omega * r.y, speeds.vy + speeds.omega * r.x)
    }

    /// Chassis speeds -> module targets
    ///
    /// A module that is asked not to move keeps `hold_angles[i]` (normally its
    /// measured azimuth) so it does not rotate for nothing.
    pub fn to_module_targets(
        &self,
        speeds: &ChassisSpeeds,
        hold_angles: &[f64; 4],
    ) -> [ModuleState; 4] {
        std::array::from_fn(|i| {
            let v = self.module_velocity(i, speeds);
            let speed = v.norm();
            if speed < ZERO_SPEED {
                ModuleState::parked(hold_angles[i])
            } else {
                ModuleState::new(speed, v.y.atan2(v.x))
            }
        })
    }

    /// Module states -> chassis speeds, least squares over all four modules
    pub fn to_body_velocity(&self, states: &[ModuleState; 4]) -> ChassisSpeeds {
        let mut stacked = SVector::<f64, 8>::zeros();
        for (i, state) in states.iter().enumerate() {
            let v = state.velocity();
            stacked[2 * i] = v.x;
            stacked[2 * i + 1] = v.y;
        }

        let solved = self.pseudo_inverse * stacked;
        ChassisSpeeds::new(solved[0], solved[1], solved[2])
    }

    /// Least squares over the modules that reported a measurement
    ///
    /// Returns `None` when fewer than two modules are available.
    pub fn to_body_velocity_partial(&self, states: &[Option<ModuleState>; 4]) -> Option<ChassisSpeeds> {
        let available = states.iter().filter(|s| s.is_some()).count();
        if available == 4 {
            let all: [ModuleState; 4] = std::array::from_fn(|i| states[i].unwrap_or_default());
            return Some(self.to_body_velocity(&all));
        }
        if available < MIN_MODULES_FOR_SOLVE {
            return None;
        }

        // Normal equations restricted to the available rows
        let mut normal = Matrix3::<f64>::zeros();
        let mut rhs = Vector3::<f64>::zeros();
        for (offset, state) in self.offsets.iter().zip(states) {
            let Some(state) = state else { continue };
            let v = state.velocity();
            let row_x = Vector3::new(1.0, 0.0, -offset.y);
            let row_y = Vector3::new(0.0, 1.0, offset.x);
            normal += row_x * row_x.transpose() + row_y * row_y.transpose();
            rhs += row_x * v.x + row_y * v.y;
        }

        let solved = normal.try_inverse()? * rhs;
        Some(ChassisSpeeds::new(solved[0], solved[1], solved[2]))
    }
}

/// Scale every module down proportionally if any exceeds `max_speed`
///
/// Preserves the direction of the commanded motion instead of clipping the
/// fastest wheel alone. Returns true if scaling was applied.
pub fn desaturate(states: &mut [ModuleState; 4], max_speed: f64) -> bool {
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if fastest > max_speed && fastest > 0.0 {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::geometry::wrap_angle;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    fn square() -> SwerveKinematics {
        SwerveKinematics::new([
            Vector2::new(0.3, 0.3),
            Vector2::new(0.3, -0.3),
            Vector2::new(-0.3, 0.3),
            Vector2::new(-0.3, -0.3),
        ])
        .unwrap()
    }

    fn assert_speeds_eq(a: &ChassisSpeeds, b: &ChassisSpeeds) {
        assert_abs_diff_eq!(a.vx, b.vx, epsilon = 1e-9);
        assert_abs_diff_eq!(a.vy, b.vy, epsilon = 1e-9);
        assert_abs_diff_eq!(a.omega, b.omega, epsilon = 1e-9);
    }

    #[test]
    fn test_forward_motion() {
        let targets = square().to_module_targets(&ChassisSpeeds::new(1.5, 0.0, 0.0), &[0.0; 4]);
        for target in targets {
            assert_abs_diff_eq!(target.speed, 1.5, epsilon = 1e-12);
            assert_abs_diff_eq!(target.angle, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_only() {
        // Pure rotation: every module tangent to its offset, same speed
        let kinematics = square();
        let targets = kinematics.to_module_targets(&ChassisSpeeds::new(0.0, 0.0, 2.0), &[0.0; 4]);
        let radius = 0.3 * 2.0_f64.sqrt();
        for (target, offset) in targets.iter().zip(kinematics.offsets()) {
            assert_abs_diff_eq!(target.speed, 2.0 * radius, epsilon = 1e-12);
            let radial = offset.y.atan2(offset.x);
            assert_abs_diff_eq!(wrap_angle(target.angle - radial), FRAC_PI_2, epsilon = 1e-12);
        }
        // Front-left module points to the back-left diagonal at 135 degrees
        assert_abs_diff_eq!(targets[0].angle, 3.0 * FRAC_PI_4, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_speed_keeps_hold_angle() {
        let hold = [0.1, -2.0, PI, 1.0];
        let targets = square().to_module_targets(&ChassisSpeeds::zero(), &hold);
        for (target, angle) in targets.iter().zip(hold) {
            assert_eq!(target.speed, 0.0);
            assert_eq!(target.angle, angle, "zero speed must not move the azimuth");
        }
    }

    #[test]
    fn test_round_trip() {
        let kinematics = square();
        let cases = [
            ChassisSpeeds::new(1.0, 0.0, 0.0),
            ChassisSpeeds::new(-0.4, 2.2, 0.0),
            ChassisSpeeds::new(0.7, -1.3, 1.9),
            ChassisSpeeds::new(0.0, 0.0, -3.0),
        ];
        for speeds in cases {
            let targets = kinematics.to_module_targets(&speeds, &[0.0; 4]);
            assert_speeds_eq(&kinematics.to_body_velocity(&targets), &speeds);
        }
    }

    #[test]
    fn test_round_trip_robot_layout() {
        let kinematics = SwerveKinematics::new(crate::config::DrivetrainConfig::default().offsets())
            .unwrap();
        let speeds = ChassisSpeeds::new(2.0, -1.0, 0.5);
        let targets = kinematics.to_module_targets(&speeds, &[0.0; 4]);
        assert_speeds_eq(&kinematics.to_body_velocity(&targets), &speeds);
    }

    #[test]
    fn test_partial_solve_with_missing_module() {
        let kinematics = square();
        let speeds = ChassisSpeeds::new(0.5, 0.25, -1.0);
        let targets = kinematics.to_module_targets(&speeds, &[0.0; 4]);

        let partial = [Some(targets[0]), None, Some(targets[2]), Some(targets[3])];
        let solved = kinematics.to_body_velocity_partial(&partial).unwrap();
        assert_speeds_eq(&solved, &speeds);

        let two = [None, Some(targets[1]), None, Some(targets[3])];
        assert_speeds_eq(&kinematics.to_body_velocity_partial(&two).unwrap(), &speeds);

        let one = [None, None, Some(targets[2]), None];
        assert!(kinematics.to_body_velocity_partial(&one).is_none());
    }

    #[test]
    fn test_least_squares_averages_noise() {
        // One slipping wheel shifts the estimate by a fraction of its error, not all of it
        let kinematics = square();
        let mut states = kinematics.to_module_targets(&ChassisSpeeds::new(1.0, 0.0, 0.0), &[0.0; 4]);
        states[0].speed += 0.4;
        let solved = kinematics.to_body_velocity(&states);
        assert!(solved.vx > 1.0 && solved.vx < 1.2, "vx = {}", solved.vx);
    }

    #[test]
    fn test_rejects_degenerate_geometry() {
        let duplicate = SwerveKinematics::new([
            Vector2::new(0.3, 0.3),
            Vector2::new(0.3, -0.3),
            Vector2::new(0.3, 0.3),
            Vector2::new(-0.3, -0.3),
        ]);
        assert!(matches!(
            duplicate,
            Err(ConfigError::DuplicateOffset { index: 2, other: 0, .. })
        ));

        let centered = SwerveKinematics::new([Vector2::zeros(); 4]);
        assert!(matches!(centered, Err(ConfigError::AllModulesCentered)));

        let nan = SwerveKinematics::new([
            Vector2::new(f64::NAN, 0.3),
            Vector2::new(0.3, -0.3),
            Vector2::new(-0.3, 0.3),
            Vector2::new(-0.3, -0.3),
        ]);
        assert!(matches!(nan, Err(ConfigError::NonFiniteOffset { index: 0 })));
    }

    #[test]
    fn test_desaturate_preserves_ratios() {
        let mut states = [
            ModuleState::new(4.0, 0.0),
            ModuleState::new(-2.0, 0.0),
            ModuleState::new(1.0, 0.0),
            ModuleState::new(0.0, 0.0),
        ];
        assert!(desaturate(&mut states, 2.0));
        assert_abs_diff_eq!(states[0].speed, 2.0);
        assert_abs_diff_eq!(states[1].speed, -1.0);
        assert_abs_diff_eq!(states[2].speed, 0.5);

        assert!(!desaturate(&mut states, 2.0), "already within limits");
    }
}
