// Pose estimation from module odometry and an absolute heading sensor
//
// Translation comes from the wheels (least squares over the measured module
// vectors), heading comes from the sensor. Wheel-derived rotation is only used
// when the heading sensor drops out.

use tracing::{debug, info, warn};

use super::geometry::{ChassisSpeeds, ModuleState, Pose2d, wrap_angle};
use super::kinematics::SwerveKinematics;

#[derive(Debug, Clone)]
pub struct PoseEstimator {
    kinematics: SwerveKinematics,
    pose: Pose2d,
    /// Fastest the base can translate, m/s. Wheel readings implying more are scaled down.
    max_linear_velocity: f64,
    /// Added to the raw sensor heading to get the field heading
    heading_offset: f64,
    /// Most recent raw sensor heading, the sensor is zeroed at boot
    last_sensor_heading: f64,
    velocity: ChassisSpeeds,
    wheels_degraded: bool,
    heading_degraded: bool,
}

impl PoseEstimator {
    pub fn new(kinematics: SwerveKinematics, initial: Pose2d, max_linear_velocity: f64) -> Self {
        Self {
            kinematics,
            pose: initial,
            max_linear_velocity,
            heading_offset: initial.heading,
            last_sensor_heading: 0.0,
            velocity: ChassisSpeeds::zero(),
            wheels_degraded: false,
            heading_degraded: false,
        }
    }

    pub fn pose(&self) -> Pose2d {
        self.pose
    }

    /// Body velocity measured on the last update
    pub fn velocity(&self) -> ChassisSpeeds {
        self.velocity
    }

    /// Replace the pose outright. History before the reset no longer matters.
    ///
    /// The heading offset is re-derived from the latest sensor reading so the
    /// next update continues from `pose.heading`.
    pub fn reset(&mut self, pose: Pose2d) {
        info!(
            "Pose reset to ({:.3}, {:.3}, {:.1}°)",
            pose.x,
            pose.y,
            pose.heading.to_degrees()
        );
        self.heading_offset = wrap_angle(pose.heading - self.last_sensor_heading);
        self.pose = Pose2d::new(pose.x, pose.y, wrap_angle(pose.heading));
        self.velocity = ChassisSpeeds::zero();
    }

    /// Integrate one cycle of motion
    ///
    /// * `measurements` - per-module state, `None` for a faulted module. A reading
    ///   with a non-finite field is treated as `None`.
    /// * `sensor_heading` - raw heading sensor reading in radians, `None` if unavailable
    /// * `dt` - seconds since the previous update
    pub fn update(
        &mut self,
        measurements: &[Option<ModuleState>; 4],
        sensor_heading: Option<f64>,
        dt: f64,
    ) -> Pose2d {
        let usable = measurements.map(|m| m.filter(|m| m.speed.is_finite() && m.angle.is_finite()));

        let velocity = match self.kinematics.to_body_velocity_partial(&usable) {
            Some(v) if v.is_finite() => {
                if self.wheels_degraded {
                    info!("Wheel odometry recovered");
                    self.wheels_degraded = false;
                }
                self.bound(v)
            }
            _ => {
                if !self.wheels_degraded {
                    warn!("Too few module measurements for odometry, holding position");
                    self.wheels_degraded = true;
                }
                ChassisSpeeds::zero()
            }
        };

        let heading = match sensor_heading.filter(|h| h.is_finite()) {
            Some(raw) => {
                if self.heading_degraded {
                    info!("Heading sensor recovered");
                    self.heading_degraded = false;
                }
                self.last_sensor_heading = raw;
                wrap_angle(raw + self.heading_offset)
            }
            None => {
                if !self.heading_degraded {
                    warn!("Heading sensor unavailable, dead reckoning from wheels");
                    self.heading_degraded = true;
                }
                wrap_angle(self.pose.heading + velocity.omega * dt)
            }
        };

        let dtheta = wrap_angle(heading - self.pose.heading);
        let mut pose = self.pose.exp(velocity.vx * dt, velocity.vy * dt, dtheta);
        // The sensor is authoritative, don't let rounding in exp drift it
        pose.heading = heading;

        self.pose = pose;
        self.velocity = velocity;
        pose
    }

    /// Scale the translation down to the physical maximum, keeping its direction
    fn bound(&self, velocity: ChassisSpeeds) -> ChassisSpeeds {
        let linear = velocity.linear().norm();
        if linear <= self.max_linear_velocity {
            return velocity;
        }
        debug!(
            "Wheel odometry implies {:.2} m/s, bounding to {:.2} m/s",
            linear, self.max_linear_velocity
        );
        let scale = self.max_linear_velocity / linear;
        ChassisSpeeds::new(velocity.vx * scale, velocity.vy * scale, velocity.omega)
    }
}
