// Timeouts, topics, drivetrain configuration
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::drive::kinematics::SwerveKinematics;

// Command timeout for watchdog
// Teleop publishes at ~50Hz, so a couple of missed packets still count as fresh
pub const CMD_TIMEOUT: Duration = Duration::from_millis(100);

// A module or heading reading older than this is treated as a sensor fault
pub const SENSOR_TIMEOUT: Duration = Duration::from_millis(40);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // commands
pub const TOPIC_RT_MODULES: &str = "swerve/rt/modules"; // actuation
pub const TOPIC_STATE_MODULES: &str = "swerve/state/modules"; // module encoders
pub const TOPIC_STATE_IMU: &str = "swerve/state/imu"; // heading sensor
pub const TOPIC_TELEMETRY: &str = "swerve/state/telemetry"; // pose + module states
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

/// Module order used everywhere in the crate
pub const MODULE_NAMES: [&str; 4] = ["front_left", "front_right", "back_left", "back_right"];

// Physical constants of the stock robot (NEO motors on SDS L3 modules)
const MOTOR_NOMINAL_VOLTAGE: f64 = 12.0;
const DRIVE_MOTOR_FREE_RPS: f64 = 5680.0 / 60.0;
const DRIVE_GEARBOX: f64 = 1.0 / 5.355;
const WHEEL_CIRCUMFERENCE_M: f64 = 0.099 * PI;

/// Wheel surface speed at free motor speed, m/s
fn theoretical_free_speed() -> f64 {
    DRIVE_MOTOR_FREE_RPS * DRIVE_GEARBOX * WHEEL_CIRCUMFERENCE_M
}

/// Error types for drivetrain configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Module {index} offset is not finite")]
    NonFiniteOffset { index: usize },

    #[error("Module {index} shares its offset ({x}, {y}) with module {other}")]
    DuplicateOffset {
        index: usize,
        other: usize,
        x: f64,
        y: f64,
    },

    #[error("Every module sits on the rotation center, angular velocity is undefined")]
    AllModulesCentered,

    #[error("Invalid {field}: {value} (must be {requirement})")]
    InvalidValue {
        field: &'static str,
        value: f64,
        requirement: &'static str,
    },
}

/// Azimuth gains: volts per radian of error (kp), volts per rad/s (kd)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthGains {
    /// Static friction feedforward, applied outside the tolerance band
    pub ks: f64,
    pub kp: f64,
    pub kd: f64,
    /// Error (radians) below which the module counts as settled
    pub tolerance: f64,
}

impl AzimuthGains {
    /// Build from gains tuned against errors measured in degrees
    pub fn from_degree_gains(ks: f64, kp_per_deg: f64, kd_per_deg: f64) -> Self {
        Self {
            ks,
            kp: kp_per_deg.to_degrees(),
            kd: kd_per_deg.to_degrees(),
            tolerance: 0.5_f64.to_radians(),
        }
    }
}

/// Drive gains shared by every module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveGains {
    /// Static friction feedforward, volts
    pub ks: f64,
    /// Velocity feedforward, volts per m/s
    pub kv: f64,
    /// Velocity error correction, volts per m/s
    pub kp: f64,
}

impl Default for DriveGains {
    fn default() -> Self {
        Self {
            ks: 0.1,
            kv: MOTOR_NOMINAL_VOLTAGE / theoretical_free_speed(),
            kp: 2.0,
        }
    }
}

/// Static description of one swerve module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Offset from the rotation center in meters, +x forward, +y left
    pub x: f64,
    pub y: f64,
    pub azimuth: AzimuthGains,
}

impl ModuleConfig {
    pub fn offset(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

/// Everything the drivetrain needs at startup. Loaded once, never re-validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivetrainConfig {
    /// Front-left, front-right, back-left, back-right
    pub modules: [ModuleConfig; 4],
    pub drive_gains: DriveGains,
    /// Chassis translation limit, m/s
    pub max_linear_velocity: f64,
    /// Chassis rotation limit, rad/s
    pub max_angular_velocity: f64,
    /// Fastest any single wheel may be commanded, m/s
    pub max_module_speed: f64,
    pub azimuth_max_voltage: f64,
    pub drive_max_voltage: f64,
    /// Forwarded to the actuator layer, which enforces them
    pub azimuth_current_limit: f64,
    pub drive_current_limit: f64,
    /// Control period in milliseconds
    pub period_ms: u64,
}

impl Default for DrivetrainConfig {
    fn default() -> Self {
        let module = |name: &str, x: f64, y: f64, gains: AzimuthGains| ModuleConfig {
            name: name.to_string(),
            x,
            y,
            azimuth: gains,
        };

        let modules = [
            module(
                MODULE_NAMES[0],
                0.14605,
                0.24765,
                AzimuthGains::from_degree_gains(0.1, 0.095, 0.0006),
            ),
            module(
                MODULE_NAMES[1],
                0.14605,
                -0.24765,
                AzimuthGains::from_degree_gains(0.092, 0.1, 0.00065),
            ),
            module(
                MODULE_NAMES[2],
                -0.24765,
                0.24765,
                AzimuthGains::from_degree_gains(0.08, 0.105, 0.0004),
            ),
            module(
                MODULE_NAMES[3],
                -0.24765,
                -0.24765,
                AzimuthGains::from_degree_gains(0.092, 0.09, 0.00065),
            ),
        ];

        // 75% of theoretical max
        let max_linear_velocity = theoretical_free_speed() * 0.75;

        // omega = velocity / radius of the module farthest from the center
        let drive_base_radius = modules
            .iter()
            .map(|m| m.offset().norm())
            .fold(0.0, f64::max);

        Self {
            modules,
            drive_gains: DriveGains::default(),
            max_linear_velocity,
            max_angular_velocity: max_linear_velocity / drive_base_radius,
            max_module_speed: max_linear_velocity,
            // To avoid brownouts and overpowering
            azimuth_max_voltage: 0.65 * MOTOR_NOMINAL_VOLTAGE,
            drive_max_voltage: 0.95 * MOTOR_NOMINAL_VOLTAGE,
            azimuth_current_limit: 30.0,
            drive_current_limit: 40.0,
            period_ms: 10,
        }
    }
}

impl DrivetrainConfig {
    /// Read a JSON config file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check geometry, gains and limits. Called once before building a drivetrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        SwerveKinematics::new(self.offsets())?;

        positive("max_linear_velocity", self.max_linear_velocity)?;
        positive("max_angular_velocity", self.max_angular_velocity)?;
        positive("max_module_speed", self.max_module_speed)?;
        positive("azimuth_max_voltage", self.azimuth_max_voltage)?;
        positive("drive_max_voltage", self.drive_max_voltage)?;
        positive("azimuth_current_limit", self.azimuth_current_limit)?;
        positive("drive_current_limit", self.drive_current_limit)?;

        if !(1..=100).contains(&self.period_ms) {
            return Err(ConfigError::InvalidValue {
                field: "period_ms",
                value: self.period_ms as f64,
                requirement: "between 1 and 100",
            });
        }

        non_negative("drive_gains.ks", self.drive_gains.ks)?;
        non_negative("drive_gains.kv", self.drive_gains.kv)?;
        non_negative("drive_gains.kp", self.drive_gains.kp)?;
        for module in &self.modules {
            non_negative("azimuth.ks", module.azimuth.ks)?;
            non_negative("azimuth.kp", module.azimuth.kp)?;
            non_negative("azimuth.kd", module.azimuth.kd)?;
            non_negative("azimuth.tolerance", module.azimuth.tolerance)?;
        }

        Ok(())
    }

    pub fn offsets(&self) -> [Vector2<f64>; 4] {
        [
            self.modules[0].offset(),
            self.modules[1].offset(),
            self.modules[2].offset(),
            self.modules[3].offset(),
        ]
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

pub(crate) fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            value,
            requirement: "finite and > 0",
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            value,
            requirement: "finite and >= 0",
        })
    }
}
