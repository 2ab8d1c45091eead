// Define message types for the runtime
// All payloads travel over zenoh as JSON.

use serde::{Deserialize, Serialize};

use crate::drive::{ChassisSpeeds, ModuleOutput, ModuleState, Pose2d};

// Command from teleop/autonomous -> runtime
// Motion commands must be re-sent continuously, the runtime stops the base when they go stale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveCommand {
    /// Velocities in the field frame (m/s, m/s, rad/s)
    FieldRelative { forward: f64, left: f64, ccw: f64 },
    /// Velocities in the body frame (m/s, m/s, rad/s)
    RobotRelative { forward: f64, left: f64, ccw: f64 },
    /// Lock the modules into an X
    Stance,
    ResetPose { x: f64, y: f64, heading: f64 },
    /// Make the current direction "forward", keep the position
    ResetHeading,
    Stop,
}

impl DriveCommand {
    /// Motion commands are subject to the watchdog, one-shot commands are not
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            DriveCommand::FieldRelative { .. } | DriveCommand::RobotRelative { .. } | DriveCommand::Stance
        )
    }
}

/// One module's encoders, as published by the hardware bridge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModuleReading {
    /// Azimuth in radians, counter-clockwise from forward
    pub azimuth: f64,
    /// Wheel surface speed in m/s
    pub velocity: f64,
}

impl From<ModuleReading> for ModuleState {
    fn from(reading: ModuleReading) -> Self {
        ModuleState::new(reading.velocity, reading.azimuth)
    }
}

// Module sensors from hardware bridge -> runtime
// A module the bridge could not read is sent as null
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ModuleSensorFrame {
    pub modules: [Option<ModuleReading>; 4],
}

// Orientation from the IMU -> runtime, radians
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct HeadingFrame {
    pub yaw: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
}

// Actuation output from runtime -> hardware bridge
// Current limits ride along so the bridge can enforce them on the motor controllers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DriveActuation {
    pub modules: [ModuleOutput; 4],
    pub drive_current_limit: f64,
    pub azimuth_current_limit: f64,
}

impl DriveActuation {
    pub fn is_zero(&self) -> bool {
        self.modules.iter().all(ModuleOutput::is_zero)
    }
}

/// Snapshot of the drivetrain taken at a cycle boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveTelemetry {
    pub pose: Pose2d,
    pub orientation: HeadingFrame,
    pub measured_states: [Option<ModuleState>; 4],
    pub commanded_states: [ModuleState; 4],
    pub measured_speeds: ChassisSpeeds,
    pub desired_speeds: ChassisSpeeds,
    pub faults: [bool; 4],
    pub stopped: bool,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    SensorFault,
}
