// Closed-loop control of a single swerve module
//
// Target (speed, heading) + measured (speed, azimuth) -> drive and azimuth voltages.

use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

use super::geometry::{ModuleState, wrap_angle};
use crate::config::{AzimuthGains, DriveGains, DrivetrainConfig};

/// Commanded speeds below this (m/s) get no static friction feedforward
const DRIVE_DEADBAND: f64 = 1e-3;

/// Errors this close to 90 degrees count as a tie
const TIE_EPSILON: f64 = 1e-9;

/// Why a module could not be driven this cycle
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ModuleFault {
    #[error("Module {index} measurement is stale or missing")]
    SensorFault { index: usize },

    #[error("Module {index} produced a non-finite output")]
    NonFiniteOutput { index: usize },
}

/// Voltages for the two motors of a module
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub drive_volts: f64,
    pub azimuth_volts: f64,
}

impl ModuleOutput {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.drive_volts == 0.0 && self.azimuth_volts == 0.0
    }
}

/// Pick the cheaper of the two equivalent ways to reach `target`.
///
/// Returns the optimized state and the remaining azimuth error, which is
/// always within [-90, 90] degrees. At 90 degrees (within `TIE_EPSILON`) the
/// module keeps its speed sign and turns instead of reversing.
pub fn optimize(target: ModuleState, measured_angle: f64) -> (ModuleState, f64) {
    let error = wrap_angle(target.angle - measured_angle);

    if error.abs() > FRAC_PI_2 + TIE_EPSILON {
        let flipped_error = wrap_angle(error - PI);
        (
            ModuleState::new(-target.speed, wrap_angle(measured_angle + flipped_error)),
            flipped_error,
        )
    } else {
        (
            ModuleState::new(target.speed, wrap_angle(measured_angle + error)),
            error,
        )
    }
}

/// Per-module controller state. Only remembers what the next cycle's error terms need.
#[derive(Debug, Clone)]
pub struct ModuleController {
    index: usize,
    azimuth_gains: AzimuthGains,
    drive_gains: DriveGains,
    azimuth_max_voltage: f64,
    drive_max_voltage: f64,
    prev_error: Option<f64>,
    measured: Option<ModuleState>,
    commanded: ModuleState,
}

impl ModuleController {
    pub fn new(index: usize, config: &DrivetrainConfig) -> Self {
        Self {
            index,
            azimuth_gains: config.modules[index].azimuth,
            drive_gains: config.drive_gains,
            azimuth_max_voltage: config.azimuth_max_voltage,
            drive_max_voltage: config.drive_max_voltage,
            prev_error: None,
            measured: None,
            commanded: ModuleState::default(),
        }
    }

    /// Last valid measurement, `None` while the module is faulted
    pub fn measured(&self) -> Option<ModuleState> {
        self.measured
    }

    /// Optimized target from the last cycle
    pub fn commanded(&self) -> ModuleState {
        self.commanded
    }

    /// Compute motor voltages for this cycle
    ///
    /// A missing measurement is a `SensorFault`; the caller is expected to
    /// zero this module's output instead of acting on a stale target.
    pub fn update(
        &mut self,
        target: ModuleState,
        measurement: Option<ModuleState>,
        dt: f64,
    ) -> Result<ModuleOutput, ModuleFault> {
        let Some(measured) = measurement else {
            self.stop();
            self.measured = None;
            return Err(ModuleFault::SensorFault { index: self.index });
        };

        let (optimized, error) = optimize(target, measured.angle);

        // Azimuth: PD on the wrapped error plus static friction outside the tolerance band
        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => wrap_angle(error - prev) / dt,
            _ => 0.0,
        };
        let friction = if error.abs() > self.azimuth_gains.tolerance {
            self.azimuth_gains.ks * error.signum()
        } else {
            0.0
        };
        let azimuth_volts = (self.azimuth_gains.kp * error
            + self.azimuth_gains.kd * derivative
            + friction)
            .clamp(-self.azimuth_max_voltage, self.azimuth_max_voltage);

        // Drive: only push along the direction the wheel actually points
        let speed = optimized.speed * error.cos();
        let friction = if speed.abs() > DRIVE_DEADBAND {
            self.drive_gains.ks * speed.signum()
        } else {
            0.0
        };
        let drive_volts = (friction
            + self.drive_gains.kv * speed
            + self.drive_gains.kp * (speed - measured.speed))
            .clamp(-self.drive_max_voltage, self.drive_max_voltage);

        if !drive_volts.is_finite() || !azimuth_volts.is_finite() {
            self.stop();
            self.measured = None;
            return Err(ModuleFault::NonFiniteOutput { index: self.index });
        }

        self.prev_error = Some(error);
        self.measured = Some(measured);
        self.commanded = optimized;

        Ok(ModuleOutput {
            drive_volts,
            azimuth_volts,
        })
    }

    /// Record this cycle's measurement without driving the module
    ///
    /// Used on cycles whose outputs are forced to zero, so the stored
    /// measurement still reflects the cycle boundary.
    pub fn observe(&mut self, measurement: Option<ModuleState>) -> Result<(), ModuleFault> {
        match measurement {
            None => {
                self.measured = None;
                Err(ModuleFault::SensorFault { index: self.index })
            }
            Some(m) if !m.speed.is_finite() || !m.angle.is_finite() => {
                self.measured = None;
                Err(ModuleFault::NonFiniteOutput { index: self.index })
            }
            Some(m) => {
                self.measured = Some(m);
                Ok(())
            }
        }
    }

    /// Forget the loop history and command zero speed at the current heading
    pub fn stop(&mut self) {
        self.prev_error = None;
        self.commanded = ModuleState::parked(self.commanded.angle);
    }
}
