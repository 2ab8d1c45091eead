// Simulated swerve base for running without hardware (--sim) and for closed-loop tests
//
// Each module is a voltage-driven azimuth (velocity proportional to volts)
// and a first-order drive wheel. The chassis moves with the least-squares
// velocity of the four wheels; the simulated IMU reports the true heading.

use tracing::debug;

use crate::config::{ConfigError, DrivetrainConfig, positive};
use crate::drive::{ModuleOutput, ModuleState, Pose2d, SwerveKinematics, wrap_angle};
use crate::drivetrain::CycleInputs;
use crate::messages::{HeadingFrame, ModuleReading, ModuleSensorFrame};

/// Azimuth slew rate per volt, rad/s/V
const AZIMUTH_RAD_PER_VOLT: f64 = 3.0;

/// Drive wheel time constant, seconds
const DRIVE_TIME_CONSTANT: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
struct SimModule {
    azimuth: f64,
    velocity: f64,
}

pub struct SimPlant {
    kinematics: SwerveKinematics,
    modules: [SimModule; 4],
    pose: Pose2d,
    /// Steady-state volts per m/s of the drive wheels
    drive_kv: f64,
    /// Volts lost to static friction before a wheel moves
    drive_friction: f64,
    module_failed: [bool; 4],
    heading_failed: bool,
}

impl SimPlant {
    /// A plant whose drive wheels match the configured feedforward exactly
    ///
    /// The wheels' steady-state speed is volts / kV, so kV must be positive here
    /// even though the controller alone accepts zero.
    pub fn new(config: &DrivetrainConfig) -> Result<Self, ConfigError> {
        positive("drive_gains.kv", config.drive_gains.kv)?;
        Ok(Self {
            kinematics: SwerveKinematics::new(config.offsets())?,
            modules: [SimModule::default(); 4],
            pose: Pose2d::origin(),
            drive_kv: config.drive_gains.kv,
            drive_friction: config.drive_gains.ks,
            module_failed: [false; 4],
            heading_failed: false,
        })
    }

    /// Ground truth pose
    pub fn true_pose(&self) -> Pose2d {
        self.pose
    }

    pub fn module_state(&self, index: usize) -> ModuleState {
        let module = self.modules[index];
        ModuleState::new(module.velocity, module.azimuth)
    }

    /// Make a module's encoders go silent (the module itself keeps moving)
    pub fn set_module_failed(&mut self, index: usize, failed: bool) {
        self.module_failed[index] = failed;
    }

    pub fn set_heading_failed(&mut self, failed: bool) {
        self.heading_failed = failed;
    }

    /// Sensor readings as the drivetrain sees them
    pub fn read(&self) -> CycleInputs {
        CycleInputs {
            modules: std::array::from_fn(|i| {
                (!self.module_failed[i]).then(|| self.module_state(i))
            }),
            heading: (!self.heading_failed).then_some(self.pose.heading),
        }
    }

    /// Module readings in wire format
    pub fn sensor_frame(&self) -> ModuleSensorFrame {
        ModuleSensorFrame {
            modules: std::array::from_fn(|i| {
                (!self.module_failed[i]).then(|| ModuleReading {
                    azimuth: self.modules[i].azimuth,
                    velocity: self.modules[i].velocity,
                })
            }),
        }
    }

    pub fn heading_frame(&self) -> HeadingFrame {
        HeadingFrame {
            yaw: self.pose.heading,
            ..HeadingFrame::default()
        }
    }

    /// Apply one period of actuator output
    pub fn step(&mut self, outputs: &[ModuleOutput; 4], dt: f64) {
        let alpha = dt / (DRIVE_TIME_CONSTANT + dt);

        for (module, output) in self.modules.iter_mut().zip(outputs) {
            module.azimuth = wrap_angle(module.azimuth + output.azimuth_volts * AZIMUTH_RAD_PER_VOLT * dt);

            let volts = output.drive_volts;
            let effective = if volts.abs() > self.drive_friction {
                volts - self.drive_friction * volts.signum()
            } else {
                0.0
            };
            let target = effective / self.drive_kv;
            module.velocity += alpha * (target - module.velocity);
        }

        let states: [ModuleState; 4] = std::array::from_fn(|i| self.module_state(i));
        let chassis = self.kinematics.to_body_velocity(&states);
        self.pose = self
            .pose
            .exp(chassis.vx * dt, chassis.vy * dt, chassis.omega * dt);

        debug!("Sim chassis {:?} -> pose {:?}", chassis, self.pose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::Drivetrain;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 0.01;

    fn setup() -> (Drivetrain, SimPlant) {
        let config = DrivetrainConfig::default();
        (Drivetrain::new(&config).unwrap(), SimPlant::new(&config).unwrap())
    }

    /// Run `cycles` control periods, issuing `command` every cycle
    fn run(
        drivetrain: &mut Drivetrain,
        plant: &mut SimPlant,
        cycles: usize,
        mut command: impl FnMut(&mut Drivetrain),
    ) {
        for _ in 0..cycles {
            command(drivetrain);
            let report = drivetrain.cycle(&plant.read(), DT);
            plant.step(&report.outputs, DT);
        }
    }

    #[test]
    fn test_drive_forward_tracks_truth() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 200, |d| d.drive_field_relative(1.0, 0.0, 0.0));

        let truth = plant.true_pose();
        let estimate = drivetrain.pose();
        assert!(truth.x > 1.7 && truth.x < 2.0, "true x = {}", truth.x);
        assert_abs_diff_eq!(estimate.x, truth.x, epsilon = 0.05);
        assert_abs_diff_eq!(estimate.y, truth.y, epsilon = 0.01);
        assert_abs_diff_eq!(drivetrain.measured_speeds().vx, 1.0, epsilon = 0.02);
    }

    #[test]
    fn test_one_second_at_one_meter_per_second() {
        let (mut drivetrain, mut plant) = setup();
        // Let the wheels spin up first
        run(&mut drivetrain, &mut plant, 100, |d| d.drive_body_relative(1.0, 0.0, 0.0));

        drivetrain.reset_pose(Pose2d::origin());
        run(&mut drivetrain, &mut plant, 100, |d| d.drive_body_relative(1.0, 0.0, 0.0));

        let pose = drivetrain.pose();
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 0.03);
        assert_abs_diff_eq!(pose.y, 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_strafe_turns_modules_less_than_quarter() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 100, |d| d.drive_body_relative(0.0, 1.0, 0.0));

        for i in 0..4 {
            let azimuth = plant.module_state(i).angle;
            assert!(
                azimuth.abs() <= std::f64::consts::FRAC_PI_2 + 0.05,
                "module {} swung to {}",
                i,
                azimuth
            );
        }
        assert!(plant.true_pose().y > 0.5);
    }

    #[test]
    fn test_rotate_in_place_uses_sensor_heading() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 200, |d| d.drive_body_relative(0.0, 0.0, 1.0));

        let truth = plant.true_pose();
        assert!(truth.heading > 1.0 && truth.heading < 2.1, "heading {}", truth.heading);
        // The estimate reads the sensor before the plant steps, so it trails by one cycle
        assert_abs_diff_eq!(drivetrain.pose().heading, truth.heading, epsilon = 0.02);
        assert!(truth.translation().norm() < 0.05);
    }

    #[test]
    fn test_stance_settles_into_x() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 100, |d| d.to_stance_lock());

        for (i, expected) in [45.0f64, 135.0, 135.0, 45.0].iter().enumerate() {
            let folded = plant.module_state(i).angle.rem_euclid(std::f64::consts::PI);
            assert_abs_diff_eq!(folded.to_degrees(), *expected, epsilon = 1.0);
        }
        assert!(plant.true_pose().translation().norm() < 1e-6);
    }

    #[test]
    fn test_base_comes_to_rest_without_commands() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 50, |d| d.drive_body_relative(1.0, 0.0, 0.0));
        run(&mut drivetrain, &mut plant, 100, |_| {});

        for i in 0..4 {
            assert!(plant.module_state(i).speed.abs() < 0.01);
        }
    }

    #[test]
    fn test_failed_module_is_isolated() {
        let (mut drivetrain, mut plant) = setup();
        plant.set_module_failed(1, true);

        drivetrain.drive_body_relative(1.0, 0.0, 0.0);
        let report = drivetrain.cycle(&plant.read(), DT);
        assert!(report.outputs[1].is_zero());
        assert!(report.faults[1].is_some());
        for i in [0, 2, 3] {
            assert!(report.outputs[i].drive_volts > 0.0);
        }
        plant.step(&report.outputs, DT);

        // Three healthy modules are enough for odometry
        run(&mut drivetrain, &mut plant, 100, |d| d.drive_body_relative(1.0, 0.0, 0.0));
        assert!(drivetrain.pose().x > 0.5);
    }

    #[test]
    fn test_heading_dropout_dead_reckons() {
        let (mut drivetrain, mut plant) = setup();
        run(&mut drivetrain, &mut plant, 50, |d| d.drive_body_relative(0.0, 0.0, 1.0));

        plant.set_heading_failed(true);
        assert!(plant.read().heading.is_none());
        run(&mut drivetrain, &mut plant, 50, |d| d.drive_body_relative(0.0, 0.0, 1.0));

        // Wheel-derived rotation keeps the estimate close to the truth
        let truth = plant.true_pose();
        assert_abs_diff_eq!(drivetrain.pose().heading, truth.heading, epsilon = 0.05);

        plant.set_heading_failed(false);
        run(&mut drivetrain, &mut plant, 1, |_| {});
        assert_abs_diff_eq!(drivetrain.pose().heading, plant.true_pose().heading, epsilon = 0.02);
    }

    #[test]
    fn test_rejects_zero_drive_kv() {
        let mut config = DrivetrainConfig::default();
        config.drive_gains.kv = 0.0;
        assert!(config.validate().is_ok());
        assert!(matches!(
            SimPlant::new(&config),
            Err(ConfigError::InvalidValue {
                field: "drive_gains.kv",
                ..
            })
        ));
    }

    #[test]
    fn test_sensor_frames() {
        let (_, mut plant) = setup();
        plant.set_module_failed(3, true);
        let frame = plant.sensor_frame();
        assert!(frame.modules[0].is_some());
        assert!(frame.modules[3].is_none());
        assert_eq!(plant.heading_frame().yaw, 0.0);
    }
}
