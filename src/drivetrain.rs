// Drivetrain orchestrator: the public control surface of the swerve base
//
// Commands only overwrite the desired command; `cycle()` consumes it once per
// control period, runs kinematics -> module controllers -> pose estimator and
// returns the voltages to write. Commands are not sticky: a cycle with no new
// command brings the base to rest.

use tracing::{debug, info, warn};

use crate::config::{ConfigError, DrivetrainConfig, MODULE_NAMES};
use crate::drive::{
    ChassisSpeeds, ModuleController, ModuleFault, ModuleOutput, ModuleState, Pose2d, PoseEstimator,
    SwerveKinematics, desaturate,
};
use crate::messages::{DriveTelemetry, HeadingFrame};
use crate::safety::{StopHandle, Stoppable};

/// X formation: FL, FR, BL, BR azimuths in degrees
pub const STANCE_ANGLES_DEG: [f64; 4] = [45.0, 135.0, 135.0, 45.0];

/// What the next cycle should do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DesiredCommand {
    /// Body-frame velocity
    Velocity(ChassisSpeeds),
    Stance,
}

/// Sensor readings for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CycleInputs {
    /// Measured module states, `None` for a missing or stale reading
    pub modules: [Option<ModuleState>; 4],
    /// Raw heading sensor reading in radians, `None` if unavailable
    pub heading: Option<f64>,
}

/// Result of one control cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Voltages to write this cycle
    pub outputs: [ModuleOutput; 4],
    pub faults: [Option<ModuleFault>; 4],
    /// A stop request overrode this cycle
    pub stopped: bool,
    /// The command exceeded the configured maxima and was clamped
    pub clamped: bool,
    pub pose: Pose2d,
}

impl CycleReport {
    pub fn has_fault(&self) -> bool {
        self.faults.iter().any(Option::is_some)
    }
}

pub struct Drivetrain {
    kinematics: SwerveKinematics,
    modules: [ModuleController; 4],
    estimator: PoseEstimator,
    max_linear_velocity: f64,
    max_angular_velocity: f64,
    max_module_speed: f64,
    desired: Option<DesiredCommand>,
    desired_speeds: ChassisSpeeds,
    faults: [Option<ModuleFault>; 4],
    stopped: bool,
    orientation: HeadingFrame,
    stop: StopHandle,
}

impl Drivetrain {
    /// Validate the configuration and build the component graph
    pub fn new(config: &DrivetrainConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let kinematics = SwerveKinematics::new(config.offsets())?;

        info!(
            "Drivetrain ready: max {:.2} m/s, {:.2} rad/s, {}ms period",
            config.max_linear_velocity, config.max_angular_velocity, config.period_ms
        );

        Ok(Self {
            estimator: PoseEstimator::new(kinematics.clone(), Pose2d::origin(), config.max_linear_velocity),
            kinematics,
            modules: std::array::from_fn(|i| ModuleController::new(i, config)),
            max_linear_velocity: config.max_linear_velocity,
            max_angular_velocity: config.max_angular_velocity,
            max_module_speed: config.max_module_speed,
            desired: None,
            desired_speeds: ChassisSpeeds::zero(),
            faults: [None; 4],
            stopped: false,
            orientation: HeadingFrame::default(),
            stop: StopHandle::new("drivetrain"),
        })
    }

    /// Drive with field relative velocities. Must be called every cycle.
    ///
    /// * `forward` - field +x speed (m/s)
    /// * `left` - field +y speed (m/s)
    /// * `ccw` - counter-clockwise speed (rad/s)
    pub fn drive_field_relative(&mut self, forward: f64, left: f64, ccw: f64) {
        let speeds = ChassisSpeeds::from_field_relative(forward, left, ccw, self.pose().heading);
        self.drive_body_relative(speeds.vx, speeds.vy, speeds.omega);
    }

    /// Drive with body relative velocities. Must be called every cycle.
    pub fn drive_body_relative(&mut self, forward: f64, left: f64, ccw: f64) {
        self.desired = Some(DesiredCommand::Velocity(ChassisSpeeds::new(forward, left, ccw)));
    }

    /// Lock the modules into an X for traction. Must be called every cycle.
    pub fn to_stance_lock(&mut self) {
        self.desired = Some(DesiredCommand::Stance);
    }

    pub fn reset_pose(&mut self, pose: Pose2d) {
        self.estimator.reset(pose);
    }

    /// Make the current direction the field's forward, keeping the position
    pub fn reset_heading(&mut self) {
        let pose = self.pose();
        self.reset_pose(Pose2d::new(pose.x, pose.y, 0.0));
    }

    /// Zero every actuator on the next write. Callable from anywhere through `stop_handle()`.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Record the full orientation for telemetry. Only yaw feeds the estimator.
    pub fn set_orientation(&mut self, orientation: HeadingFrame) {
        self.orientation = orientation;
    }

    pub fn pose(&self) -> Pose2d {
        self.estimator.pose()
    }

    pub fn measured_module_states(&self) -> [Option<ModuleState>; 4] {
        std::array::from_fn(|i| self.modules[i].measured())
    }

    pub fn commanded_module_states(&self) -> [ModuleState; 4] {
        std::array::from_fn(|i| self.modules[i].commanded())
    }

    pub fn measured_speeds(&self) -> ChassisSpeeds {
        self.estimator.velocity()
    }

    pub fn desired_speeds(&self) -> ChassisSpeeds {
        self.desired_speeds
    }

    pub fn faults(&self) -> [Option<ModuleFault>; 4] {
        self.faults
    }

    pub fn telemetry(&self) -> DriveTelemetry {
        DriveTelemetry {
            pose: self.pose(),
            orientation: self.orientation,
            measured_states: self.measured_module_states(),
            commanded_states: self.commanded_module_states(),
            measured_speeds: self.measured_speeds(),
            desired_speeds: self.desired_speeds,
            faults: self.faults.map(|f| f.is_some()),
            stopped: self.stopped,
        }
    }

    /// Clamp a body velocity to the configured maxima
    fn clamp_speeds(&self, speeds: ChassisSpeeds) -> (ChassisSpeeds, bool) {
        if !speeds.is_finite() {
            warn!("Ignoring non-finite drive command {:?}", speeds);
            return (ChassisSpeeds::zero(), true);
        }

        let mut clamped = speeds;
        let linear = speeds.linear().norm();
        if linear > self.max_linear_velocity {
            let scale = self.max_linear_velocity / linear;
            clamped.vx *= scale;
            clamped.vy *= scale;
        }
        clamped.omega = speeds
            .omega
            .clamp(-self.max_angular_velocity, self.max_angular_velocity);

        let was_clamped = clamped != speeds;
        if was_clamped {
            debug!("Command {:?} clamped to {:?}", speeds, clamped);
        }
        (clamped, was_clamped)
    }

    /// Module targets for this cycle's command
    fn targets(&mut self, command: Option<DesiredCommand>, inputs: &CycleInputs) -> ([ModuleState; 4], bool) {
        // Idle modules hold their measured azimuth, or the last command if blind
        let hold: [f64; 4] = std::array::from_fn(|i| {
            inputs.modules[i]
                .map(|m| m.angle)
                .unwrap_or_else(|| self.modules[i].commanded().angle)
        });

        match command {
            Some(DesiredCommand::Stance) => {
                self.desired_speeds = ChassisSpeeds::zero();
                (STANCE_ANGLES_DEG.map(|deg| ModuleState::parked(deg.to_radians())), false)
            }
            Some(DesiredCommand::Velocity(speeds)) => {
                let (speeds, clamped) = self.clamp_speeds(speeds);
                self.desired_speeds = speeds;
                let mut targets = self.kinematics.to_module_targets(&speeds, &hold);
                if desaturate(&mut targets, self.max_module_speed) {
                    debug!("Module speeds desaturated to {:.2} m/s", self.max_module_speed);
                }
                (targets, clamped)
            }
            // Nobody asked for anything this cycle: come to rest
            None => {
                self.desired_speeds = ChassisSpeeds::zero();
                (hold.map(ModuleState::parked), false)
            }
        }
    }

    /// Run one control cycle
    ///
    /// Never fails: a faulted module is zeroed for this cycle while the others
    /// and the pose estimator carry on. A pending stop request, whether it
    /// arrived before or during the cycle, zeroes every output.
    pub fn cycle(&mut self, inputs: &CycleInputs, dt: f64) -> CycleReport {
        let command = self.desired.take();
        let stop_requested = self.stop.take();

        let mut outputs = [ModuleOutput::zero(); 4];
        let mut faults: [Option<ModuleFault>; 4] = [None; 4];
        let mut clamped = false;

        if stop_requested {
            for (i, module) in self.modules.iter_mut().enumerate() {
                module.stop();
                if let Err(fault) = module.observe(inputs.modules[i]) {
                    faults[i] = Some(fault);
                }
            }
            self.desired_speeds = ChassisSpeeds::zero();
        } else {
            let (targets, was_clamped) = self.targets(command, inputs);
            clamped = was_clamped;

            for (i, module) in self.modules.iter_mut().enumerate() {
                match module.update(targets[i], inputs.modules[i], dt) {
                    Ok(output) => outputs[i] = output,
                    Err(fault) => faults[i] = Some(fault),
                }
            }
        }

        self.log_fault_transitions(&faults);
        self.faults = faults;

        // Faulted modules don't feed odometry, the rest still do
        let odometry: [Option<ModuleState>; 4] =
            std::array::from_fn(|i| inputs.modules[i].filter(|_| faults[i].is_none()));
        let pose = self.estimator.update(&odometry, inputs.heading, dt);

        // A stop that raced the cycle still wins
        let stopped = stop_requested || self.stop.take();
        if stopped {
            outputs = [ModuleOutput::zero(); 4];
            for module in self.modules.iter_mut() {
                module.stop();
            }
            self.desired_speeds = ChassisSpeeds::zero();
            if !self.stopped {
                info!("Drivetrain stopped");
            }
        }
        self.stopped = stopped;

        CycleReport {
            outputs,
            faults,
            stopped,
            clamped,
            pose,
        }
    }

    fn log_fault_transitions(&self, faults: &[Option<ModuleFault>; 4]) {
        for (i, (before, now)) in self.faults.iter().zip(faults).enumerate() {
            match (before, now) {
                (None, Some(fault)) => warn!("{} faulted: {}", MODULE_NAMES[i], fault),
                (Some(_), None) => info!("{} recovered", MODULE_NAMES[i]),
                _ => {}
            }
        }
    }
}

impl Stoppable for Drivetrain {
    fn name(&self) -> &str {
        "drivetrain"
    }

    fn stop(&self) {
        Drivetrain::stop(self);
    }
}
