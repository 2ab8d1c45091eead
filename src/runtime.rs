// Fixed-rate control loop with command watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if teleop crashes and stops sending commands, the base would keep driving
// with the last velocity it was given

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, DrivetrainConfig, SENSOR_TIMEOUT, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_RT_MODULES,
    TOPIC_STATE_IMU, TOPIC_STATE_MODULES, TOPIC_TELEMETRY,
};
use crate::drive::{ModuleOutput, ModuleState, Pose2d};
use crate::drivetrain::{CycleInputs, CycleReport, Drivetrain};
use crate::messages::{
    DriveActuation, DriveCommand, DriveTelemetry, HeadingFrame, ModuleSensorFrame, RuntimeHealth,
};
use crate::safety::SafetyRegistry;
use crate::sim::SimPlant;

/// How the runtime was started
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: DrivetrainConfig,
    /// Drive an in-process simulated base instead of the hardware bridge
    pub sim: bool,
}

pub struct Runtime {
    drivetrain: Drivetrain,
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    modules: ModuleSensorFrame,
    modules_received_at: Option<Instant>,
    heading: HeadingFrame,
    heading_received_at: Option<Instant>,
    drive_current_limit: f64,
    azimuth_current_limit: f64,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(drivetrain: Drivetrain, config: &DrivetrainConfig) -> Self {
        Self {
            drivetrain,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            modules: ModuleSensorFrame::default(),
            modules_received_at: None,
            heading: HeadingFrame::default(),
            heading_received_at: None,
            drive_current_limit: config.drive_current_limit,
            azimuth_current_limit: config.azimuth_current_limit,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    ///
    /// One-shot commands act immediately (between cycles); motion commands are
    /// remembered and reissued by the watchdog while they are fresh.
    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) {
        match cmd {
            DriveCommand::Stop => {
                info!("Stop command received");
                self.drivetrain.stop();
                self.latest_cmd = None;
            }
            DriveCommand::ResetPose { x, y, heading } => {
                self.drivetrain.reset_pose(Pose2d::new(x, y, heading));
            }
            DriveCommand::ResetHeading => {
                self.drivetrain.reset_heading();
            }
            _ => {
                self.latest_cmd = Some(cmd);
                self.cmd_received_at = now;
            }
        }
    }

    pub fn on_modules(&mut self, frame: ModuleSensorFrame, now: Instant) {
        self.modules = frame;
        self.modules_received_at = Some(now);
    }

    pub fn on_heading(&mut self, frame: HeadingFrame, now: Instant) {
        self.heading = frame;
        self.heading_received_at = Some(now);
        self.drivetrain.set_orientation(frame);
    }

    /// Latest sensor readings, with anything older than `SENSOR_TIMEOUT` dropped
    pub fn sensor_inputs(&self, now: Instant) -> CycleInputs {
        let fresh = |at: Option<Instant>| at.is_some_and(|t| now.saturating_duration_since(t) <= SENSOR_TIMEOUT);

        let modules = if fresh(self.modules_received_at) {
            self.modules.modules.map(|m| m.map(ModuleState::from))
        } else {
            [None; 4]
        };
        let heading = fresh(self.heading_received_at).then_some(self.heading.yaw);

        CycleInputs { modules, heading }
    }

    /// Reissue the latest motion command if it is still fresh
    fn apply_command(&mut self, now: Instant) -> bool {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        match self.latest_cmd {
            Some(_) if cmd_age > CMD_TIMEOUT => {
                // Watchdog triggered - let the drivetrain come to rest
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:?} old), stopping base", cmd_age);
                }
                false
            }
            Some(DriveCommand::FieldRelative { forward, left, ccw }) => {
                self.drivetrain.drive_field_relative(forward, left, ccw);
                true
            }
            Some(DriveCommand::RobotRelative { forward, left, ccw }) => {
                self.drivetrain.drive_body_relative(forward, left, ccw);
                true
            }
            Some(DriveCommand::Stance) => {
                self.drivetrain.to_stance_lock();
                true
            }
            // No command ever received
            _ => false,
        }
    }

    /// One control period: watchdog, drivetrain cycle, health
    pub fn step(&mut self, inputs: &CycleInputs, dt: f64, now: Instant) -> (DriveActuation, CycleReport) {
        let cmd_fresh = self.apply_command(now);
        let report = self.drivetrain.cycle(inputs, dt);

        let health = if report.has_fault() {
            RuntimeHealth::SensorFault
        } else if cmd_fresh {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::CmdStale
        };
        if health != self.health {
            info!("Health: {:?} -> {:?}", self.health, health);
        }
        self.health = health;

        (self.actuation(report.outputs), report)
    }

    fn actuation(&self, modules: [ModuleOutput; 4]) -> DriveActuation {
        DriveActuation {
            modules,
            drive_current_limit: self.drive_current_limit,
            azimuth_current_limit: self.azimuth_current_limit,
        }
    }

    pub fn telemetry(&self) -> DriveTelemetry {
        self.drivetrain.telemetry()
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8], what: &str) -> Option<T> {
    match serde_json::from_slice::<T>(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse {}: {}", what, e);
            None
        }
    }
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let drivetrain = Drivetrain::new(&opts.config)?;
    let mut registry = SafetyRegistry::new();
    registry.register(drivetrain.stop_handle());

    let mut plant = if opts.sim {
        info!("Simulation mode: driving an in-process swerve model");
        Some(SimPlant::new(&opts.config)?)
    } else {
        None
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_modules = session.declare_subscriber(TOPIC_STATE_MODULES).await?;
    let sub_imu = session.declare_subscriber(TOPIC_STATE_IMU).await?;
    let pub_actuation = session.declare_publisher(TOPIC_RT_MODULES).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let period = opts.config.period();
    let mut runtime = Runtime::new(drivetrain, &opts.config);
    let mut tick = interval(period);
    let mut last_tick = Instant::now().checked_sub(period).unwrap_or_else(Instant::now);

    info!(
        "Runtime started: {}ms period, {}ms watchdog timeout",
        period.as_millis(),
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}, {}", TOPIC_CMD_DRIVE, TOPIC_STATE_MODULES, TOPIC_STATE_IMU);
    info!("Publishing to: {}, {}, {}", TOPIC_RT_MODULES, TOPIC_TELEMETRY, TOPIC_HEALTH);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, stopping");
                registry.stop_all();
                break;
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last_tick).max(Duration::from_millis(1)).as_secs_f64();
        last_tick = now;

        // 1. Drain all pending messages (non-blocking)
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(cmd) = parse::<DriveCommand>(&payload, "command") {
                runtime.on_command(cmd, now);
            }
        }
        while let Ok(Some(sample)) = sub_modules.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(frame) = parse::<ModuleSensorFrame>(&payload, "module frame") {
                runtime.on_modules(frame, now);
            }
        }
        while let Ok(Some(sample)) = sub_imu.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(frame) = parse::<HeadingFrame>(&payload, "heading frame") {
                runtime.on_heading(frame, now);
            }
        }

        // 2. Read sensors
        let inputs = match plant.as_ref() {
            Some(plant) => {
                runtime.on_heading(plant.heading_frame(), now);
                plant.read()
            }
            None => runtime.sensor_inputs(now),
        };

        // 3. Run the cycle (includes watchdog logic)
        let (actuation, report) = runtime.step(&inputs, dt, now);
        if let Some(plant) = plant.as_mut() {
            plant.step(&report.outputs, dt);
        }

        // 4. Publish actuation, telemetry, health
        pub_actuation.put(serde_json::to_string(&actuation)?).await?;
        pub_telemetry.put(serde_json::to_string(&runtime.telemetry())?).await?;
        pub_health.put(serde_json::to_string(&runtime.health())?).await?;
    }

    // The stop latch set above zeroes this last write
    let now = Instant::now();
    let inputs = match plant.as_ref() {
        Some(plant) => plant.read(),
        None => runtime.sensor_inputs(now),
    };
    let (actuation, _) = runtime.step(&inputs, period.as_secs_f64(), now);
    pub_actuation.put(serde_json::to_string(&actuation)?).await?;
    info!("Actuators zeroed, runtime exiting");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ModuleReading;

    const DT: f64 = 0.01;

    fn runtime() -> Runtime {
        let config = DrivetrainConfig::default();
        Runtime::new(Drivetrain::new(&config).unwrap(), &config)
    }

    fn healthy_inputs() -> CycleInputs {
        CycleInputs {
            modules: [Some(ModuleState::parked(0.0)); 4],
            heading: Some(0.0),
        }
    }

    fn forward() -> DriveCommand {
        DriveCommand::RobotRelative {
            forward: 1.0,
            left: 0.0,
            ccw: 0.0,
        }
    }

    #[test]
    fn test_no_command_is_stale() {
        let mut runtime = runtime();
        let (actuation, _) = runtime.step(&healthy_inputs(), DT, Instant::now());
        assert!(actuation.is_zero());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_command_is_reissued_every_cycle() {
        let mut runtime = runtime();
        let start = Instant::now();
        runtime.on_command(forward(), start);

        for i in 0..5 {
            let now = start + Duration::from_millis(10 * i);
            let (actuation, _) = runtime.step(&healthy_inputs(), DT, now);
            assert!(actuation.modules.iter().all(|m| m.drive_volts > 0.0), "cycle {}", i);
            assert_eq!(runtime.health(), RuntimeHealth::Ok);
        }
    }

    #[test]
    fn test_watchdog_brings_base_to_rest() {
        let mut runtime = runtime();
        let start = Instant::now();
        runtime.on_command(forward(), start);
        runtime.step(&healthy_inputs(), DT, start);

        let late = start + CMD_TIMEOUT + Duration::from_millis(1);
        runtime.step(&healthy_inputs(), DT, late);
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        for state in runtime.drivetrain().commanded_module_states() {
            assert_eq!(state.speed, 0.0);
        }
    }

    #[test]
    fn test_stop_command_zeroes_next_write() {
        let mut runtime = runtime();
        let now = Instant::now();
        runtime.on_command(forward(), now);
        runtime.on_command(DriveCommand::Stop, now);

        let (actuation, report) = runtime.step(&healthy_inputs(), DT, now);
        assert!(report.stopped);
        assert!(actuation.is_zero());
        assert_eq!(actuation.drive_current_limit, 40.0);
    }

    #[test]
    fn test_reset_pose_command() {
        let mut runtime = runtime();
        runtime.on_command(
            DriveCommand::ResetPose {
                x: 1.0,
                y: -2.0,
                heading: 0.5,
            },
            Instant::now(),
        );
        let pose = runtime.drivetrain().pose();
        assert_eq!((pose.x, pose.y, pose.heading), (1.0, -2.0, 0.5));
    }

    #[test]
    fn test_stale_sensors_become_faults() {
        let mut runtime = runtime();
        let start = Instant::now();
        let reading = Some(ModuleReading {
            azimuth: 0.0,
            velocity: 0.0,
        });
        runtime.on_modules(
            ModuleSensorFrame {
                modules: [reading, reading, None, reading],
            },
            start,
        );
        runtime.on_heading(HeadingFrame::default(), start);

        let inputs = runtime.sensor_inputs(start + Duration::from_millis(5));
        assert!(inputs.modules[0].is_some());
        assert!(inputs.modules[2].is_none());
        assert_eq!(inputs.heading, Some(0.0));

        runtime.on_command(forward(), start);
        runtime.step(&inputs, DT, start);
        assert_eq!(runtime.health(), RuntimeHealth::SensorFault);

        let inputs = runtime.sensor_inputs(start + SENSOR_TIMEOUT + Duration::from_millis(1));
        assert!(inputs.modules.iter().all(Option::is_none));
        assert!(inputs.heading.is_none());
    }
}
