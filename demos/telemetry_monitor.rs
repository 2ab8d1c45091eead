// Telemetry monitor: READ-ONLY view of the runtime's pose, module states and health
//
// Subscribes to the runtime's telemetry and health topics and prints a
// compact summary. Never publishes anything, safe to run next to a live robot.
//
// Usage: cargo run --example telemetry_monitor

use std::time::Duration;
use swerve_zenoh_runtime::config::{MODULE_NAMES, TOPIC_HEALTH, TOPIC_TELEMETRY};
use swerve_zenoh_runtime::messages::{DriveTelemetry, RuntimeHealth};
use tracing::{info, warn};

const PRINT_PERIOD: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let sub_telemetry = session.declare_subscriber(TOPIC_TELEMETRY).await?;
    let sub_health = session.declare_subscriber(TOPIC_HEALTH).await?;
    info!("Listening on {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let mut tick = tokio::time::interval(PRINT_PERIOD);
    let mut latest: Option<DriveTelemetry> = None;
    let mut health: Option<RuntimeHealth> = None;

    loop {
        tick.tick().await;

        while let Ok(Some(sample)) = sub_telemetry.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveTelemetry>(&payload) {
                Ok(telemetry) => latest = Some(telemetry),
                Err(e) => warn!("Failed to parse telemetry: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_health.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Ok(h) = serde_json::from_slice::<RuntimeHealth>(&payload) {
                health = Some(h);
            }
        }

        let Some(telemetry) = &latest else {
            println!("Waiting for telemetry...");
            continue;
        };

        println!(
            "pose: x={:+.3} y={:+.3} heading={:+.1}°  health={:?}{}",
            telemetry.pose.x,
            telemetry.pose.y,
            telemetry.pose.heading.to_degrees(),
            health,
            if telemetry.stopped { "  [STOPPED]" } else { "" }
        );
        println!(
            "  speeds: desired ({:+.2}, {:+.2}, {:+.2})  measured ({:+.2}, {:+.2}, {:+.2})",
            telemetry.desired_speeds.vx,
            telemetry.desired_speeds.vy,
            telemetry.desired_speeds.omega,
            telemetry.measured_speeds.vx,
            telemetry.measured_speeds.vy,
            telemetry.measured_speeds.omega,
        );
        for (i, name) in MODULE_NAMES.iter().enumerate() {
            let commanded = telemetry.commanded_states[i];
            match telemetry.measured_states[i] {
                Some(measured) => println!(
                    "  {:<12} cmd {:+.2} m/s @ {:+6.1}°   meas {:+.2} m/s @ {:+6.1}°",
                    name,
                    commanded.speed,
                    commanded.angle.to_degrees(),
                    measured.speed,
                    measured.angle.to_degrees()
                ),
                None => println!("  {:<12} FAULT (no measurement)", name),
            }
        }
    }
}
