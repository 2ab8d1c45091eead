// Keyboard teleop: WASD move, Z/X rotate, R/F speed, Space stance, H reset heading, P stop, Q quit
//
// Publishes field-relative commands continuously; the runtime's watchdog stops
// the base as soon as this program stops publishing.
//
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use swerve_zenoh_runtime::config::{DrivetrainConfig, TOPIC_CMD_DRIVE};
use swerve_zenoh_runtime::messages::DriveCommand;
use tracing::info;

const SPEED_MULTS: [f64; 3] = [0.25, 0.5, 1.0]; // fraction of max velocity
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input
const MAX_TURN_RAD_PER_SEC: f64 = 9.5; // ~1.5 rotations/s

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, Space=stance, H=reset heading, P=stop, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

/// Square (or cube) the stick input while keeping its sign, for finer control near zero
fn shape(input: f64, power: i32) -> f64 {
    input.abs().powi(power).copysign(input)
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = DrivetrainConfig::default();
    let max_turn = MAX_TURN_RAD_PER_SEC.min(config.max_angular_velocity);
    let mut speed_idx: usize = 0;

    // Stick positions in [-1, 1]
    let mut forward = 0.0;
    let mut left = 0.0;
    let mut ccw = 0.0;
    let mut stance = false;
    let mut last_movement_input = Instant::now();

    loop {
        let mut one_shot = None;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update stick and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        forward = 1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        forward = -1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        left = 1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        left = -1.0;
                        last_movement_input = Instant::now();
                    }

                    // Rotation
                    KeyCode::Char('z') if pressed => {
                        ccw = 1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        ccw = -1.0;
                        last_movement_input = Instant::now();
                    }

                    // Hold space for stance
                    KeyCode::Char(' ') if pressed => {
                        stance = true;
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('h') if pressed => one_shot = Some(DriveCommand::ResetHeading),
                    KeyCode::Char('p') if pressed => one_shot = Some(DriveCommand::Stop),

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if let Some(cmd) = one_shot {
            info!("Sending {:?}", cmd);
            publisher.put(serde_json::to_string(&cmd)?).await?;
        }

        // Reset sticks if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            forward = 0.0;
            left = 0.0;
            ccw = 0.0;
            stance = false;
        }

        // Always publish at ~50Hz
        let mult = SPEED_MULTS[speed_idx];
        let cmd = if stance {
            DriveCommand::Stance
        } else {
            DriveCommand::FieldRelative {
                forward: shape(forward, 2) * config.max_linear_velocity * mult,
                left: shape(left, 2) * config.max_linear_velocity * mult,
                ccw: shape(ccw, 3) * max_turn * mult,
            }
        };
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
