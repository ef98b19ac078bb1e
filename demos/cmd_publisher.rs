// Keyboard teleop: A/D lean torque, W/S trim, space zero, C clear errors,
// B reboot device, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;

const TORQUE_STEPS: [f64; 3] = [0.05, 0.15, 0.3]; // Nm
const TRIM_STEP: f64 = 0.01; // Nm per keypress
const INPUT_TIMEOUT_MS: u64 = 100; // Reset effort after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_torque = session.declare_publisher("spokebot/cmd/torque").await?;
    let pub_operator = session.declare_publisher("spokebot/cmd/odrive").await?;

    info!("Controls: A/D=lean, W/S=trim, R/F=step size, C=clear, B=reboot, Q=quit");
    info!("Step: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_torque, &pub_operator).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    pub_torque: &zenoh::pubsub::Publisher<'_>,
    pub_operator: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;

    // Persistent effort state
    let mut effort = 0.0f64;
    let mut trim = 0.0f64;
    let mut last_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Lean - update effort and refresh timestamp
                    KeyCode::Char('a') if pressed => {
                        effort = -TORQUE_STEPS[step_idx];
                        last_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        effort = TORQUE_STEPS[step_idx];
                        last_input = Instant::now();
                    }

                    // Trim
                    KeyCode::Char('w') if pressed => {
                        trim += TRIM_STEP;
                        info!("Trim: {:.3} Nm", trim);
                    }
                    KeyCode::Char('s') if pressed => {
                        trim -= TRIM_STEP;
                        info!("Trim: {:.3} Nm", trim);
                    }

                    // Step size control
                    KeyCode::Char('r') if pressed => {
                        step_idx = (step_idx + 1).min(2);
                        print_step(step_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        step_idx = step_idx.saturating_sub(1);
                        print_step(step_idx);
                    }

                    // Operator commands
                    KeyCode::Char('c') if pressed => {
                        info!("Sending clear-errors");
                        pub_operator.put(json!("clear_errors").to_string()).await?;
                    }
                    KeyCode::Char('b') if pressed => {
                        info!("Sending reboot");
                        pub_operator.put(json!("reboot").to_string()).await?;
                    }

                    KeyCode::Char(' ') if pressed => {
                        effort = 0.0;
                        trim = 0.0;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset effort if no input for INPUT_TIMEOUT_MS
        if last_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            effort = 0.0;
        }

        // Always publish at ~50Hz; both axes carry the same effort
        let total = effort + trim;
        let cmd = json!({
            "effort0": total,
            "effort1": total
        });
        pub_torque.put(cmd.to_string()).await?;
    }

    Ok(())
}

fn print_step(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Step: {}", label);
}
