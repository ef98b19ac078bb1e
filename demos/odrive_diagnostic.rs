// ODrive diagnostic: READ-ONLY check of the serial link and both axes
//
// This tool does NOT write set-points or change state - it's safe to run
// with the robot on a stand.
//
// Usage: cargo run --example odrive_diagnostic -- --port /dev/ttyUSB0

use clap::Parser;
use spokebot_zenoh_runtime::control::faults::FAULT_POLL_ORDER;
use spokebot_zenoh_runtime::odrive::OdriveClient;

#[derive(Parser, Debug)]
#[command(about = "Read-only ODrive link diagnostic")]
struct Args {
    /// Serial port the ODrive is attached to
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baudrate of the serial link
    #[arg(long, default_value_t = 115_200)]
    baud: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    println!("ODrive diagnostic (read-only)");
    println!("Serial port: {} @ {}", args.port, args.baud);
    println!();

    println!("Step 1: Opening serial port...");
    let mut client = match OdriveClient::open_with_baudrate(&args.port, args.baud) {
        Ok(client) => {
            println!("  ok: serial port opened");
            client
        }
        Err(e) => {
            println!("  FAILED: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB/UART cable is connected");
            println!("  - Check the current user can open the device node");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading bus voltage...");
    let vbus = client.read_device_float("vbus_voltage")?;
    if vbus == 0.0 {
        println!("  WARNING: vbus reads 0 - device not responding?");
    } else {
        println!("  ok: vbus = {:.2} V", vbus);
    }
    println!();

    println!("Step 3: Axis states...");
    for axis in 0..2u8 {
        let state = client.read_long(axis, "current_state")?;
        let label = match state {
            1 => "idle",
            4 => "motor calibration",
            7 => "encoder offset calibration",
            8 => "closed loop control",
            _ => "other",
        };
        println!("  axis{}: state {} ({})", axis, state, label);
    }
    println!();

    println!("Step 4: Fault registers...");
    let mut any = false;
    for source in FAULT_POLL_ORDER {
        let code = client.read_fault(source)?;
        if code != 0 {
            any = true;
            println!("  {:?}: 0x{:X}", source, code);
        }
    }
    if !any {
        println!("  ok: all fault registers clear");
    }
    println!();

    println!("Step 5: Encoder positions...");
    for axis in 0..2u8 {
        let pos = client.read_float(axis, "encoder.pos_estimate")?;
        println!("  axis{}: {:.4} turns", axis, pos);
    }

    println!();
    println!("Done.");
    Ok(())
}
