// Timeouts, topics, device and control configuration
use std::f32::consts::PI;
use std::time::Duration;

// Runtime loop frequency: matched to the fusion filter update rate
pub const LOOP_HZ: u64 = 100;

// Fixed sampling period for all finite-difference math.
// Deliberately constant, never measured from the wall clock.
pub const SAMPLING_PERIOD: f32 = 1.0 / LOOP_HZ as f32;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_TORQUE: &str = "spokebot/cmd/torque"; // torque set-points
pub const TOPIC_CMD_ODRIVE: &str = "spokebot/cmd/odrive"; // operator commands
pub const TOPIC_RT_SENSORS: &str = "spokebot/rt/sensors"; // orientation + spoke state
pub const TOPIC_RT_FAULTS: &str = "spokebot/rt/faults"; // fault vector, when nonzero
pub const TOPIC_HEALTH: &str = "spokebot/state/health"; // health status
pub const TOPIC_IMU_RAW: &str = "spokebot/imu/raw"; // raw inertial samples (inbound)

// Serial channel to the ODrive motor controller
pub const ODRIVE_PORT: &str = "/dev/ttyUSB0";
pub const ODRIVE_BAUDRATE: u32 = 115_200;

// Axis limits written to the device at startup
pub const MOTOR_VELOCITY_LIMIT: f32 = 50.0; // turns per second
pub const MOTOR_CURRENT_LIMIT: f32 = 20.0; // amps

// D5065 motor: 8.23 Nm per amp over the 150 KV rating
pub const TORQUE_CONSTANT: f32 = 8.23 / 150.0;

// Offset from the IMU mounting point to the body's center of mass, meters.
// Currently zero: the IMU sits at the COM on this frame revision.
pub const LEVER_ARM: [f32; 3] = [0.0, 0.0, 0.0];

// Angular velocity above which the supervisor issues a brake (rad/s, signed)
pub const OMEGA_BRAKE_LIMIT: f32 = PI;

// Hard/soft-iron calibration file for the IMU (load failure is non-fatal)
pub const IRON_CAL_PATH: &str = "/etc/spokebot/imu_cal.json";

// GPIO line wired to the safety interlock (active-low)
pub const INTERLOCK_GPIO: u32 = 3;

// Enable hardware control (set to false for simulation/testing)
pub const MOTOR_ENABLED: bool = true;
pub const IMU_ENABLED: bool = true;

/// Which closed-loop mode carries the operator's effort commands.
/// Both paths are implemented; this selects the load-bearing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Torque,
    Velocity,
}

pub const CONTROL_MODE: ControlMode = ControlMode::Torque;

/// Policy for the excess-angular-velocity brake condition.
///
/// `OneShot` brakes and lets closed-loop control resume on the next tick;
/// `Latch` additionally trips the supervisor until the interlock cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverspeedPolicy {
    OneShot,
    Latch,
}

pub const OVERSPEED_POLICY: OverspeedPolicy = OverspeedPolicy::OneShot;
