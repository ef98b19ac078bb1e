// Balance-control runtime for the spokebot two-axis balancing robot
//
// Bridges the zenoh command/telemetry bus to an ODrive motor controller
// over serial, fusing IMU and encoder data at a fixed rate.

pub mod config;
pub mod control;
pub mod hw;
pub mod messages;
pub mod odrive;
pub mod runtime;
