// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::control::orientation::OrientationState;
use crate::control::spokes::SpokeState;

// Torque set-points from the balance controller / teleop -> runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorqueCommand {
    pub effort0: f32,
    pub effort1: f32,
}

/// Discrete operator commands for the motor controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Clear device error flags, then recalibrate both axes
    ClearErrors,
    /// Reboot the device, then recalibrate both axes
    Reboot,
}

// Combined orientation + spoke state published each tick.
// Positions: [roll, spoke0, spoke1, yaw]; velocities: [omega, spoke0 rate, spoke1 rate]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SensorReport {
    pub position: [f32; 4],
    pub velocity: [f32; 3],
}

impl SensorReport {
    pub fn new(orientation: &OrientationState, spokes: &SpokeState) -> Self {
        Self {
            position: [
                orientation.roll,
                spokes.position0,
                spokes.position1,
                orientation.yaw,
            ],
            velocity: [
                orientation.angular_velocity,
                spokes.velocity0,
                spokes.velocity1,
            ],
        }
    }
}

// Fault codes in aggregator poll order, published only when nonzero
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultReport {
    pub codes: [i64; 9],
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    Tripped,
}
