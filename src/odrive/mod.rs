// ODrive motor controller module
//
// Provides:
// - ASCII line protocol client (typed get/set, fault reads, system commands)
// - Per-axis calibration state machine

pub mod axis;
pub mod protocol;

pub use axis::{Axis, MotorAxisState};
pub use protocol::{
    AxisStateCode, ControlModeCode, FaultSource, OdriveClient, OdriveError, SerialChannel,
};
