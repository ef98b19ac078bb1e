// Per-axis calibration state machine
//
// Transitions are driven only by the protocol client's calibration
// sequence; a failed step leaves the axis in the last reached state.

use std::time::Duration;
use tracing::info;

use super::protocol::{AxisStateCode, ControlModeCode, OdriveClient, Result, SerialChannel};

/// Motor calibration is brief; the device chirps the rotor and returns.
pub const MOTOR_CALIBRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Encoder offset calibration spins the rotor through a full search;
/// generous bound because settling time is physical, not clocked.
pub const ENCODER_CALIBRATION_TIMEOUT: Duration = Duration::from_secs(25);

/// Logical calibration progress of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorAxisState {
    Uncalibrated,
    /// Motor calibration completed, encoder search not yet run
    MotorCalibrating,
    /// Encoder offset search completed
    EncoderCalibrating,
    /// Terminal operating state
    ClosedLoop,
    /// Transient while rewriting the control mode
    ControlModeSwitch,
}

pub struct Axis {
    pub id: u8,
    pub state: MotorAxisState,
}

impl Axis {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            state: MotorAxisState::Uncalibrated,
        }
    }

    /// Drive the three-step calibration sequence. Returns true when the
    /// axis reached closed-loop control; on failure the remaining steps
    /// are skipped and `state` records the last completed stage.
    pub fn calibrate<C: SerialChannel>(&mut self, client: &mut OdriveClient<C>) -> Result<bool> {
        self.calibrate_with_timeouts(
            client,
            MOTOR_CALIBRATION_TIMEOUT,
            ENCODER_CALIBRATION_TIMEOUT,
        )
    }

    pub fn calibrate_with_timeouts<C: SerialChannel>(
        &mut self,
        client: &mut OdriveClient<C>,
        motor_timeout: Duration,
        encoder_timeout: Duration,
    ) -> Result<bool> {
        info!(
            "Axis{}: requesting state {:?}",
            self.id,
            AxisStateCode::MotorCalibration
        );
        if !client.run_state(self.id, AxisStateCode::MotorCalibration, true, motor_timeout)? {
            return Ok(false);
        }
        self.state = MotorAxisState::MotorCalibrating;

        info!(
            "Axis{}: requesting state {:?}",
            self.id,
            AxisStateCode::EncoderOffsetCalibration
        );
        if !client.run_state(
            self.id,
            AxisStateCode::EncoderOffsetCalibration,
            true,
            encoder_timeout,
        )? {
            return Ok(false);
        }
        self.state = MotorAxisState::EncoderCalibrating;

        info!(
            "Axis{}: requesting state {:?}",
            self.id,
            AxisStateCode::ClosedLoopControl
        );
        if !client.run_state(
            self.id,
            AxisStateCode::ClosedLoopControl,
            false, // don't wait
            Duration::ZERO,
        )? {
            return Ok(false);
        }
        self.state = MotorAxisState::ClosedLoop;
        Ok(true)
    }

    /// Rewrite the closed-loop control mode, passing through the
    /// transient switch state.
    pub fn switch_control_mode<C: SerialChannel>(
        &mut self,
        client: &mut OdriveClient<C>,
        mode: ControlModeCode,
    ) -> Result<()> {
        self.state = MotorAxisState::ControlModeSwitch;
        client.set_control_mode(self.id, mode)?;
        self.state = MotorAxisState::ClosedLoop;
        Ok(())
    }
}
