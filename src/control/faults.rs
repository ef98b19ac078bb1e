// Fault aggregation: nine subsystem registers reduced to one signal

use crate::messages::FaultReport;
use crate::odrive::protocol::Result;
use crate::odrive::{FaultSource, OdriveClient, SerialChannel};

/// Poll order is fixed for diagnostic reproducibility
pub const FAULT_POLL_ORDER: [FaultSource; 9] = [
    FaultSource::Device,
    FaultSource::Motor(0),
    FaultSource::Motor(1),
    FaultSource::Axis(0),
    FaultSource::Axis(1),
    FaultSource::Encoder(0),
    FaultSource::Encoder(1),
    FaultSource::Controller(0),
    FaultSource::Controller(1),
];

/// Poll every subsystem and reduce to (vector, any-fault). Unresponsive
/// subsystems read as code 0; classification of severity is left to the
/// telemetry consumer.
pub fn poll_all<C: SerialChannel>(
    client: &mut OdriveClient<C>,
) -> Result<(FaultReport, bool)> {
    let mut codes = [0i64; 9];
    for (slot, source) in codes.iter_mut().zip(FAULT_POLL_ORDER) {
        *slot = client.read_fault(source)?;
    }
    let any_fault = codes.iter().any(|&code| code != 0);
    Ok((FaultReport { codes }, any_fault))
}
