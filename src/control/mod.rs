// Control core for the balance loop
//
// Provides:
// - Orientation adapter (lever-arm correction around the fusion filter)
// - Spoke position/velocity estimation
// - Safety supervision (interlock + divergence)
// - Fault aggregation

pub mod faults;
pub mod orientation;
pub mod spokes;
pub mod supervisor;

pub use orientation::{OrientationAdapter, OrientationState};
pub use spokes::{SpokeEstimator, SpokeState};
pub use supervisor::{Decision, SafetySupervisor, SupervisorState};
