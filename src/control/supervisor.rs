// Safety supervision: hardware interlock and angular-velocity divergence
//
// The interlock hold is expressed as a per-tick decision from an explicit
// state machine rather than a nested blocking loop, so the runtime keeps
// reading sensors and publishing telemetry while the robot is held safe.

use crate::config::OverspeedPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Normal,
    Tripped,
}

/// Actuation decision for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Closed-loop control may run. `restore_mode` is set on the first
    /// tick after a hold or brake, when the configured control mode must
    /// be rewritten before effort commands are load-bearing again.
    Run { restore_mode: bool },
    /// Interlock held: velocity-hold both axes at zero, suppress effort
    Hold,
    /// One-shot divergence brake
    Brake,
}

pub struct SafetySupervisor {
    state: SupervisorState,
    policy: OverspeedPolicy,
    omega_limit: f32,
    /// Overspeed latch pending an interlock cycle or operator clear
    latched: bool,
    /// Set after a brake so the next Run carries the mode restore
    pending_restore: bool,
}

impl SafetySupervisor {
    pub fn new(policy: OverspeedPolicy, omega_limit: f32) -> Self {
        Self {
            state: SupervisorState::Normal,
            policy,
            omega_limit,
            latched: false,
            pending_restore: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Operator-initiated reset; releases an overspeed latch.
    pub fn clear(&mut self) {
        self.latched = false;
        if self.state == SupervisorState::Tripped {
            self.state = SupervisorState::Normal;
            self.pending_restore = true;
        }
    }

    /// One poll per tick, no software debounce.
    pub fn evaluate(&mut self, interlock_asserted: bool, omega: f32) -> Decision {
        match self.state {
            SupervisorState::Tripped => {
                if interlock_asserted {
                    // An interlock cycle also releases an overspeed latch
                    self.latched = false;
                    Decision::Hold
                } else if self.latched {
                    Decision::Hold
                } else {
                    self.state = SupervisorState::Normal;
                    self.pending_restore = false;
                    Decision::Run { restore_mode: true }
                }
            }
            SupervisorState::Normal => {
                if interlock_asserted {
                    self.state = SupervisorState::Tripped;
                    Decision::Hold
                } else if omega >= self.omega_limit {
                    // Signed comparison: only the positive direction is
                    // the undesirable one on this frame
                    if self.policy == OverspeedPolicy::Latch {
                        self.state = SupervisorState::Tripped;
                        self.latched = true;
                    }
                    self.pending_restore = true;
                    Decision::Brake
                } else {
                    let restore = std::mem::take(&mut self.pending_restore);
                    Decision::Run {
                        restore_mode: restore,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn supervisor(policy: OverspeedPolicy) -> SafetySupervisor {
        SafetySupervisor::new(policy, PI)
    }

    #[test]
    fn test_interlock_holds_for_exactly_n_ticks() {
        let mut sup = supervisor(OverspeedPolicy::OneShot);
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: false });

        // Asserted for 5 consecutive ticks
        for _ in 0..5 {
            assert_eq!(sup.evaluate(true, 0.0), Decision::Hold);
            assert_eq!(sup.state(), SupervisorState::Tripped);
        }

        // First tick after release resumes with a mode restore
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: true });
        assert_eq!(sup.state(), SupervisorState::Normal);
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: false });
    }

    #[test]
    fn test_overspeed_one_shot_brakes_without_tripping() {
        let mut sup = supervisor(OverspeedPolicy::OneShot);
        assert_eq!(sup.evaluate(false, PI + 0.1), Decision::Brake);
        assert_eq!(sup.state(), SupervisorState::Normal);
        // Next tick resumes, restoring the control mode the brake switched
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: true });
    }

    #[test]
    fn test_overspeed_is_signed() {
        // Negative divergence is not the braked direction
        let mut sup = supervisor(OverspeedPolicy::OneShot);
        assert_eq!(
            sup.evaluate(false, -2.0 * PI),
            Decision::Run { restore_mode: false }
        );
    }

    #[test]
    fn test_overspeed_latch_requires_clear() {
        let mut sup = supervisor(OverspeedPolicy::Latch);
        assert_eq!(sup.evaluate(false, PI), Decision::Brake);
        assert_eq!(sup.state(), SupervisorState::Tripped);

        // Stays held even though omega recovered and interlock is released
        for _ in 0..3 {
            assert_eq!(sup.evaluate(false, 0.0), Decision::Hold);
        }

        sup.clear();
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: true });
    }

    #[test]
    fn test_interlock_cycle_releases_latch() {
        let mut sup = supervisor(OverspeedPolicy::Latch);
        sup.evaluate(false, PI);
        assert_eq!(sup.evaluate(false, 0.0), Decision::Hold);

        // Operator cycles the interlock: assert, then release
        assert_eq!(sup.evaluate(true, 0.0), Decision::Hold);
        assert_eq!(sup.evaluate(false, 0.0), Decision::Run { restore_mode: true });
    }

    #[test]
    fn test_interlock_takes_priority_over_overspeed() {
        let mut sup = supervisor(OverspeedPolicy::OneShot);
        assert_eq!(sup.evaluate(true, PI + 1.0), Decision::Hold);
        assert_eq!(sup.state(), SupervisorState::Tripped);
    }
}
