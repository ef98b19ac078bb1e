// Spoke kinematics: corrected position and finite-difference velocity
// from raw encoder samples.

use crate::odrive::protocol::Result;
use crate::odrive::{OdriveClient, SerialChannel};

/// Offset-corrected spoke state for one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct SpokeState {
    pub position0: f32,
    pub position1: f32,
    pub velocity0: f32,
    pub velocity1: f32,
}

/// Backward finite difference over the fixed sampling period.
/// `dt` is the configured period, never a measured elapsed time.
pub fn derive_velocity(current: f32, previous: f32, dt: f32) -> f32 {
    (current - previous) / dt
}

/// Read raw spoke positions from both axes. Axis 0 is sign-inverted to
/// match the shared physical convention of the frame.
pub fn read_raw_positions<C: SerialChannel>(client: &mut OdriveClient<C>) -> Result<(f32, f32)> {
    let p0 = -client.read_float(0, "encoder.pos_estimate")?;
    let p1 = client.read_float(1, "encoder.pos_estimate")?;
    Ok((p0, p1))
}

/// Turns raw position samples into offset-corrected position + velocity.
///
/// Previous-position state is a single slot per axis, seeded at offset
/// capture so the first tick's velocity is well defined.
pub struct SpokeEstimator {
    offset0: f32,
    offset1: f32,
    prev0: f32,
    prev1: f32,
    dt: f32,
}

impl SpokeEstimator {
    /// Capture zero-offsets from the first valid raw readings. The
    /// corrected position at capture is zero by construction, which also
    /// seeds the previous-position slots.
    pub fn capture_offsets(raw0: f32, raw1: f32, dt: f32) -> Self {
        Self {
            offset0: raw0,
            offset1: raw1,
            prev0: 0.0,
            prev1: 0.0,
            dt,
        }
    }

    pub fn update(&mut self, raw0: f32, raw1: f32) -> SpokeState {
        let position0 = raw0 - self.offset0;
        let position1 = raw1 - self.offset1;
        let state = SpokeState {
            position0,
            position1,
            velocity0: derive_velocity(position0, self.prev0, self.dt),
            velocity1: derive_velocity(position1, self.prev1, self.dt),
        };
        self.prev0 = position0;
        self.prev1 = position1;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const T: f32 = 0.01;

    #[test]
    fn test_velocity_is_exact_finite_difference() {
        // No smoothing: velocity must equal delta / T exactly
        let mut est = SpokeEstimator::capture_offsets(0.0, 0.0, T);
        let positions = [0.0f32, 0.5, 0.5, -0.25, 10.0];
        let mut prev = 0.0f32;
        for &p in &positions {
            let state = est.update(p, 0.0);
            assert_relative_eq!(state.velocity0, (p - prev) / T);
            prev = p;
        }
    }

    #[test]
    fn test_offsets_are_constant_after_capture() {
        let mut est = SpokeEstimator::capture_offsets(1.0, -2.0, T);
        // Corrected position shifts by exactly the raw delta, tick after tick
        for i in 1..100 {
            let delta = i as f32 * 0.001;
            let state = est.update(1.0 + delta, -2.0 + delta);
            assert_relative_eq!(state.position0, delta, max_relative = 1e-3);
            assert_relative_eq!(state.position1, delta, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_startup_offset_capture_scenario() {
        // Tick 1 raw readings become the stored offsets
        let mut est = SpokeEstimator::capture_offsets(0.10, -0.10, T);

        // Tick 2
        let state = est.update(0.12, -0.07);
        assert_relative_eq!(state.position0, 0.02, max_relative = 1e-5);
        assert_relative_eq!(state.position1, 0.03, max_relative = 1e-5);
        assert_relative_eq!(state.velocity0, 0.02 / T, max_relative = 1e-5);
        assert_relative_eq!(state.velocity1, 0.03 / T, max_relative = 1e-5);
    }

    #[test]
    fn test_single_slot_memory() {
        // Only the immediately prior sample matters
        let mut est = SpokeEstimator::capture_offsets(0.0, 0.0, T);
        est.update(100.0, 0.0);
        est.update(1.0, 0.0);
        let state = est.update(2.0, 0.0);
        assert_relative_eq!(state.velocity0, 1.0 / T);
    }
}
