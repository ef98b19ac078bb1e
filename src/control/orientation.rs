// Orientation adapter around the external fusion estimator
//
// The filter numerics are a black box behind `hw::FusionFilter`; this
// module owns what goes in (calibrated, lever-arm-corrected samples) and
// what comes out (offset-corrected angles in radians).

use crate::hw::{FusionFilter, ImuSample, IronCalibration};

/// rad/s to deg/s; the filter contract is degrees on both sides
pub const RADS_TO_DPS: f32 = 57.295_78;

/// Fused orientation for one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct OrientationState {
    /// radians
    pub roll: f32,
    /// radians/s, body roll axis
    pub angular_velocity: f32,
    /// radians, zero-offset corrected
    pub yaw: f32,
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Shift IMU-frame acceleration to the center of mass:
/// `a_COM = a_IMU - alpha x r - omega x (omega x r)`.
///
/// The angular acceleration is taken about the roll axis only; the frame
/// has no play about y and z.
pub fn com_acceleration(
    accel: [f32; 3],
    omega: [f32; 3],
    alpha_x: f32,
    lever_arm: [f32; 3],
) -> [f32; 3] {
    let alpha = [alpha_x, 0.0, 0.0];
    let alpha_cross_r = cross(alpha, lever_arm);
    let omega_cross_r = cross(omega, lever_arm);
    let centripetal = cross(omega, omega_cross_r);

    let mut a_com = [0.0f32; 3];
    for i in 0..3 {
        a_com[i] = accel[i] - alpha_cross_r[i] - centripetal[i];
    }
    a_com
}

pub struct OrientationAdapter {
    cal: IronCalibration,
    lever_arm: [f32; 3],
    yaw_offset: f32,
    /// Previous tick's roll-axis angular velocity, for the finite
    /// difference angular acceleration. Single slot, no history.
    prev_omega: f32,
    dt: f32,
}

impl OrientationAdapter {
    pub fn new(cal: IronCalibration, lever_arm: [f32; 3], dt: f32) -> Self {
        Self {
            cal,
            lever_arm,
            yaw_offset: 0.0,
            prev_omega: 0.0,
            dt,
        }
    }

    /// Capture the yaw zero-offset from the first valid fused reading.
    pub fn set_yaw_offset(&mut self, yaw_offset: f32) {
        self.yaw_offset = yaw_offset;
    }

    /// One tick: calibrate the raw triple, correct acceleration to the
    /// COM, feed the filter, read back offset-corrected angles.
    pub fn update(&mut self, raw: ImuSample, filter: &mut dyn FusionFilter) -> OrientationState {
        let mut sample = raw;
        self.cal.apply(&mut sample);

        let omega_x = sample.gyro[0];
        let alpha_x = (omega_x - self.prev_omega) / self.dt;
        let a_com = com_acceleration(sample.accel, sample.gyro, alpha_x, self.lever_arm);

        let gyro_dps = [
            sample.gyro[0] * RADS_TO_DPS,
            sample.gyro[1] * RADS_TO_DPS,
            sample.gyro[2] * RADS_TO_DPS,
        ];
        filter.update(gyro_dps, a_com, sample.mag);

        self.prev_omega = omega_x;

        OrientationState {
            roll: filter.roll_deg() / RADS_TO_DPS,
            angular_velocity: omega_x,
            yaw: filter.yaw_deg() / RADS_TO_DPS - self.yaw_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const T: f32 = 0.01;

    /// Records filter inputs, replays fixed angles
    #[derive(Default)]
    struct RecordingFilter {
        gyro_dps: [f32; 3],
        accel: [f32; 3],
        mag: [f32; 3],
        roll_deg: f32,
        yaw_deg: f32,
    }

    impl FusionFilter for RecordingFilter {
        fn update(&mut self, gyro_dps: [f32; 3], accel: [f32; 3], mag: [f32; 3]) {
            self.gyro_dps = gyro_dps;
            self.accel = accel;
            self.mag = mag;
        }

        fn roll_deg(&self) -> f32 {
            self.roll_deg
        }

        fn yaw_deg(&self) -> f32 {
            self.yaw_deg
        }
    }

    #[test]
    fn test_zero_lever_arm_is_identity() {
        // With r = 0 both cross products vanish
        let accel = [1.0, -2.0, 9.5];
        let a_com = com_acceleration(accel, [3.0, 1.0, -0.5], 40.0, [0.0; 3]);
        for i in 0..3 {
            assert_relative_eq!(a_com[i], accel[i]);
        }
    }

    #[test]
    fn test_centripetal_term() {
        // omega = [w,0,0], r = [0,r,0]: w x (w x r) = [0, -w^2 r, 0]
        let w = 2.0f32;
        let r = 0.1f32;
        let a_com = com_acceleration([0.0; 3], [w, 0.0, 0.0], 0.0, [0.0, r, 0.0]);
        assert_relative_eq!(a_com[0], 0.0);
        assert_relative_eq!(a_com[1], w * w * r);
        assert_relative_eq!(a_com[2], 0.0);
    }

    #[test]
    fn test_tangential_term_uses_finite_difference_alpha() {
        // r on z, alpha about x: alpha x r = [0, -alpha*z, 0]
        let z = 0.05f32;
        let mut adapter =
            OrientationAdapter::new(IronCalibration::default(), [0.0, 0.0, z], T);
        let mut filter = RecordingFilter::default();

        let mut sample = ImuSample::default();
        sample.gyro = [1.0, 0.0, 0.0];
        adapter.update(sample, &mut filter);

        sample.gyro = [2.0, 0.0, 0.0];
        adapter.update(sample, &mut filter);

        // alpha = (2-1)/T about x; alpha x r = [0, -alpha*z, 0] and
        // omega x (omega x r) = [0, 0, -4z], so a_com = [0, alpha*z, 4z]
        let alpha_x = (2.0 - 1.0) / T;
        assert_relative_eq!(filter.accel[0], 0.0);
        assert_relative_eq!(filter.accel[1], alpha_x * z, max_relative = 1e-4);
        assert_relative_eq!(filter.accel[2], 4.0 * z, max_relative = 1e-4);
    }

    #[test]
    fn test_gyro_fed_to_filter_in_dps() {
        let mut adapter = OrientationAdapter::new(IronCalibration::default(), [0.0; 3], T);
        let mut filter = RecordingFilter::default();
        let mut sample = ImuSample::default();
        sample.gyro = [0.5, -1.0, 0.25];
        adapter.update(sample, &mut filter);
        assert_relative_eq!(filter.gyro_dps[0], 0.5 * RADS_TO_DPS);
        assert_relative_eq!(filter.gyro_dps[1], -1.0 * RADS_TO_DPS);
        assert_relative_eq!(filter.gyro_dps[2], 0.25 * RADS_TO_DPS);
    }

    #[test]
    fn test_angles_rescaled_and_yaw_offset_subtracted() {
        let mut adapter = OrientationAdapter::new(IronCalibration::default(), [0.0; 3], T);
        adapter.set_yaw_offset(0.1);
        let mut filter = RecordingFilter {
            roll_deg: 28.6479, // 0.5 rad
            yaw_deg: 57.2958,  // 1.0 rad
            ..Default::default()
        };
        let state = adapter.update(ImuSample::default(), &mut filter);
        assert_relative_eq!(state.roll, 0.5, max_relative = 1e-4);
        assert_relative_eq!(state.yaw, 1.0 - 0.1, max_relative = 1e-3);
    }
}
