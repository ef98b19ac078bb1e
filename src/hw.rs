// Hardware capability seams
//
// The control logic never touches registers or device files directly; it
// goes through these small traits so it can run against fakes in tests and
// in simulation mode.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// One raw inertial event triple, polled once per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ImuSample {
    /// Linear acceleration, m/s^2, IMU frame
    pub accel: [f32; 3],
    /// Angular rate, rad/s
    pub gyro: [f32; 3],
    /// Magnetic field, uT
    pub mag: [f32; 3],
}

/// A single digital level input (the safety interlock line).
pub trait DigitalInput {
    /// Current electrical level; true = high.
    fn is_high(&mut self) -> bool;
}

/// Source of raw inertial samples.
pub trait InertialSource {
    fn sample(&mut self) -> io::Result<ImuSample>;
}

/// External orientation estimator contract (Adafruit AHRS style):
/// gyro is fed in deg/s, estimated angles read back in degrees.
pub trait FusionFilter {
    fn update(&mut self, gyro_dps: [f32; 3], accel: [f32; 3], mag: [f32; 3]);
    fn roll_deg(&self) -> f32;
    fn yaw_deg(&self) -> f32;
}

/// Hard/soft-iron and zero-offset calibration applied to raw samples
/// before fusion. Identity when no calibration file is found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IronCalibration {
    pub accel_zero_g: [f32; 3],
    pub gyro_zero_rate: [f32; 3],
    pub mag_hard_iron: [f32; 3],
    pub mag_soft_iron: [[f32; 3]; 3],
}

impl Default for IronCalibration {
    fn default() -> Self {
        Self {
            accel_zero_g: [0.0; 3],
            gyro_zero_rate: [0.0; 3],
            mag_hard_iron: [0.0; 3],
            mag_soft_iron: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl IronCalibration {
    /// Load from a JSON file. Failure is non-fatal: the caller proceeds
    /// uncalibrated, matching the behavior of a missing EEPROM blob.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(cal) => cal,
                Err(e) => {
                    warn!("Invalid calibration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("No calibration loaded/found ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn apply(&self, sample: &mut ImuSample) {
        for i in 0..3 {
            sample.accel[i] -= self.accel_zero_g[i];
            sample.gyro[i] -= self.gyro_zero_rate[i];
        }
        let centered = [
            sample.mag[0] - self.mag_hard_iron[0],
            sample.mag[1] - self.mag_hard_iron[1],
            sample.mag[2] - self.mag_hard_iron[2],
        ];
        for i in 0..3 {
            sample.mag[i] = self.mag_soft_iron[i][0] * centered[0]
                + self.mag_soft_iron[i][1] * centered[1]
                + self.mag_soft_iron[i][2] * centered[2];
        }
    }
}

/// Sysfs GPIO line. A read failure is reported as low, which the
/// active-low interlock treats as asserted (safe).
pub struct GpioInput {
    path: std::path::PathBuf,
}

impl GpioInput {
    pub fn new(gpio: u32) -> Self {
        Self {
            path: format!("/sys/class/gpio/gpio{}/value", gpio).into(),
        }
    }
}

impl DigitalInput for GpioInput {
    fn is_high(&mut self) -> bool {
        match fs::read_to_string(&self.path) {
            Ok(text) => text.trim() == "1",
            Err(e) => {
                warn!("Interlock read failed ({}): {}", self.path.display(), e);
                false
            }
        }
    }
}

/// Simulated stand-ins for bench runs without hardware
/// (selected by the `*_ENABLED` flags in config).
pub mod sim {
    use super::*;

    /// Stationary IMU: gravity on z, no rotation.
    #[derive(Default)]
    pub struct StationaryImu;

    impl InertialSource for StationaryImu {
        fn sample(&mut self) -> io::Result<ImuSample> {
            Ok(ImuSample {
                accel: [0.0, 0.0, 9.81],
                gyro: [0.0; 3],
                mag: [22.0, 0.0, -44.0],
            })
        }
    }

    /// Serial channel that swallows writes and never replies; every read
    /// falls back to the protocol client's zero sentinel.
    #[derive(Default)]
    pub struct NullChannel;

    impl io::Read for NullChannel {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl io::Write for NullChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Interlock line held at a fixed level.
    pub struct FixedLevel(pub bool);

    impl DigitalInput for FixedLevel {
        fn is_high(&mut self) -> bool {
            self.0
        }
    }

    /// Filter that reports a level, stationary body. Deployments supply a
    /// real AHRS implementation through `runtime::run_with_filter`.
    #[derive(Default)]
    pub struct FlatFilter;

    impl FusionFilter for FlatFilter {
        fn update(&mut self, _gyro_dps: [f32; 3], _accel: [f32; 3], _mag: [f32; 3]) {}

        fn roll_deg(&self) -> f32 {
            0.0
        }

        fn yaw_deg(&self) -> f32 {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_calibration_leaves_sample_unchanged() {
        let cal = IronCalibration::default();
        let mut sample = ImuSample {
            accel: [0.1, -0.2, 9.8],
            gyro: [0.3, 0.0, -0.1],
            mag: [20.0, -5.0, 43.0],
        };
        let original = sample;
        cal.apply(&mut sample);
        for i in 0..3 {
            assert_relative_eq!(sample.accel[i], original.accel[i]);
            assert_relative_eq!(sample.gyro[i], original.gyro[i]);
            assert_relative_eq!(sample.mag[i], original.mag[i]);
        }
    }

    #[test]
    fn hard_iron_offset_is_subtracted_before_soft_iron() {
        let cal = IronCalibration {
            mag_hard_iron: [1.0, 2.0, 3.0],
            mag_soft_iron: [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            ..Default::default()
        };
        let mut sample = ImuSample {
            mag: [2.0, 4.0, 6.0],
            ..Default::default()
        };
        cal.apply(&mut sample);
        assert_relative_eq!(sample.mag[0], 2.0);
        assert_relative_eq!(sample.mag[1], 4.0);
        assert_relative_eq!(sample.mag[2], 6.0);
    }
}
