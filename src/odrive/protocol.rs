// ODrive ASCII protocol implementation
//
// Newline-terminated command lines over a point-to-point serial channel:
//   write: "w axis<N>.<param.path> <value>"
//   read:  "r axis<N>.<param.path>" -> reply is a single ASCII numeric line

use serialport::{self, SerialPort};
use std::fmt::Display;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default serial configuration for the ODrive
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// How long to wait for a full reply line before substituting the sentinel
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between state polls while waiting on a calibration step
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Replies are single ASCII numeric lines; anything longer is garbage
const MAX_REPLY_LEN: usize = 128;

/// Axis state codes (ODrive firmware enumeration, must match bit-for-bit)
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisStateCode {
    Undefined = 0,
    Idle = 1,
    MotorCalibration = 4,
    EncoderOffsetCalibration = 7,
    ClosedLoopControl = 8,
}

/// Control mode codes (ODrive firmware enumeration)
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlModeCode {
    TorqueControl = 1,
    VelocityControl = 2,
}

impl ControlModeCode {
    pub fn from_mode(mode: crate::config::ControlMode) -> Self {
        match mode {
            crate::config::ControlMode::Torque => Self::TorqueControl,
            crate::config::ControlMode::Velocity => Self::VelocityControl,
        }
    }
}

/// One polled fault register. Order of polling lives in the aggregator;
/// this only knows how to phrase each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSource {
    Device,
    Motor(u8),
    Axis(u8),
    Encoder(u8),
    Controller(u8),
}

impl FaultSource {
    fn request(&self) -> String {
        match self {
            FaultSource::Device => "error".to_string(),
            FaultSource::Motor(axis) => format!("r axis{}.motor.error", axis),
            FaultSource::Axis(axis) => format!("r axis{}.error", axis),
            FaultSource::Encoder(axis) => format!("r axis{}.encoder.error", axis),
            FaultSource::Controller(axis) => format!("r axis{}.controller.error", axis),
        }
    }
}

/// Error types for ODrive communication.
///
/// Missing or malformed replies are NOT errors: they become the zero
/// sentinel and the aggregator decides health. Only channel-level
/// failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum OdriveError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OdriveError>;

/// Byte channel to the device. Blanket-implemented so the client runs
/// against a real serial port or an in-memory fake.
pub trait SerialChannel: Read + Write {}

impl<T: Read + Write + ?Sized> SerialChannel for T {}

/// ODrive protocol client - typed get/set over the line protocol
pub struct OdriveClient<C: SerialChannel> {
    pub(crate) channel: C,
    reply_timeout: Duration,
}

impl OdriveClient<Box<dyn SerialPort>> {
    /// Open a new connection to the device
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self::from_channel(port))
    }
}

impl<C: SerialChannel> OdriveClient<C> {
    /// Wrap an already-open channel
    pub fn from_channel(channel: C) -> Self {
        Self {
            channel,
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    /// Wrap a channel with a custom reply timeout
    pub fn with_reply_timeout(channel: C, reply_timeout: Duration) -> Self {
        Self {
            channel,
            reply_timeout,
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("odrive tx: {}", line);
        self.channel.write_all(line.as_bytes())?;
        self.channel.write_all(b"\n")?;
        self.channel.flush()?;
        Ok(())
    }

    /// Accumulate bytes until a newline or the reply deadline.
    /// `None` means the device did not answer in time.
    fn read_line(&mut self) -> Result<Option<String>> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.channel.read(&mut byte) {
                Ok(0) => return Ok(None), // channel drained, nothing more coming
                Ok(_) => {
                    if byte[0] == b'\n' {
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        debug!("odrive rx: {}", line);
                        return Ok(Some(line));
                    }
                    buf.push(byte[0]);
                    // A chatty channel that never terminates its line must
                    // not hold the loop past the deadline or grow the
                    // buffer without bound
                    if buf.len() >= MAX_REPLY_LEN || Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write a named configuration parameter on one axis. Fire-and-forget:
    /// the device does not acknowledge writes.
    pub fn set_parameter<V: Display>(&mut self, axis: u8, path: &str, value: V) -> Result<()> {
        self.send_line(&format!("w axis{}.{} {}", axis, path, value))
    }

    /// Read a numeric parameter from one axis. A missing or unparseable
    /// reply yields 0.0 and a warning; the subsystem is unresponsive,
    /// not the process broken.
    pub fn read_float(&mut self, axis: u8, path: &str) -> Result<f32> {
        self.send_line(&format!("r axis{}.{}", axis, path))?;
        Ok(self.parse_reply(&format!("axis{}.{}", axis, path)))
    }

    /// Read an integer parameter from one axis, with the same sentinel rule.
    pub fn read_long(&mut self, axis: u8, path: &str) -> Result<i64> {
        self.send_line(&format!("r axis{}.{}", axis, path))?;
        Ok(self.parse_reply::<i64>(&format!("axis{}.{}", axis, path)))
    }

    /// Read a device-global float (e.g. "vbus_voltage")
    pub fn read_device_float(&mut self, path: &str) -> Result<f32> {
        self.send_line(&format!("r {}", path))?;
        Ok(self.parse_reply(path))
    }

    fn parse_reply<T: std::str::FromStr + Default>(&mut self, what: &str) -> T {
        match self.read_line() {
            Ok(Some(line)) => match line.parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!("Unparseable reply for {}: {:?}", what, line);
                    T::default()
                }
            },
            Ok(None) => {
                warn!("No reply for {} within {:?}", what, self.reply_timeout);
                T::default()
            }
            Err(e) => {
                warn!("Channel error reading {}: {}", what, e);
                T::default()
            }
        }
    }

    /// Read one fault register; unresponsive subsystems report code 0
    pub fn read_fault(&mut self, source: FaultSource) -> Result<i64> {
        self.send_line(&source.request())?;
        Ok(self.parse_reply(&source.request()))
    }

    /// Command a velocity set-point (load-bearing in velocity mode)
    pub fn set_velocity(&mut self, axis: u8, velocity: f32) -> Result<()> {
        self.set_parameter(axis, "controller.input_vel", velocity)
    }

    /// Command a torque set-point (load-bearing in torque mode)
    pub fn set_torque(&mut self, axis: u8, torque: f32) -> Result<()> {
        self.set_parameter(axis, "controller.input_torque", torque)
    }

    /// Select the closed-loop control mode for one axis
    pub fn set_control_mode(&mut self, axis: u8, mode: ControlModeCode) -> Result<()> {
        self.set_parameter(axis, "controller.config.control_mode", mode as i64)
    }

    /// Request an axis state transition, optionally waiting for the device
    /// to report return-to-idle. Calibration settling time is physical, so
    /// the wait is bounded by `timeout`, not a fixed tick count.
    ///
    /// Returns false if the device never reported idle within the timeout.
    pub fn run_state(
        &mut self,
        axis: u8,
        state: AxisStateCode,
        wait: bool,
        timeout: Duration,
    ) -> Result<bool> {
        self.set_parameter(axis, "requested_state", state as i64)?;
        if !wait {
            return Ok(true);
        }

        let deadline = Instant::now() + timeout;
        loop {
            std::thread::sleep(STATE_POLL_INTERVAL);
            let current = self.read_long(axis, "current_state")?;
            if current == AxisStateCode::Idle as i64 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!(
                    "Axis{}: state {:?} did not settle within {:?}",
                    axis, state, timeout
                );
                return Ok(false);
            }
        }
    }

    /// Clear device error flags ("sc")
    pub fn clear_errors(&mut self) -> Result<()> {
        self.send_line("sc")
    }

    /// Reboot the device ("sr")
    pub fn reboot(&mut self) -> Result<()> {
        self.send_line("sr")
    }
}

/// In-memory channel for protocol tests: scripted replies in, captured
/// commands out. Shared by the modules that drive a fake device.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io::{self, Cursor};

    pub(crate) struct FakeChannel {
        rx: Cursor<Vec<u8>>,
        pub(crate) tx: Vec<u8>,
    }

    impl FakeChannel {
        pub(crate) fn new(replies: &str) -> Self {
            Self {
                rx: Cursor::new(replies.as_bytes().to_vec()),
                tx: Vec::new(),
            }
        }
    }

    impl Read for FakeChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rx.read(buf)
        }
    }

    impl Write for FakeChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn client(replies: &str) -> OdriveClient<FakeChannel> {
        OdriveClient::with_reply_timeout(FakeChannel::new(replies), Duration::from_millis(10))
    }

    pub(crate) fn sent(client: &OdriveClient<FakeChannel>) -> String {
        String::from_utf8(client.channel.tx.clone()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{client, sent};
    use super::*;

    #[test]
    fn test_parameter_write_line_format() {
        let mut c = client("");
        c.set_parameter(0, "controller.config.vel_limit", 50.0)
            .unwrap();
        assert_eq!(sent(&c), "w axis0.controller.config.vel_limit 50\n");
    }

    #[test]
    fn test_torque_and_velocity_wrappers() {
        let mut c = client("");
        c.set_torque(0, -0.5).unwrap();
        c.set_velocity(1, 0.0).unwrap();
        assert_eq!(
            sent(&c),
            "w axis0.controller.input_torque -0.5\nw axis1.controller.input_vel 0\n"
        );
    }

    #[test]
    fn test_read_float_parses_reply() {
        let mut c = client("3.14159\n");
        let value = c.read_float(1, "encoder.pos_estimate").unwrap();
        assert!((value - 3.14159).abs() < 1e-6);
        assert_eq!(sent(&c), "r axis1.encoder.pos_estimate\n");
    }

    #[test]
    fn test_missing_reply_yields_zero_sentinel() {
        let mut c = client("");
        assert_eq!(c.read_float(0, "encoder.pos_estimate").unwrap(), 0.0);
        assert_eq!(c.read_long(0, "motor.error").unwrap(), 0);
    }

    #[test]
    fn test_malformed_reply_yields_zero_sentinel() {
        let mut c = client("not-a-number\n");
        assert_eq!(c.read_long(0, "motor.error").unwrap(), 0);
    }

    /// Endless byte stream that never produces a line terminator
    struct ChatterChannel;

    impl std::io::Read for ChatterChannel {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf[0] = b'7';
            Ok(1)
        }
    }

    impl std::io::Write for ChatterChannel {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unterminated_reply_stream_yields_sentinel() {
        // Bytes keep arriving but no newline ever does; the read must
        // still terminate and substitute the sentinel
        let mut c = OdriveClient::with_reply_timeout(ChatterChannel, Duration::from_millis(10));
        assert_eq!(c.read_float(0, "encoder.pos_estimate").unwrap(), 0.0);
    }

    #[test]
    fn test_fault_request_lines() {
        assert_eq!(FaultSource::Device.request(), "error");
        assert_eq!(FaultSource::Motor(0).request(), "r axis0.motor.error");
        assert_eq!(FaultSource::Axis(1).request(), "r axis1.error");
        assert_eq!(FaultSource::Encoder(0).request(), "r axis0.encoder.error");
        assert_eq!(
            FaultSource::Controller(1).request(),
            "r axis1.controller.error"
        );
    }

    #[test]
    fn test_device_state_codes_match_firmware() {
        assert_eq!(AxisStateCode::Idle as i64, 1);
        assert_eq!(AxisStateCode::MotorCalibration as i64, 4);
        assert_eq!(AxisStateCode::EncoderOffsetCalibration as i64, 7);
        assert_eq!(AxisStateCode::ClosedLoopControl as i64, 8);
        assert_eq!(ControlModeCode::TorqueControl as i64, 1);
        assert_eq!(ControlModeCode::VelocityControl as i64, 2);
    }

    #[test]
    fn test_run_state_no_wait_returns_immediately() {
        let mut c = client("");
        let ok = c
            .run_state(0, AxisStateCode::ClosedLoopControl, false, Duration::ZERO)
            .unwrap();
        assert!(ok);
        assert_eq!(sent(&c), "w axis0.requested_state 8\n");
    }

    #[test]
    fn test_run_state_waits_for_idle() {
        // Device reports calibration in progress (4), then idle (1)
        let mut c = client("4\n1\n");
        let ok = c
            .run_state(
                0,
                AxisStateCode::MotorCalibration,
                true,
                Duration::from_secs(1),
            )
            .unwrap();
        assert!(ok);
        let tx = sent(&c);
        assert!(tx.starts_with("w axis0.requested_state 4\n"));
        assert!(tx.contains("r axis0.current_state\n"));
    }

    #[test]
    fn test_run_state_times_out_when_never_idle() {
        let mut c = client("7\n7\n7\n");
        let ok = c
            .run_state(
                0,
                AxisStateCode::EncoderOffsetCalibration,
                true,
                Duration::ZERO,
            )
            .unwrap();
        assert!(!ok);
    }
}
