// 100 Hz balance loop with watchdog and safety supervision
//
// Per tick: fuse orientation, estimate spoke kinematics, poll device
// health, let the supervisor decide pass-through vs override, emit the
// resulting motor commands, publish telemetry.

use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, CONTROL_MODE, ControlMode, IMU_ENABLED, INTERLOCK_GPIO, IRON_CAL_PATH, LEVER_ARM,
    LOOP_HZ, MOTOR_CURRENT_LIMIT, MOTOR_ENABLED, MOTOR_VELOCITY_LIMIT, ODRIVE_BAUDRATE,
    ODRIVE_PORT, OMEGA_BRAKE_LIMIT, OVERSPEED_POLICY, SAMPLING_PERIOD, TOPIC_CMD_ODRIVE,
    TOPIC_CMD_TORQUE, TOPIC_HEALTH, TOPIC_IMU_RAW, TOPIC_RT_FAULTS, TOPIC_RT_SENSORS,
    TORQUE_CONSTANT,
};
use crate::control::faults;
use crate::control::orientation::OrientationAdapter;
use crate::control::spokes::{self, SpokeEstimator};
use crate::control::supervisor::{Decision, SafetySupervisor, SupervisorState};
use crate::hw::{self, DigitalInput, FusionFilter, ImuSample, InertialSource, IronCalibration};
use crate::messages::{FaultReport, OperatorCommand, RuntimeHealth, SensorReport, TorqueCommand};
use crate::odrive::protocol::DEFAULT_TIMEOUT_MS;
use crate::odrive::{Axis, ControlModeCode, MotorAxisState, OdriveClient, SerialChannel};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Latest-sample IMU source fed by an external sensor daemon over zenoh.
/// Polling once per tick drains the queue and keeps the newest sample.
struct BusImu {
    subscriber: zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    last: ImuSample,
}

impl InertialSource for BusImu {
    fn sample(&mut self) -> std::io::Result<ImuSample> {
        while let Ok(Some(sample)) = self.subscriber.try_recv() {
            match serde_json::from_slice::<ImuSample>(&sample.payload().to_bytes()) {
                Ok(parsed) => self.last = parsed,
                Err(e) => warn!("Failed to parse IMU sample: {}", e),
            }
        }
        Ok(self.last)
    }
}

pub struct Runtime<C: SerialChannel> {
    client: OdriveClient<C>,
    axes: [Axis; 2],
    orientation: OrientationAdapter,
    spokes: SpokeEstimator,
    supervisor: SafetySupervisor,
    control_mode: ControlMode,
    filter: Box<dyn FusionFilter + Send>,
    imu: Box<dyn InertialSource + Send>,
    interlock: Box<dyn DigitalInput + Send>,
    last_sample: ImuSample,
    latest_cmd: Option<TorqueCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl<C: SerialChannel> Runtime<C> {
    /// Startup sequence. The ordering is load-bearing: sensors must be
    /// validated before the device can ever be commanded, and offsets are
    /// captured only after both axes completed calibration.
    pub fn bring_up(
        channel: C,
        mut imu: Box<dyn InertialSource + Send>,
        interlock: Box<dyn DigitalInput + Send>,
        mut filter: Box<dyn FusionFilter + Send>,
        control_mode: ControlMode,
    ) -> Result<Self, BoxError> {
        // 1. Sensors up; refusing to run beats actuating on unvalidated sensing
        let first_sample = imu
            .sample()
            .map_err(|e| format!("IMU bring-up failed: {}", e))?;

        // 2. Iron calibration (missing file is non-fatal)
        let cal = IronCalibration::load(Path::new(IRON_CAL_PATH));

        // 3. The fusion filter instance arrives initialized; wrap it
        let mut orientation = OrientationAdapter::new(cal, LEVER_ARM, SAMPLING_PERIOD);

        // 4. Device channel: probe liveness once
        let mut client = OdriveClient::from_channel(channel);
        let vbus = client.read_device_float("vbus_voltage")?;
        info!("Vbus voltage: {}", vbus);

        // 5-6. Zero error flags, write limits
        info!("Setting parameters...");
        for axis in 0..2u8 {
            client.set_parameter(axis, "error", 0)?;
            client.set_parameter(axis, "controller.config.vel_limit", MOTOR_VELOCITY_LIMIT)?;
            client.set_parameter(axis, "motor.config.current_lim", MOTOR_CURRENT_LIMIT)?;
        }

        // 7. Calibrate both axes
        let mut axes = [Axis::new(0), Axis::new(1)];
        for axis in axes.iter_mut() {
            if !axis.calibrate(&mut client)? {
                warn!("Axis{} calibration halted in {:?}", axis.id, axis.state);
            }
        }

        // 8. Capture zero-offsets from the first valid reads after device
        // bring-up. Calibration takes tens of seconds, so the bring-up
        // sample from step 1 is stale by now; the yaw offset must come
        // from a fresh read.
        std::thread::sleep(Duration::from_millis(250));
        let (raw0, raw1) = spokes::read_raw_positions(&mut client)?;
        let spokes = SpokeEstimator::capture_offsets(raw0, raw1, SAMPLING_PERIOD);
        let settled = match imu.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("IMU read failed at offset capture, reusing bring-up sample: {}", e);
                first_sample
            }
        };
        let first_fused = orientation.update(settled, filter.as_mut());
        orientation.set_yaw_offset(first_fused.yaw);

        // 9. Select the configured control mode
        let mode = ControlModeCode::from_mode(control_mode);
        for axis in axes.iter_mut() {
            axis.switch_control_mode(&mut client, mode)?;
            client.set_parameter(axis.id, "motor.config.torque_constant", TORQUE_CONSTANT)?;
        }

        info!("Ready!");
        Ok(Self {
            client,
            axes,
            orientation,
            spokes,
            supervisor: SafetySupervisor::new(OVERSPEED_POLICY, OMEGA_BRAKE_LIMIT),
            control_mode,
            filter,
            imu,
            interlock,
            last_sample: settled,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        })
    }

    /// Process incoming torque command
    fn on_command(&mut self, cmd: TorqueCommand) {
        info!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Process an operator command: stop, issue the system command, then
    /// recalibrate both axes and restore the control mode.
    fn on_operator(&mut self, cmd: OperatorCommand) -> crate::odrive::protocol::Result<()> {
        self.client.set_velocity(0, 0.0)?;
        self.client.set_velocity(1, 0.0)?;
        match cmd {
            OperatorCommand::ClearErrors => {
                info!("Operator: clearing errors and recalibrating");
                self.client.clear_errors()?;
                std::thread::sleep(Duration::from_millis(250));
            }
            OperatorCommand::Reboot => {
                info!("Operator: rebooting device and recalibrating");
                self.client.reboot()?;
                std::thread::sleep(Duration::from_secs(2));
            }
        }
        let mode = ControlModeCode::from_mode(self.control_mode);
        for axis in &mut self.axes {
            axis.state = MotorAxisState::Uncalibrated;
            if !axis.calibrate(&mut self.client)? {
                warn!("Axis{} recalibration halted in {:?}", axis.id, axis.state);
                continue;
            }
            axis.switch_control_mode(&mut self.client, mode)?;
        }
        self.supervisor.clear();
        Ok(())
    }

    /// Effort for this tick, gated by the command watchdog
    fn commanded_effort(&mut self) -> (f32, f32) {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - fall back to zero effort
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), zeroing effort", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            (0.0, 0.0)
        } else if let Some(ref cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            (cmd.effort0, cmd.effort1)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            (0.0, 0.0)
        }
    }

    /// One control tick. Returns the telemetry to publish: the combined
    /// sensor report, and the fault vector when any subsystem is faulted.
    fn tick(&mut self) -> crate::odrive::protocol::Result<(SensorReport, Option<FaultReport>)> {
        let raw = match self.imu.sample() {
            Ok(sample) => {
                self.last_sample = sample;
                sample
            }
            Err(e) => {
                warn!("IMU read failed, reusing last sample: {}", e);
                self.last_sample
            }
        };
        let orientation = self.orientation.update(raw, self.filter.as_mut());
        let (raw0, raw1) = spokes::read_raw_positions(&mut self.client)?;
        let spoke = self.spokes.update(raw0, raw1);

        let (fault_report, any_fault) = faults::poll_all(&mut self.client)?;

        let interlock_asserted = !self.interlock.is_high(); // active-low
        let decision = self
            .supervisor
            .evaluate(interlock_asserted, orientation.angular_velocity);
        let effort = self.commanded_effort();
        self.actuate(decision, effort)?;
        if self.supervisor.state() == SupervisorState::Tripped {
            self.health = RuntimeHealth::Tripped;
        }

        Ok((
            SensorReport::new(&orientation, &spoke),
            any_fault.then_some(fault_report),
        ))
    }

    fn actuate(&mut self, decision: Decision, effort: (f32, f32)) -> crate::odrive::protocol::Result<()> {
        match decision {
            Decision::Hold | Decision::Brake => self.hold_axes(),
            Decision::Run { restore_mode } => {
                if restore_mode {
                    info!("Resuming {:?} control", self.control_mode);
                    let mode = ControlModeCode::from_mode(self.control_mode);
                    for axis in &mut self.axes {
                        axis.switch_control_mode(&mut self.client, mode)?;
                    }
                }
                // Axis 0 is sign-inverted, same convention as its encoder
                match self.control_mode {
                    ControlMode::Torque => {
                        self.client.set_torque(0, -effort.0)?;
                        self.client.set_torque(1, effort.1)?;
                    }
                    ControlMode::Velocity => {
                        self.client.set_velocity(0, -effort.0 * MOTOR_VELOCITY_LIMIT)?;
                        self.client.set_velocity(1, effort.1 * MOTOR_VELOCITY_LIMIT)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Bounded velocity-hold: both axes to velocity mode, zero set-point.
    /// The device's vel_limit keeps the hold bounded.
    fn hold_axes(&mut self) -> crate::odrive::protocol::Result<()> {
        for axis in &mut self.axes {
            axis.switch_control_mode(&mut self.client, ControlModeCode::VelocityControl)?;
        }
        self.client.set_velocity(0, 0.0)?;
        self.client.set_velocity(1, 0.0)
    }
}

pub async fn run() -> Result<(), BoxError> {
    // The AHRS numerics live outside this crate; deployments hand their
    // filter to run_with_filter. The default is only useful on the bench.
    run_with_filter(Box::new(hw::sim::FlatFilter)).await
}

pub async fn run_with_filter(filter: Box<dyn FusionFilter + Send>) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_torque = session.declare_subscriber(TOPIC_CMD_TORQUE).await?;
    let sub_operator = session.declare_subscriber(TOPIC_CMD_ODRIVE).await?;
    let pub_sensors = session.declare_publisher(TOPIC_RT_SENSORS).await?;
    let pub_faults = session.declare_publisher(TOPIC_RT_FAULTS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let imu: Box<dyn InertialSource + Send> = if IMU_ENABLED {
        let subscriber = session.declare_subscriber(TOPIC_IMU_RAW).await?;
        info!("Waiting for first IMU sample on {}...", TOPIC_IMU_RAW);
        let deadline = Instant::now() + Duration::from_secs(10);
        let first = loop {
            if let Ok(Some(sample)) = subscriber.try_recv() {
                match serde_json::from_slice::<ImuSample>(&sample.payload().to_bytes()) {
                    Ok(parsed) => break parsed,
                    Err(e) => warn!("Failed to parse IMU sample: {}", e),
                }
            }
            if Instant::now() >= deadline {
                return Err("IMU bring-up failed: no sample within 10s".into());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        Box::new(BusImu {
            subscriber,
            last: first,
        })
    } else {
        warn!("IMU disabled, using simulated stationary source");
        Box::new(hw::sim::StationaryImu)
    };

    let interlock: Box<dyn DigitalInput + Send> = if MOTOR_ENABLED {
        Box::new(hw::GpioInput::new(INTERLOCK_GPIO))
    } else {
        Box::new(hw::sim::FixedLevel(true)) // released
    };

    let channel: Box<dyn SerialChannel + Send> = if MOTOR_ENABLED {
        info!("Opening ODrive channel on {}", ODRIVE_PORT);
        Box::new(
            serialport::new(ODRIVE_PORT, ODRIVE_BAUDRATE)
                .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
                .open()?,
        )
    } else {
        warn!("Motor control disabled, commands go to a null channel");
        Box::new(hw::sim::NullChannel)
    };

    let mut runtime = Runtime::bring_up(channel, imu, interlock, filter, CONTROL_MODE)?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_TORQUE, TOPIC_CMD_ODRIVE);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_RT_SENSORS, TOPIC_RT_FAULTS, TOPIC_HEALTH
    );

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_torque.try_recv() {
            match serde_json::from_slice::<TorqueCommand>(&sample.payload().to_bytes()) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_operator.try_recv() {
            match serde_json::from_slice::<OperatorCommand>(&sample.payload().to_bytes()) {
                Ok(cmd) => {
                    if let Err(e) = runtime.on_operator(cmd) {
                        warn!("Operator command failed: {}", e);
                    }
                }
                Err(e) => warn!("Failed to parse operator command: {}", e),
            }
        }

        // 2. Sensor fusion, fault poll, supervision, actuation
        let (report, fault_report) = runtime.tick()?;

        // 3. Publish the fault vector only when something is faulted
        if let Some(faults) = fault_report {
            pub_faults.put(serde_json::to_string(&faults)?).await?;
        }

        // 4. Publish sensor state and health
        pub_sensors.put(serde_json::to_string(&report)?).await?;
        pub_health.put(serde_json::to_string(&runtime.health)?).await?;
    }
}
