//! # Fast RPLIDAR
//!
//! `fast_rplidar` is a driver core for Slamtec RPLIDAR laser range scanners talking the
//! legacy 5-byte measurement protocol over a serial line.
//!
//! A [`RplidarSession`] owns the transport, runs the handshake and motor control, and
//! while scanning hands the transport to a background thread that assembles full
//! rotations. Consumers read the latest complete [`Scan`] from a shared
//! [`ScanSnapshot`] without blocking the reader thread.
//!
//! ```ignore
//! use fast_rplidar::{PortConfig, RplidarSession, SessionConfig};
//! use std::time::Duration;
//!
//! let mut session = RplidarSession::connect_serial(
//!     &PortConfig::new("/dev/ttyUSB0", 0),
//!     SessionConfig::default(),
//! )?;
//! println!("{}", session.device_info().unwrap());
//! session.start_motor_default()?;
//! session.start_scan()?;
//! let points = session.get_scan_points(Duration::from_secs(2), true)?;
//! session.stop_motor()?;
//! ```

extern crate byteorder;
extern crate log;

pub mod accumulator;
mod answers;
pub mod base;
mod cmds;
pub mod config;
pub mod protocol;
pub mod serial;
pub mod snapshot;
#[cfg(test)]
mod testing;
pub mod types;
pub mod utils;

pub use crate::accumulator::{SampleFramer, ScanAccumulator};
pub use crate::base::{Answer, Channel, Error, Message, ResponseHeader, Result, Transport};
pub use crate::config::{PortConfig, SessionConfig};
pub use crate::protocol::HostProtocol;
pub use crate::serial::SerialTransport;
pub use crate::snapshot::{to_points, ScanSnapshot, ScanStats};
pub use crate::types::{
    DeviceInfo, Health, MotorControl, Point2D, RangeSample, Scan, ScanOptions, SessionState,
};

use crate::accumulator::{ScanWorker, WorkerSettings};
use crate::answers::*;
use crate::cmds::*;
use crate::protocol::{decode_device_info, decode_health};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

type DeviceChannel<T> = Channel<HostProtocol, T>;

/// A connection to one RPLIDAR device.
///
/// The session moves through `Disconnected -> Connected -> MotorRunning -> Scanning`
/// and back. While scanning, the transport belongs to the scan worker and every
/// command other than `stop_scan` and `stop_motor` is refused.
pub struct RplidarSession<T: Transport + 'static> {
    channel: Option<DeviceChannel<T>>,
    worker: Option<ScanWorker<T>>,
    state: SessionState,
    config: SessionConfig,
    device_info: Option<DeviceInfo>,
    motor_control: Option<MotorControl>,
    snapshot: Arc<ScanSnapshot>,
}

impl<T: Transport + 'static> fmt::Debug for RplidarSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RplidarSession")
            .field("state", &self.state)
            .field("device_info", &self.device_info)
            .field("motor_control", &self.motor_control)
            .field("has_transport", &(self.channel.is_some() || self.worker.is_some()))
            .finish()
    }
}

/// Sends `cmd` and waits for a single answer of type `ans_type`.
fn query<T: Transport>(
    channel: &mut DeviceChannel<T>,
    operation: &'static str,
    msg: &Message,
    ans_type: u8,
    timeout: Duration,
) -> Result<Answer> {
    let started = Instant::now();
    trace!("Invoking command: {:02X}", msg.cmd);
    match channel.invoke(msg, timeout)? {
        Some(answer) => {
            trace!(
                "Received response for {:02X}, type: {:02X}, len: {}",
                msg.cmd,
                answer.header.data_type,
                answer.data.len()
            );
            if !answer.header.is_single || answer.header.data_type != ans_type {
                error!(
                    "Unexpected response to {}: type {:02X}, single {}",
                    operation, answer.header.data_type, answer.header.is_single
                );
                return Err(Error::protocol(format!(
                    "unexpected response type: expected {:02X}, got {:02X}",
                    ans_type, answer.header.data_type
                )));
            }
            Ok(answer)
        }
        None => {
            warn!("Timeout waiting for {} response", operation);
            Err(Error::OperationTimeout {
                operation,
                elapsed: started.elapsed(),
            })
        }
    }
}

fn closed_transport(operation: &'static str, started: Instant) -> Error {
    Error::ConnectionError {
        operation,
        elapsed: started.elapsed(),
        description: "transport closed, install a new one with replace_transport".to_owned(),
    }
}

/// One handshake attempt: optional core reset, banner flush, then GET_INFO.
fn handshake_once<T: Transport>(
    channel: &mut DeviceChannel<T>,
    config: &SessionConfig,
) -> Result<DeviceInfo> {
    channel.flush_input()?;
    if config.reset_on_connect {
        trace!("Sending RESET command ({:02X})", RPLIDAR_CMD_RESET);
        channel.write(&Message::new(RPLIDAR_CMD_RESET))?;
        sleep(config.boot_delay);
        channel.flush_input()?;
    }
    let answer = query(
        channel,
        "get_device_info",
        &Message::new(RPLIDAR_CMD_GET_DEVICE_INFO),
        RPLIDAR_ANS_TYPE_DEVINFO,
        config.handshake_timeout,
    )?;
    decode_device_info(&answer.data)
}

impl<T: Transport + 'static> RplidarSession<T> {
    /// Creates a disconnected session over `transport`.
    pub fn new(transport: T, config: SessionConfig) -> Result<RplidarSession<T>> {
        config.validate()?;
        trace!("Creating new RplidarSession");
        Ok(RplidarSession {
            channel: Some(Channel::with_read_buffer_size(
                HostProtocol::new(),
                transport,
                config.read_buffer_size,
            )),
            worker: None,
            state: SessionState::Disconnected,
            config,
            device_info: None,
            motor_control: None,
            snapshot: Arc::new(ScanSnapshot::new()),
        })
    }

    /// Current session state. A scan worker that died on a transport error counts as
    /// `Disconnected` even before the next command notices it.
    pub fn state(&self) -> SessionState {
        if self.worker_failed() {
            SessionState::Disconnected
        } else {
            self.state
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device identity read during `connect`.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn serial_number(&self) -> Option<String> {
        self.device_info.as_ref().map(DeviceInfo::serial_number_hex)
    }

    /// Firmware version as `(major, minor)`.
    pub fn firmware_version(&self) -> Option<(u8, u8)> {
        self.device_info.map(|info| info.firmware_version)
    }

    pub fn hardware_version(&self) -> Option<u8> {
        self.device_info.map(|info| info.hardware_version)
    }

    /// Motor drive mode, known after the first `start_motor`.
    pub fn motor_control(&self) -> Option<MotorControl> {
        self.motor_control
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            warn!("{} refused while {}", operation, self.state);
            Err(Error::DeviceError {
                operation,
                state: self.state,
            })
        }
    }

    fn worker_failed(&self) -> bool {
        self.state == SessionState::Scanning
            && (self.snapshot.fault().is_some()
                || !self.worker.as_ref().map_or(false, ScanWorker::is_running))
    }

    fn worker_fault(&self, operation: &'static str, started: Instant) -> Option<Error> {
        if !self.worker_failed() {
            return None;
        }
        let description = self
            .snapshot
            .fault()
            .unwrap_or_else(|| "scan worker stopped unexpectedly".to_owned());
        Some(Error::ConnectionError {
            operation,
            elapsed: started.elapsed(),
            description,
        })
    }

    /// Joins a scan worker that died on its own and disconnects the session.
    fn reap_faulted_worker(&mut self, operation: &'static str) -> Result<()> {
        let started = Instant::now();
        let fault = match self.worker_fault(operation, started) {
            Some(fault) => fault,
            None => return Ok(()),
        };
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.stop() {
                warn!("Joining failed scan worker: {}", e);
            }
        }
        error!("{} found the scan worker dead: {}", operation, fault);
        self.drop_connection();
        Err(fault)
    }

    fn channel_mut(&mut self, operation: &'static str, started: Instant) -> Result<&mut DeviceChannel<T>> {
        self.channel
            .as_mut()
            .ok_or_else(|| closed_transport(operation, started))
    }

    /// Drops the transport and the device state after an unrecoverable failure.
    fn drop_connection(&mut self) {
        self.worker = None;
        self.channel = None;
        self.state = SessionState::Disconnected;
        self.device_info = None;
        self.motor_control = None;
    }

    /// Turns transport failures into `ConnectionError` and disconnects. Other errors pass.
    fn check_io<R>(&mut self, operation: &'static str, started: Instant, result: Result<R>) -> Result<R> {
        match result {
            Err(Error::IoError(e)) => {
                error!("Transport failure during {}: {}", operation, e);
                self.drop_connection();
                Err(Error::ConnectionError {
                    operation,
                    elapsed: started.elapsed(),
                    description: e.to_string(),
                })
            }
            other => other,
        }
    }

    /// Resets the device and reads its identity, retrying up to `handshake_attempts` times.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        const OPERATION: &str = "connect";
        self.reap_faulted_worker(OPERATION)?;
        self.require(OPERATION, &[SessionState::Disconnected])?;
        let started = Instant::now();
        let attempts = self.config.handshake_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!("Handshake attempt {}/{}", attempt, attempts);
            let result = match self.channel.as_mut() {
                Some(channel) => handshake_once(channel, &self.config),
                None => return Err(closed_transport(OPERATION, started)),
            };
            match result {
                Ok(info) => {
                    info!("Connected: {}", info);
                    self.device_info = Some(info);
                    self.motor_control = None;
                    self.state = SessionState::Connected;
                    return Ok(info);
                }
                Err(Error::IoError(e)) => {
                    return self.check_io(OPERATION, started, Err(Error::IoError(e)));
                }
                Err(e) => {
                    warn!("Handshake attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }
        }

        error!("No device answered after {} attempts", attempts);
        Err(Error::ConnectionError {
            operation: OPERATION,
            elapsed: started.elapsed(),
            description: format!("no device info after {} attempts: {}", attempts, last_error),
        })
    }

    /// Installs a fresh transport on a disconnected session.
    pub fn replace_transport(&mut self, transport: T) -> Result<()> {
        if let Err(e) = self.reap_faulted_worker("replace_transport") {
            debug!("Replacing transport after {}", e);
        }
        self.require("replace_transport", &[SessionState::Disconnected])?;
        self.channel = Some(Channel::with_read_buffer_size(
            HostProtocol::new(),
            transport,
            self.config.read_buffer_size,
        ));
        self.device_info = None;
        self.motor_control = None;
        Ok(())
    }

    /// Queries the device health status.
    pub fn health(&mut self) -> Result<Health> {
        const OPERATION: &str = "get_device_health";
        self.reap_faulted_worker(OPERATION)?;
        self.require(OPERATION, &[SessionState::Connected, SessionState::MotorRunning])?;
        let started = Instant::now();
        let timeout = self.config.command_timeout;
        let channel = self.channel_mut(OPERATION, started)?;
        let result = channel.flush_input().and_then(|_| {
            query(
                channel,
                OPERATION,
                &Message::new(RPLIDAR_CMD_GET_DEVICE_HEALTH),
                RPLIDAR_ANS_TYPE_DEVHEALTH,
                timeout,
            )
        });
        let answer = self.check_io(OPERATION, started, result)?;
        let health = decode_health(&answer.data)?;
        debug!("Device health: {:?}", health);
        Ok(health)
    }

    /// Reboots the device core. The motor stops and the session returns to `Connected`.
    pub fn reset(&mut self) -> Result<()> {
        const OPERATION: &str = "reset";
        self.reap_faulted_worker(OPERATION)?;
        self.require(OPERATION, &[SessionState::Connected, SessionState::MotorRunning])?;
        let started = Instant::now();
        let boot_delay = self.config.boot_delay;
        let dtr_motor = self.motor_control == Some(MotorControl::Dtr);
        let channel = self.channel_mut(OPERATION, started)?;
        let result = channel
            .write(&Message::new(RPLIDAR_CMD_RESET))
            .and_then(|_| {
                if dtr_motor {
                    channel.transport_mut().set_dtr(true)?;
                }
                sleep(boot_delay);
                channel.flush_input()
            });
        self.check_io(OPERATION, started, result)?;
        self.state = SessionState::Connected;
        debug!("Device reset");
        Ok(())
    }

    fn probe_motor_control(&mut self, started: Instant) -> Result<MotorControl> {
        const OPERATION: &str = "get_acc_board_flag";
        if let Some(control) = self.motor_control {
            return Ok(control);
        }
        let timeout = self.config.command_timeout;
        let channel = self.channel_mut(OPERATION, started)?;
        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, 0);
        let result = channel.flush_input().and_then(|_| {
            query(
                channel,
                OPERATION,
                &Message::with_data(RPLIDAR_CMD_GET_ACC_BOARD_FLAG, &payload),
                RPLIDAR_ANS_TYPE_ACC_BOARD_FLAG,
                timeout,
            )
        });
        let control = match self.check_io(OPERATION, started, result) {
            Ok(answer) if answer.data.len() == RPLIDAR_ANS_LENGTH_ACC_BOARD_FLAG => {
                let flag = LittleEndian::read_u32(&answer.data);
                trace!("Parsed accessory board flag: {:08X}", flag);
                if flag & RPLIDAR_RESP_ACC_BOARD_FLAG_MOTOR_CTRL_SUPPORT_MASK != 0 {
                    MotorControl::Pwm
                } else {
                    MotorControl::Dtr
                }
            }
            Ok(answer) => {
                warn!(
                    "Accessory board flag answer has {} bytes, using DTR",
                    answer.data.len()
                );
                MotorControl::Dtr
            }
            Err(e @ Error::ConnectionError { .. }) => return Err(e),
            Err(e) => {
                debug!("No accessory board motor control ({}), using DTR", e);
                MotorControl::Dtr
            }
        };
        info!("Motor control: {:?}", control);
        self.motor_control = Some(control);
        Ok(control)
    }

    /// Spins the motor at `pwm` (0 to 1023) on PWM boards, or enables it through DTR.
    ///
    /// Returns without waiting for the motor to reach a stable speed.
    pub fn start_motor(&mut self, pwm: u16) -> Result<()> {
        const OPERATION: &str = "start_motor";
        self.reap_faulted_worker(OPERATION)?;
        self.require(OPERATION, &[SessionState::Connected, SessionState::MotorRunning])?;
        if pwm > config::RPLIDAR_MAX_MOTOR_PWM {
            return Err(Error::OperationFail {
                description: format!("motor PWM {} exceeds {}", pwm, config::RPLIDAR_MAX_MOTOR_PWM),
            });
        }
        let started = Instant::now();
        let control = self.probe_motor_control(started)?;
        let channel = self.channel_mut(OPERATION, started)?;
        let result = match control {
            MotorControl::Pwm => {
                trace!("Setting motor PWM to {}", pwm);
                let mut payload = [0; 2];
                LittleEndian::write_u16(&mut payload, pwm);
                channel
                    .write(&Message::with_data(RPLIDAR_CMD_SET_MOTOR_PWM, &payload))
                    .map(|_| ())
            }
            MotorControl::Dtr => channel.transport_mut().set_dtr(false).map_err(Error::from),
        };
        self.check_io(OPERATION, started, result)?;
        self.state = SessionState::MotorRunning;
        debug!("Motor started");
        Ok(())
    }

    /// Starts the motor with the configured `motor_pwm`.
    pub fn start_motor_default(&mut self) -> Result<()> {
        self.start_motor(self.config.motor_pwm)
    }

    /// Stops the motor, ending the scan first if one is running.
    pub fn stop_motor(&mut self) -> Result<()> {
        const OPERATION: &str = "stop_motor";
        if self.state == SessionState::Scanning {
            self.stop_scan()?;
        }
        self.require(OPERATION, &[SessionState::Connected, SessionState::MotorRunning])?;
        let started = Instant::now();
        let control = self.motor_control;
        let channel = self.channel_mut(OPERATION, started)?;
        let result = match control {
            Some(MotorControl::Pwm) => {
                trace!("Stopping motor (PWM 0)");
                let mut payload = [0; 2];
                LittleEndian::write_u16(&mut payload, 0);
                channel
                    .write(&Message::with_data(RPLIDAR_CMD_SET_MOTOR_PWM, &payload))
                    .map(|_| ())
            }
            Some(MotorControl::Dtr) => channel.transport_mut().set_dtr(true).map_err(Error::from),
            None => Ok(()),
        };
        self.check_io(OPERATION, started, result)?;
        self.state = SessionState::Connected;
        debug!("Motor stopped");
        Ok(())
    }

    /// Starts a standard scan.
    pub fn start_scan(&mut self) -> Result<()> {
        self.start_scan_with_options(&ScanOptions::default())
    }

    /// Starts a scan and hands the transport to the scan worker.
    ///
    /// The published snapshot is cleared; the first scan becomes available once a
    /// full rotation has been seen.
    pub fn start_scan_with_options(&mut self, options: &ScanOptions) -> Result<()> {
        const OPERATION: &str = "start_scan";
        self.reap_faulted_worker(OPERATION)?;
        self.require(OPERATION, &[SessionState::MotorRunning])?;
        let started = Instant::now();
        let timeout = self.config.command_timeout;
        let cmd = if options.force_scan {
            RPLIDAR_CMD_FORCE_SCAN
        } else {
            RPLIDAR_CMD_SCAN
        };

        let channel = self.channel_mut(OPERATION, started)?;
        let result = channel.flush_input().and_then(|_| {
            trace!("Sending legacy scan command: {:02X}", cmd);
            channel.write(&Message::new(cmd))?;
            channel.read_until(timeout)
        });
        let header = match self.check_io(OPERATION, started, result)? {
            Some(answer) => answer.header,
            None => {
                warn!("Timeout waiting for scan answer header");
                return Err(Error::OperationTimeout {
                    operation: OPERATION,
                    elapsed: started.elapsed(),
                });
            }
        };
        if header.is_single
            || header.data_type != RPLIDAR_ANS_TYPE_MEASUREMENT
            || header.data_length as usize != RPLIDAR_ANS_LENGTH_MEASUREMENT
        {
            error!("Unexpected scan answer header: {:?}", header);
            return Err(Error::protocol(format!(
                "unexpected scan answer: type {:02X}, size {}, single {}",
                header.data_type, header.data_length, header.is_single
            )));
        }

        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => return Err(closed_transport(OPERATION, started)),
        };
        self.snapshot.clear();
        let settings = WorkerSettings {
            read_timeout: self.config.stream_read_timeout,
            read_buffer_size: self.config.read_buffer_size,
            min_quality: self.config.min_quality,
            max_samples: self.config.max_samples_per_scan,
        };
        match ScanWorker::spawn(channel, self.snapshot.clone(), settings) {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state = SessionState::Scanning;
                info!("Scan started (force: {})", options.force_scan);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start scan worker: {}", e);
                self.drop_connection();
                Err(e)
            }
        }
    }

    /// Ends the scan: joins the worker, sends STOP, and drains what the device still sends.
    ///
    /// Does nothing when no scan is running. The last published scan stays available.
    pub fn stop_scan(&mut self) -> Result<()> {
        const OPERATION: &str = "stop_scan";
        if self.state != SessionState::Scanning {
            trace!("stop_scan: no scan running");
            return Ok(());
        }
        let started = Instant::now();
        let exit = match self.worker.take() {
            Some(worker) => worker.stop(),
            None => Err(Error::OperationFail {
                description: "scanning without a worker".to_owned(),
            }),
        };
        let exit = match exit {
            Ok(exit) => exit,
            Err(e) => {
                error!("Scan worker lost: {}", e);
                self.drop_connection();
                return Err(e);
            }
        };
        self.channel = Some(exit.channel);
        if let Some(fault) = exit.fault {
            return self.check_io(OPERATION, started, Err(fault));
        }

        let settle = self.config.stop_settle;
        let channel = self.channel_mut(OPERATION, started)?;
        let result = channel.write(&Message::new(RPLIDAR_CMD_STOP)).and_then(|_| {
            sleep(settle);
            channel.flush_input()
        });
        self.check_io(OPERATION, started, result)?;
        self.state = SessionState::MotorRunning;
        info!("Scan stopped");
        Ok(())
    }

    /// Stops scanning and the motor, leaving the transport open for a later `connect`.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.stop_motor()?;
        self.state = SessionState::Disconnected;
        self.device_info = None;
        debug!("Disconnected");
        Ok(())
    }

    /// Shared handle on the published scans, usable from other threads.
    pub fn snapshot(&self) -> Arc<ScanSnapshot> {
        self.snapshot.clone()
    }

    /// The latest complete scan, waiting up to `timeout` for the first one.
    pub fn get_latest_scan(&self, timeout: Duration) -> Result<Arc<Scan>> {
        if let Some(fault) = self.worker_fault("get_latest_scan", Instant::now()) {
            return Err(fault);
        }
        if self.state != SessionState::Scanning {
            if let Some(scan) = self.snapshot.latest() {
                return Ok(scan);
            }
            return Err(Error::DeviceError {
                operation: "get_latest_scan",
                state: self.state,
            });
        }
        self.snapshot.get_latest_scan(timeout)
    }

    /// Waits for a scan newer than the one currently published.
    pub fn next_scan(&self, timeout: Duration) -> Result<Arc<Scan>> {
        if let Some(fault) = self.worker_fault("next_scan", Instant::now()) {
            return Err(fault);
        }
        self.require("next_scan", &[SessionState::Scanning])?;
        let after = self.snapshot.latest().map(|scan| scan.sequence).unwrap_or(0);
        self.snapshot.wait_newer(after, timeout)
    }

    /// Cartesian points of the latest scan.
    pub fn get_scan_points(&self, timeout: Duration, filter_invalid: bool) -> Result<Vec<Point2D>> {
        let scan = self.get_latest_scan(timeout)?;
        Ok(to_points(&scan, filter_invalid))
    }
}

impl RplidarSession<SerialTransport> {
    /// Opens the serial port and connects.
    ///
    /// With `baud_rate` 0 the known RPLIDAR rates are tried in turn until one answers.
    pub fn connect_serial(
        port: &PortConfig,
        config: SessionConfig,
    ) -> Result<RplidarSession<SerialTransport>> {
        config.validate()?;
        let mut last_error = None;
        for baud_rate in port.candidate_baud_rates() {
            let transport = serial::open(&port.path, baud_rate)?;
            let mut session = RplidarSession::new(transport, config.clone())?;
            match session.connect() {
                Ok(_) => return Ok(session),
                Err(e) => {
                    warn!("No answer on {} at {} baud: {}", port.path, baud_rate, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::OperationFail {
            description: "no baud rate to try".to_owned(),
        }))
    }
}

impl<T: Transport + 'static> Drop for RplidarSession<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Ok(exit) = worker.stop() {
                self.channel = Some(exit.channel);
            }
        }
        if self.state == SessionState::Disconnected {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            let _ = channel.write(&Message::new(RPLIDAR_CMD_STOP));
            sleep(self.config.stop_settle);
            match self.motor_control {
                Some(MotorControl::Pwm) => {
                    let _ = channel.write(&Message::with_data(RPLIDAR_CMD_SET_MOTOR_PWM, &[0, 0]));
                }
                Some(MotorControl::Dtr) => {
                    let _ = channel.transport_mut().set_dtr(true);
                }
                None => {}
            }
        }
        debug!("Session closed");
    }
}
