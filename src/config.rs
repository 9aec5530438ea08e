use crate::base::{Error, Result};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default timeout duration for waiting for responses from the RPLIDAR.
pub const RPLIDAR_DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for the device info answer during the connect handshake.
pub const RPLIDAR_DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default upper bound on samples held by one in-progress scan.
pub const RPLIDAR_DEFAULT_CACHE_DEPTH: usize = 8192;

/// Default PWM value used when starting the motor with `start_motor_default()`.
pub const RPLIDAR_DEFAULT_MOTOR_PWM: u16 = 600;

/// Largest PWM duty cycle accepted by the accessory board.
pub const RPLIDAR_MAX_MOTOR_PWM: u16 = 1023;

/// Baud rates tried in order when `PortConfig::baud_rate` is 0.
pub const KNOWN_BAUD_RATES: [u32; 3] = [115_200, 256_000, 1_000_000];

/// Tunables for a device session.
///
/// Every duration is an upper bound: no operation blocks longer than its window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Number of GET_INFO attempts before `connect` gives up.
    pub handshake_attempts: u32,
    /// Time allowed for the device info answer on each attempt.
    pub handshake_timeout: Duration,
    /// Time allowed for the answer to any other command.
    pub command_timeout: Duration,
    /// Send RESET before each handshake attempt.
    pub reset_on_connect: bool,
    /// Wait after RESET while the core reboots and prints its banner.
    pub boot_delay: Duration,
    /// Wait after STOP before the next command. The device needs at least 1ms.
    pub stop_settle: Duration,
    /// Upper bound on one blocking stream read in the scan worker.
    pub stream_read_timeout: Duration,
    /// Samples below this quality are kept with their distance forced to 0.
    pub min_quality: u8,
    /// In-progress scans growing past this many samples are dropped.
    pub max_samples_per_scan: usize,
    /// PWM used by `start_motor_default`.
    pub motor_pwm: u16,
    /// Bytes requested from the transport per read.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            handshake_attempts: 3,
            handshake_timeout: RPLIDAR_DEFAULT_HANDSHAKE_TIMEOUT,
            command_timeout: RPLIDAR_DEFAULT_TIMEOUT,
            reset_on_connect: true,
            boot_delay: Duration::from_millis(500),
            stop_settle: Duration::from_millis(2),
            stream_read_timeout: Duration::from_millis(20),
            min_quality: 0,
            max_samples_per_scan: RPLIDAR_DEFAULT_CACHE_DEPTH,
            motor_pwm: RPLIDAR_DEFAULT_MOTOR_PWM,
            read_buffer_size: 1024,
        }
    }
}

impl SessionConfig {
    /// Checks the values a session cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |description: &str| {
            Err(Error::OperationFail {
                description: format!("invalid session config: {}", description),
            })
        };
        if self.handshake_attempts == 0 {
            return invalid("handshake_attempts must be at least 1");
        }
        if self.handshake_timeout.is_zero() || self.command_timeout.is_zero() {
            return invalid("command timeouts must be non-zero");
        }
        if self.stream_read_timeout.is_zero() {
            return invalid("stream_read_timeout must be non-zero");
        }
        if self.stop_settle < Duration::from_millis(1) {
            return invalid("stop_settle must be at least 1ms");
        }
        if self.max_samples_per_scan == 0 {
            return invalid("max_samples_per_scan must be at least 1");
        }
        if self.read_buffer_size == 0 {
            return invalid("read_buffer_size must be at least 1");
        }
        if self.motor_pwm > RPLIDAR_MAX_MOTOR_PWM {
            return invalid("motor_pwm exceeds 1023");
        }
        Ok(())
    }
}

/// Serial port to open for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Line speed. 0 probes `KNOWN_BAUD_RATES` in order.
    pub baud_rate: u32,
}

impl PortConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> PortConfig {
        PortConfig {
            path: path.into(),
            baud_rate,
        }
    }

    /// Baud rates to try, in order.
    pub fn candidate_baud_rates(&self) -> Vec<u32> {
        if self.baud_rate == 0 {
            KNOWN_BAUD_RATES.to_vec()
        } else {
            vec![self.baud_rate]
        }
    }
}
