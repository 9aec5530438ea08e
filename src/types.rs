use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single polar measurement decoded from one 5-byte record.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RangeSample {
    /// Angle in degrees, in `[0, 360)`, clockwise from the sensor's forward axis.
    pub angle: f32,
    /// Distance in millimeters. `0` marks an invalid measurement.
    pub distance: f32,
    /// Confidence reported by the sensor (6-bit value, 0 to 63).
    pub quality: u8,
    /// `true` for the first sample of a new rotation.
    pub start_flag: bool,
}

impl RangeSample {
    /// Returns `true` if the measurement carries a distance.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.distance > 0.0
    }

    /// Angle in radians.
    #[inline]
    pub fn angle_radians(&self) -> f32 {
        self.angle.to_radians()
    }
}

/// One complete rotation, start-flag sample first.
///
/// Scans are immutable once published; consumers share them through `Arc<Scan>`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Scan {
    /// Publication counter, strictly increasing within one snapshot.
    pub sequence: u64,
    /// Samples in arrival order.
    pub samples: Vec<RangeSample>,
}

impl Scan {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples with a non-zero distance.
    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_valid()).count()
    }
}

/// A Cartesian point in millimeters, the sensor at the origin.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

/// Identity of the connected device, fetched once per session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Model ID of the RPLIDAR.
    pub model: u8,
    /// Firmware version as `(major, minor)`.
    pub firmware_version: (u8, u8),
    /// Hardware revision.
    pub hardware_version: u8,
    /// 16-byte unique serial number.
    pub serial_number: [u8; 16],
}

impl DeviceInfo {
    /// Serial number as the 32-digit uppercase hex string printed by Slamtec tools.
    pub fn serial_number_hex(&self) -> String {
        self.serial_number
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RPLIDAR model {} S/N {} firmware {}.{:02} hardware {}",
            self.model,
            self.serial_number_hex(),
            self.firmware_version.0,
            self.firmware_version.1,
            self.hardware_version
        )
    }
}

/// Represents the health status reported by the RPLIDAR device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Health {
    /// The device reports it is operating correctly.
    Healthy,
    /// The device reports a warning condition, but may still be operational. Contains the warning code.
    Warning(u16),
    /// The device reports a fatal error and is likely not operational. Contains the error code.
    Error(u16),
}

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SessionState {
    Disconnected,
    Connected,
    MotorRunning,
    Scanning,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::MotorRunning => "motor running",
            SessionState::Scanning => "scanning",
        };
        f.write_str(name)
    }
}

/// How the motor is driven, decided once per session from the accessory board flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorControl {
    /// Accessory board with PWM speed control (A2/A3).
    Pwm,
    /// Motor enable wired to the DTR line (A1 and boards without motor control).
    Dtr,
}

/// Options for starting a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanOptions {
    /// If `true`, the sensor sends samples even before the motor has reached a stable speed.
    pub force_scan: bool,
}

impl ScanOptions {
    /// Creates `ScanOptions` that enable forced scanning.
    pub fn force_scan() -> ScanOptions {
        ScanOptions { force_scan: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_formats_serial_as_hex() {
        let info = DeviceInfo {
            model: 0x18,
            firmware_version: (1, 29),
            hardware_version: 7,
            serial_number: [
                0xA1, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
                0x0E, 0x0F, 0xFF,
            ],
        };
        assert_eq!(info.serial_number_hex(), "A102030405060708090A0B0C0D0E0FFF");
        assert_eq!(
            info.to_string(),
            "RPLIDAR model 24 S/N A102030405060708090A0B0C0D0E0FFF firmware 1.29 hardware 7"
        );
    }

    #[test]
    fn scan_counts_valid_samples() {
        let sample = |distance| RangeSample {
            angle: 0.0,
            distance,
            quality: 10,
            start_flag: false,
        };
        let scan = Scan {
            sequence: 1,
            samples: vec![sample(0.0), sample(12.5), sample(0.0)],
        };
        assert_eq!(scan.len(), 3);
        assert_eq!(scan.valid_count(), 1);
    }
}
