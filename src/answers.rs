/// Response type identifier for device information.
pub const RPLIDAR_ANS_TYPE_DEVINFO: u8 = 0x4;

/// Payload size of the device information answer:
/// model (1), firmware minor (1), firmware major (1), hardware (1), serial number (16).
pub const RPLIDAR_ANS_LENGTH_DEVINFO: usize = 20;

/// Response type identifier for device health status.
pub const RPLIDAR_ANS_TYPE_DEVHEALTH: u8 = 0x6;

/// Payload size of the health answer: status (1), error code (2, little-endian).
pub const RPLIDAR_ANS_LENGTH_DEVHEALTH: usize = 3;

// health status

/// Health status code indicating the LIDAR is operating correctly.
pub const RPLIDAR_HEALTH_STATUS_OK: u8 = 0;

/// Health status code indicating a non-critical warning. The LIDAR might still function.
pub const RPLIDAR_HEALTH_STATUS_WARNING: u8 = 1;

/// Health status code indicating a critical error. The LIDAR is likely non-operational.
pub const RPLIDAR_HEALTH_STATUS_ERROR: u8 = 2;

// Measurement answers

/// Response type identifier for legacy measurement data (one 5-byte record per sample).
pub const RPLIDAR_ANS_TYPE_MEASUREMENT: u8 = 0x81;

/// Size of one legacy measurement record.
pub const RPLIDAR_ANS_LENGTH_MEASUREMENT: usize = 5;

/// Start flag bit (S) in the first byte of a measurement record. Bit 1 carries its inverse.
pub const RPLIDAR_RESP_MEASUREMENT_SYNCBIT: u8 = 0x1;
/// Inverted start flag bit (!S) in the first byte of a measurement record.
pub const RPLIDAR_RESP_MEASUREMENT_SYNCBIT_INVERSE: u8 = 0x2;
/// Bit shift for extracting the quality value from the first byte of a measurement record.
pub const RPLIDAR_RESP_MEASUREMENT_QUALITY_SHIFT: u8 = 2;
/// Check bit (C) in the angle field of a measurement record, always 1.
pub const RPLIDAR_RESP_MEASUREMENT_CHECKBIT: u16 = 0x1;
/// Bit shift for extracting the Q6 angle from the angle field of a measurement record.
pub const RPLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT: u16 = 1;

/// Response type identifier for accessory board capability flags.
pub const RPLIDAR_ANS_TYPE_ACC_BOARD_FLAG: u8 = 0xFF;

/// Payload size of the accessory board flags answer.
pub const RPLIDAR_ANS_LENGTH_ACC_BOARD_FLAG: usize = 4;

/// Bitmask for checking motor control support in the accessory board flags answer.
pub const RPLIDAR_RESP_ACC_BOARD_FLAG_MOTOR_CTRL_SUPPORT_MASK: u32 = 0x1;
