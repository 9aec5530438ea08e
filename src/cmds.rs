// Commands without payload and response

/// Command code to stop the measurement process. The device needs at least 1ms before the next command.
pub const RPLIDAR_CMD_STOP: u8 = 0x25;

/// Command code to start a scan in legacy (standard) mode.
pub const RPLIDAR_CMD_SCAN: u8 = 0x20;

/// Command code to start a forced scan: samples are sent even if the motor is not at a stable speed.
pub const RPLIDAR_CMD_FORCE_SCAN: u8 = 0x21;

/// Command code to reset the LIDAR core. The device reboots and prints a text banner.
pub const RPLIDAR_CMD_RESET: u8 = 0x40;

// Commands without payload but have response

/// Command code to request device information (model, firmware, hardware, serial number).
pub const RPLIDAR_CMD_GET_DEVICE_INFO: u8 = 0x50;

/// Command code to request the device's health status.
pub const RPLIDAR_CMD_GET_DEVICE_HEALTH: u8 = 0x52;

// Commands with payload

/// Command code to set the motor PWM duty cycle via an accessory board (A2/A3 models).
/// Requires a 2-byte payload containing the PWM value (u16 little-endian).
pub const RPLIDAR_CMD_SET_MOTOR_PWM: u8 = 0xF0;

/// Command code to get the capability flags of an attached accessory board.
/// Requires a 4-byte payload (all zeros).
pub const RPLIDAR_CMD_GET_ACC_BOARD_FLAG: u8 = 0xFF;
