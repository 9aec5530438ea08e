/// A command sent from the host to the RPLIDAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The command code.
    pub cmd: u8,

    /// Optional payload data carried by the command.
    pub data: Vec<u8>,
}

impl Message {
    /// Creates a new command without payload.
    pub fn new(cmd: u8) -> Message {
        Message::with_data(cmd, &[])
    }

    /// Creates a new command with payload data.
    #[inline]
    pub fn with_data(cmd: u8, data: &[u8]) -> Message {
        Message {
            cmd,
            data: data.to_vec(),
        }
    }
}

/// The 7-byte response descriptor that precedes every answer of the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// `true` for a single answer, `false` when the device keeps streaming records.
    pub is_single: bool,
    /// The answer type code (e.g. `0x04` for device info, `0x81` for measurements).
    pub data_type: u8,
    /// Payload size of one answer (or of one record in continuous mode).
    pub data_length: u32,
}

/// A decoded answer from the device.
///
/// For continuous answers `data` stays empty: the records that follow the
/// descriptor are consumed straight from the stream by the scan worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub header: ResponseHeader,
    pub data: Vec<u8>,
}
