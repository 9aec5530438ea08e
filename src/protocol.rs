use crate::answers::*;
use crate::base::{Answer, Error, Message, ProtocolDecoder, ProtocolEncoder, ResponseHeader, Result};
use crate::types::{DeviceInfo, Health, RangeSample};
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace, warn};
use std::cmp::min;

const RPLIDAR_CMD_SYNC_BYTE: u8 = 0xA5;
const RPLIDAR_CMDFLAG_HAS_PAYLOAD: u8 = 0x80;
const RPLIDAR_CMD_MAX_PAYLOAD: usize = 255;

const RPLIDAR_ANS_SYNC_BYTES: [u8; 2] = [0xA5, 0x5A];

const RPLIDAR_ANS_PKTFLAG_LOOP: u8 = 0x1;

const RPLIDAR_ANS_HEADER_SIZE_MASK: u32 = 0x3FFFFFFF;
const RPLIDAR_ANS_HEADER_SUBTYPE_SHIFT: u32 = 30;

/// The size of RPLIDAR protocol answer header (not including the two sync bytes)
const RPLIDAR_ANS_HEADER_SIZE: usize = 5;

/// Size of the full response descriptor, sync bytes included.
pub const RPLIDAR_ANS_DESCRIPTOR_SIZE: usize = RPLIDAR_ANS_SYNC_BYTES.len() + RPLIDAR_ANS_HEADER_SIZE;

/// Single answers larger than this are treated as a corrupted descriptor.
const RPLIDAR_ANS_MAX_SINGLE_SIZE: usize = 1024;

const ANGLE_Q6_SCALE: f32 = 64.0;
const DISTANCE_Q2_SCALE: f32 = 4.0;
const QUALITY_MAX: u8 = 0x3F;

/// XOR of every byte, the checksum used by command frames.
#[inline]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Builds a request frame.
///
/// A command without payload is `[0xA5, code]`. With a payload the frame is
/// `[0xA5, code | 0x80, len, payload.., checksum]`, the checksum covering every preceding byte.
pub fn encode_command(code: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > RPLIDAR_CMD_MAX_PAYLOAD {
        error!("Payload too large: {} bytes (max 255)", payload.len());
        return Err(Error::OperationFail {
            description: "payload too big".to_owned(),
        });
    }

    if payload.is_empty() {
        return Ok(vec![RPLIDAR_CMD_SYNC_BYTE, code]);
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(RPLIDAR_CMD_SYNC_BYTE);
    frame.push(code | RPLIDAR_CMDFLAG_HAS_PAYLOAD);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    trace!("Encoded command {:02X}: {:02X?}", code, frame);
    Ok(frame)
}

/// Parses a request frame back into a `Message`, validating sync, length and checksum.
///
/// The payload flag stays part of the returned command code.
pub fn decode_command(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < 2 {
        return Err(Error::protocol("command frame too short"));
    }
    if bytes[0] != RPLIDAR_CMD_SYNC_BYTE {
        return Err(Error::protocol(format!(
            "command sync mismatch: got {:02X}",
            bytes[0]
        )));
    }
    if bytes.len() == 2 {
        return Ok(Message::new(bytes[1]));
    }

    let payload_len = bytes[2] as usize;
    if bytes.len() != 4 + payload_len {
        return Err(Error::protocol(format!(
            "command frame length mismatch: payload {} in {} bytes",
            payload_len,
            bytes.len()
        )));
    }
    let expected = checksum(&bytes[..3 + payload_len]);
    let received = bytes[3 + payload_len];
    if expected != received {
        return Err(Error::protocol(format!(
            "command checksum mismatch: received {:02X}, calculated {:02X}",
            received, expected
        )));
    }
    Ok(Message::with_data(bytes[1], &bytes[3..3 + payload_len]))
}

fn unpack_header(header: &[u8]) -> ResponseHeader {
    let size_q30_subtype = LittleEndian::read_u32(&header[0..4]);
    let mode = (size_q30_subtype >> RPLIDAR_ANS_HEADER_SUBTYPE_SHIFT) as u8;
    ResponseHeader {
        is_single: mode & RPLIDAR_ANS_PKTFLAG_LOOP == 0,
        data_type: header[4],
        data_length: size_q30_subtype & RPLIDAR_ANS_HEADER_SIZE_MASK,
    }
}

/// Decodes a 7-byte response descriptor: `A5 5A`, a little-endian u32 holding the
/// size (low 30 bits) and the send mode (top 2 bits), then the answer type.
pub fn decode_response_header(bytes: &[u8]) -> Result<ResponseHeader> {
    if bytes.len() < RPLIDAR_ANS_DESCRIPTOR_SIZE {
        return Err(Error::protocol(format!(
            "response descriptor too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[..2] != RPLIDAR_ANS_SYNC_BYTES {
        return Err(Error::protocol(format!(
            "response sync mismatch: got {:02X} {:02X}",
            bytes[0], bytes[1]
        )));
    }
    Ok(unpack_header(&bytes[2..RPLIDAR_ANS_DESCRIPTOR_SIZE]))
}

/// Encodes a response descriptor, the device side of `decode_response_header`.
pub fn encode_response_header(header: &ResponseHeader) -> [u8; RPLIDAR_ANS_DESCRIPTOR_SIZE] {
    let mode = if header.is_single {
        0
    } else {
        RPLIDAR_ANS_PKTFLAG_LOOP as u32
    };
    let size_q30_subtype = (header.data_length & RPLIDAR_ANS_HEADER_SIZE_MASK)
        | (mode << RPLIDAR_ANS_HEADER_SUBTYPE_SHIFT);
    let mut bytes = [0u8; RPLIDAR_ANS_DESCRIPTOR_SIZE];
    bytes[..2].copy_from_slice(&RPLIDAR_ANS_SYNC_BYTES);
    LittleEndian::write_u32(&mut bytes[2..6], size_q30_subtype);
    bytes[6] = header.data_type;
    bytes
}

/// Decodes a 5-byte measurement record.
///
/// Byte 0 holds the start flag (bit 0), its inverse (bit 1) and the quality (bits 2..7).
/// Bytes 1-2 hold the check bit (bit 0, always 1) and the Q6 angle. Bytes 3-4 hold the
/// Q2 distance. A record failing either check is corrupt or misaligned.
pub fn decode_range_sample(bytes: &[u8]) -> Result<RangeSample> {
    if bytes.len() != RPLIDAR_ANS_LENGTH_MEASUREMENT {
        return Err(Error::protocol(format!(
            "measurement record must be 5 bytes, got {}",
            bytes.len()
        )));
    }

    let sync_quality = bytes[0];
    let start_flag = sync_quality & RPLIDAR_RESP_MEASUREMENT_SYNCBIT != 0;
    let start_flag_inverse = sync_quality & RPLIDAR_RESP_MEASUREMENT_SYNCBIT_INVERSE != 0;
    if start_flag == start_flag_inverse {
        return Err(Error::protocol(format!(
            "start flag bits not complementary: {:02X}",
            sync_quality
        )));
    }

    let angle_q6_checkbit = LittleEndian::read_u16(&bytes[1..3]);
    if angle_q6_checkbit & RPLIDAR_RESP_MEASUREMENT_CHECKBIT == 0 {
        return Err(Error::protocol(format!(
            "check bit not set: {:04X}",
            angle_q6_checkbit
        )));
    }

    let angle_q6 = angle_q6_checkbit >> RPLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT;
    let distance_q2 = LittleEndian::read_u16(&bytes[3..5]);

    Ok(RangeSample {
        angle: (angle_q6 as f32 / ANGLE_Q6_SCALE).rem_euclid(360.0),
        distance: distance_q2 as f32 / DISTANCE_Q2_SCALE,
        quality: sync_quality >> RPLIDAR_RESP_MEASUREMENT_QUALITY_SHIFT,
        start_flag,
    })
}

/// Encodes a measurement record, the device side of `decode_range_sample`.
///
/// Angle and distance are rounded to the wire resolution (1/64 degree, 1/4 mm).
pub fn encode_range_sample(sample: &RangeSample) -> [u8; RPLIDAR_ANS_LENGTH_MEASUREMENT] {
    let sync = if sample.start_flag {
        RPLIDAR_RESP_MEASUREMENT_SYNCBIT
    } else {
        RPLIDAR_RESP_MEASUREMENT_SYNCBIT_INVERSE
    };
    let quality = min(sample.quality, QUALITY_MAX);
    let angle_q6 = ((sample.angle.rem_euclid(360.0) * ANGLE_Q6_SCALE).round() as u16) & 0x7FFF;
    let distance_q2 = (sample.distance.max(0.0) * DISTANCE_Q2_SCALE)
        .round()
        .min(u16::MAX as f32) as u16;

    let mut bytes = [0u8; RPLIDAR_ANS_LENGTH_MEASUREMENT];
    bytes[0] = (quality << RPLIDAR_RESP_MEASUREMENT_QUALITY_SHIFT) | sync;
    LittleEndian::write_u16(
        &mut bytes[1..3],
        (angle_q6 << RPLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT) | RPLIDAR_RESP_MEASUREMENT_CHECKBIT,
    );
    LittleEndian::write_u16(&mut bytes[3..5], distance_q2);
    bytes
}

/// Decodes the 20-byte device information payload.
pub fn decode_device_info(data: &[u8]) -> Result<DeviceInfo> {
    if data.len() != RPLIDAR_ANS_LENGTH_DEVINFO {
        return Err(Error::protocol(format!(
            "invalid data size for device info: expected {}, got {}",
            RPLIDAR_ANS_LENGTH_DEVINFO,
            data.len()
        )));
    }
    let mut serial_number = [0u8; 16];
    serial_number.copy_from_slice(&data[4..20]);
    Ok(DeviceInfo {
        model: data[0],
        firmware_version: (data[2], data[1]),
        hardware_version: data[3],
        serial_number,
    })
}

/// Decodes the 3-byte health payload.
pub fn decode_health(data: &[u8]) -> Result<Health> {
    if data.len() != RPLIDAR_ANS_LENGTH_DEVHEALTH {
        return Err(Error::protocol(format!(
            "invalid data size for health: expected {}, got {}",
            RPLIDAR_ANS_LENGTH_DEVHEALTH,
            data.len()
        )));
    }
    let error_code = LittleEndian::read_u16(&data[1..3]);
    Ok(match data[0] {
        RPLIDAR_HEALTH_STATUS_OK => Health::Healthy,
        RPLIDAR_HEALTH_STATUS_WARNING => Health::Warning(error_code),
        RPLIDAR_HEALTH_STATUS_ERROR => Health::Error(error_code),
        status => {
            warn!("Unknown health status code: {}", status);
            Health::Healthy
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
enum DecodeStatus {
    WaitSyncByte(usize),
    WaitAnsHeader,
    ReceiveResponse,
}

/// Host side of the RPLIDAR serial protocol.
///
/// Encodes commands and runs the answer decoder state machine. Garbage before an
/// answer (boot banner, leftovers of a stopped scan) is skipped byte by byte
/// until the two sync bytes line up.
#[derive(Debug, Clone, PartialEq)]
pub struct HostProtocol {
    status: DecodeStatus,
    ans_header: Vec<u8>,
    header: Option<ResponseHeader>,
    data: Vec<u8>,
}

impl HostProtocol {
    /// Creates a new `HostProtocol` instance in its initial state.
    pub fn new() -> HostProtocol {
        HostProtocol {
            status: DecodeStatus::WaitSyncByte(0),
            ans_header: Vec::with_capacity(RPLIDAR_ANS_HEADER_SIZE),
            header: None,
            data: Vec::new(),
        }
    }

    fn start_wait_sync_bytes(&mut self, sync_byte_index: usize) {
        self.status = DecodeStatus::WaitSyncByte(sync_byte_index);
        self.ans_header.clear();
        self.header = None;
    }

    fn decode_sync_byte(&mut self, index: usize, byte: u8) {
        if byte == RPLIDAR_ANS_SYNC_BYTES[index] {
            if index == RPLIDAR_ANS_SYNC_BYTES.len() - 1 {
                trace!("All sync bytes received, moving to WaitAnsHeader");
                self.status = DecodeStatus::WaitAnsHeader;
                self.ans_header.clear();
            } else {
                self.start_wait_sync_bytes(index + 1);
            }
        } else if byte == RPLIDAR_ANS_SYNC_BYTES[0] {
            // A5 A5 5A: the second A5 may start the real descriptor
            self.start_wait_sync_bytes(1);
        } else {
            self.start_wait_sync_bytes(0);
        }
    }

    fn decode_ans_header(&mut self, buf: &[u8]) -> Result<(usize, Option<Answer>)> {
        let bytes_to_read = RPLIDAR_ANS_HEADER_SIZE - self.ans_header.len();
        let bytes_actual_read = min(bytes_to_read, buf.len());
        self.ans_header.extend_from_slice(&buf[..bytes_actual_read]);

        if self.ans_header.len() < RPLIDAR_ANS_HEADER_SIZE {
            return Ok((bytes_actual_read, None));
        }

        let header = unpack_header(&self.ans_header);
        trace!("Decoded answer header: {:?}", header);

        if !header.is_single {
            if header.data_length == 0 {
                error!("Received loop answer with zero record size");
                return Err(Error::protocol("received loop answer with no response size"));
            }
            self.reset_decoder();
            return Ok((
                bytes_actual_read,
                Some(Answer {
                    header,
                    data: Vec::new(),
                }),
            ));
        }

        let response_size = header.data_length as usize;
        if response_size == 0 {
            self.reset_decoder();
            return Ok((
                bytes_actual_read,
                Some(Answer {
                    header,
                    data: Vec::new(),
                }),
            ));
        }
        if response_size > RPLIDAR_ANS_MAX_SINGLE_SIZE {
            return Err(Error::protocol(format!(
                "answer size {} exceeds {}",
                response_size, RPLIDAR_ANS_MAX_SINGLE_SIZE
            )));
        }

        self.header = Some(header);
        self.data.clear();
        self.data.reserve(response_size);
        self.status = DecodeStatus::ReceiveResponse;
        Ok((bytes_actual_read, None))
    }

    fn decode_response(&mut self, buf: &[u8]) -> Result<(usize, Option<Answer>)> {
        let header = match self.header {
            Some(header) => header,
            None => return Err(Error::protocol("response state without header")),
        };
        let bytes_to_read = header.data_length as usize - self.data.len();
        let bytes_actual_read = min(bytes_to_read, buf.len());
        self.data.extend_from_slice(&buf[..bytes_actual_read]);

        if self.data.len() == header.data_length as usize {
            let data = std::mem::take(&mut self.data);
            self.reset_decoder();
            Ok((bytes_actual_read, Some(Answer { header, data })))
        } else {
            Ok((bytes_actual_read, None))
        }
    }
}

impl Default for HostProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for HostProtocol {
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Answer>)> {
        let mut i = 0;
        while i < buf.len() {
            match self.status {
                DecodeStatus::WaitSyncByte(index) => {
                    self.decode_sync_byte(index, buf[i]);
                    i += 1;
                }
                DecodeStatus::WaitAnsHeader => {
                    let (consumed, answer) = self.decode_ans_header(&buf[i..]).map_err(|e| {
                        self.reset_decoder();
                        e
                    })?;
                    i += consumed;
                    if answer.is_some() {
                        return Ok((i, answer));
                    }
                }
                DecodeStatus::ReceiveResponse => {
                    let (consumed, answer) = self.decode_response(&buf[i..]).map_err(|e| {
                        self.reset_decoder();
                        e
                    })?;
                    i += consumed;
                    if answer.is_some() {
                        return Ok((i, answer));
                    }
                }
            }
        }
        Ok((i, None))
    }

    fn reset_decoder(&mut self) {
        self.start_wait_sync_bytes(0);
    }
}

impl ProtocolEncoder for HostProtocol {
    fn encode(&mut self, msg: &Message) -> Result<Vec<u8>> {
        encode_command(msg.cmd, &msg.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn protocol_encode() {
        assert_eq!(encode_command(0x25, &[]).unwrap(), [0xA5, 0x25]);
        assert_eq!(
            encode_command(0x82, &[0; 5]).unwrap(),
            [0xA5, 0x82, 0x05, 0, 0, 0, 0, 0, 0x22]
        );
        // SET_MOTOR_PWM 660
        assert_eq!(
            encode_command(0xF0, &[0x94, 0x02]).unwrap(),
            [0xA5, 0xF0, 0x02, 0x94, 0x02, 0xC1]
        );
        assert!(encode_command(0xF0, &[0; 256]).is_err());
    }

    #[test]
    fn decode_command_rejects_bad_checksum() {
        let mut frame = encode_command(0xF0, &[0x58, 0x02]).unwrap();
        *frame.last_mut().unwrap() ^= 0x01;
        assert!(matches!(
            decode_command(&frame),
            Err(Error::ProtocolError { .. })
        ));
    }

    #[test]
    fn decodes_scan_descriptor() {
        let header = decode_response_header(&[0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81]).unwrap();
        assert_eq!(
            header,
            ResponseHeader {
                is_single: false,
                data_type: 0x81,
                data_length: 5,
            }
        );

        let header = decode_response_header(&[0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04]).unwrap();
        assert!(header.is_single);
        assert_eq!(header.data_type, RPLIDAR_ANS_TYPE_DEVINFO);
        assert_eq!(header.data_length, 20);
    }

    #[test]
    fn descriptor_sync_mismatch_is_protocol_error() {
        assert!(matches!(
            decode_response_header(&[0xA5, 0x5B, 0x05, 0x00, 0x00, 0x40, 0x81]),
            Err(Error::ProtocolError { .. })
        ));
        assert!(decode_response_header(&[0xA5, 0x5A, 0x05]).is_err());
    }

    #[test]
    fn decodes_measurement_record() {
        // quality 47, start flag, angle 90 deg (q6 5760), distance 1000 mm (q2 4000)
        let sample = decode_range_sample(&[0xBD, 0x01, 0x2D, 0xA0, 0x0F]).unwrap();
        assert!(sample.start_flag);
        assert_eq!(sample.quality, 47);
        assert_relative_eq!(sample.angle, 90.0);
        assert_relative_eq!(sample.distance, 1000.0);
        assert_eq!(encode_range_sample(&sample), [0xBD, 0x01, 0x2D, 0xA0, 0x0F]);
    }

    #[test]
    fn measurement_record_validity_bits() {
        // S and !S both set
        assert!(decode_range_sample(&[0xBF, 0x01, 0x2D, 0xA0, 0x0F]).is_err());
        // S and !S both cleared
        assert!(decode_range_sample(&[0xBC, 0x01, 0x2D, 0xA0, 0x0F]).is_err());
        // check bit cleared
        assert!(decode_range_sample(&[0xBD, 0x00, 0x2D, 0xA0, 0x0F]).is_err());
        // wrong size
        assert!(decode_range_sample(&[0xBD, 0x01, 0x2D, 0xA0]).is_err());
    }

    #[test]
    fn decodes_device_info_and_health() {
        let mut payload = vec![0x18, 0x1D, 0x01, 0x07];
        payload.extend(1..=16u8);
        let info = decode_device_info(&payload).unwrap();
        assert_eq!(info.model, 0x18);
        assert_eq!(info.firmware_version, (1, 29));
        assert_eq!(info.hardware_version, 7);
        assert_eq!(info.serial_number[0], 1);
        assert_eq!(info.serial_number[15], 16);
        assert!(decode_device_info(&payload[..19]).is_err());

        assert_eq!(decode_health(&[0, 0, 0]).unwrap(), Health::Healthy);
        assert_eq!(
            decode_health(&[2, 0x34, 0x12]).unwrap(),
            Health::Error(0x1234)
        );
    }

    #[test]
    fn decoder_skips_garbage_and_splits_answers() {
        let mut protocol = HostProtocol::new();
        let mut bytes = b"RP LIDAR System.\r\n".to_vec();
        bytes.extend_from_slice(&[0xA5, 0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x02, 0x00]);
        bytes.push(0x99);

        let (consumed, answer) = protocol.decode(&bytes).unwrap();
        let answer = answer.unwrap();
        assert_eq!(consumed, bytes.len() - 1);
        assert_eq!(answer.header.data_type, RPLIDAR_ANS_TYPE_DEVHEALTH);
        assert_eq!(answer.data, vec![0x01, 0x02, 0x00]);
    }

    #[test]
    fn decoder_handles_split_input() {
        let mut protocol = HostProtocol::new();
        let bytes = [0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00];
        let (consumed, answer) = protocol.decode(&bytes[..4]).unwrap();
        assert_eq!((consumed, answer), (4, None));
        let (consumed, answer) = protocol.decode(&bytes[4..8]).unwrap();
        assert_eq!((consumed, answer), (4, None));
        let (consumed, answer) = protocol.decode(&bytes[8..]).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(answer.unwrap().data, vec![0, 0, 0]);
    }

    #[test]
    fn continuous_answer_leaves_records_in_stream() {
        let mut protocol = HostProtocol::new();
        let bytes = [0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81, 0xBD, 0x01, 0x2D, 0xA0, 0x0F];
        let (consumed, answer) = protocol.decode(&bytes).unwrap();
        assert_eq!(consumed, RPLIDAR_ANS_DESCRIPTOR_SIZE);
        let answer = answer.unwrap();
        assert!(!answer.header.is_single);
        assert!(answer.data.is_empty());
    }

    #[test]
    fn oversized_single_answer_is_rejected() {
        let mut protocol = HostProtocol::new();
        let bytes = [0xA5, 0x5A, 0xFF, 0xFF, 0x00, 0x00, 0x04];
        assert!(protocol.decode(&bytes).is_err());
        // decoder recovers for the next answer
        let bytes = [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x01];
        let (_, answer) = protocol.decode(&bytes).unwrap();
        assert_eq!(answer.unwrap().header.data_type, 0x01);
    }

    proptest! {
        #[test]
        fn response_header_round_trips(is_single: bool, data_type: u8, data_length in 0u32..0x4000_0000) {
            let header = ResponseHeader { is_single, data_type, data_length };
            prop_assert_eq!(decode_response_header(&encode_response_header(&header)).unwrap(), header);
        }

        #[test]
        fn command_frames_round_trip(code in 0x80u8..=0xFF, payload in proptest::collection::vec(any::<u8>(), 0..=255)) {
            let frame = encode_command(code, &payload).unwrap();
            let msg = decode_command(&frame).unwrap();
            prop_assert_eq!(msg.cmd, code);
            prop_assert_eq!(msg.data, payload);
        }

        #[test]
        fn encoded_samples_always_decode(angle in 0.0f32..360.0, distance in 0.0f32..16000.0, quality in 0u8..64, start_flag: bool) {
            let bytes = encode_range_sample(&RangeSample { angle, distance, quality, start_flag });
            let sample = decode_range_sample(&bytes).unwrap();
            prop_assert_eq!(sample.start_flag, start_flag);
            prop_assert_eq!(sample.quality, quality);
            prop_assert!((sample.distance - distance).abs() <= 0.125);
        }
    }
}
