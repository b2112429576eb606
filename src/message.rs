//! Message frame: packed header bitfields and the tagged-union payload.
//!
//! # Layout
//! Header is 7 bytes followed by up to 25 payload bytes:
//! - last: 1 byte (node the frame last passed through)
//! - sender: 1 byte (originating node)
//! - destination: 1 byte (final node)
//! - version_length: 1 byte (2 bit version, 1 bit signed, 5 bit length)
//! - command_ack_payload: 1 byte (3 bit command, 1 bit request-ack,
//!   1 bit is-ack, 3 bit payload type)
//! - type: 1 byte (meaning depends on command)
//! - sensor: 1 byte (child sensor id)
//!
//! The in-memory payload buffer keeps one extra zero byte after the payload
//! so string payloads stay terminated locally. It is never transmitted.
//! Numeric payloads are little-endian.

use std::fmt;

use crate::errors::FrameError;
use crate::types::{Command, PayloadType};
use crate::{HEADER_SIZE, MAX_MESSAGE_LENGTH, MAX_PAYLOAD};

/// Size of an encoded float payload: 4 value bytes plus the precision byte
pub const FLOAT_PAYLOAD_SIZE: usize = 5;

fn bit_mask(len: u8) -> u8 {
    ((1u16 << len) - 1) as u8
}

fn bf_get(y: u8, start: u8, len: u8) -> u8 {
    (y >> start) & bit_mask(len)
}

fn bf_set(y: u8, x: u8, start: u8, len: u8) -> u8 {
    (y & !(bit_mask(len) << start)) | ((x & bit_mask(len)) << start)
}

/// Fourth header byte: protocol version, signed flag and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionLength {
    /// Protocol version (2 bits)
    pub version: u8,
    /// Payload carries a signature
    pub signed: bool,
    /// Payload length in bytes (5 bits)
    pub length: u8,
}

impl VersionLength {
    /// Pack into the wire byte. Out-of-range values are masked to their width.
    pub fn pack(&self) -> u8 {
        let mut byte = 0;
        byte = bf_set(byte, self.version, 0, 2);
        byte = bf_set(byte, self.signed as u8, 2, 1);
        bf_set(byte, self.length, 3, 5)
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            version: bf_get(byte, 0, 2),
            signed: bf_get(byte, 2, 1) == 1,
            length: bf_get(byte, 3, 5),
        }
    }
}

/// Fifth header byte: command, ack flags and payload type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags {
    /// Raw command code (3 bits)
    pub command: u8,
    /// Receiver should answer with an ack
    pub request_ack: bool,
    /// This frame is the ack
    pub is_ack: bool,
    /// Raw payload type tag (3 bits)
    pub payload_type: u8,
}

impl CommandFlags {
    pub fn pack(&self) -> u8 {
        let mut byte = 0;
        byte = bf_set(byte, self.command, 0, 3);
        byte = bf_set(byte, self.request_ack as u8, 3, 1);
        byte = bf_set(byte, self.is_ack as u8, 4, 1);
        bf_set(byte, self.payload_type, 5, 3)
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            command: bf_get(byte, 0, 3),
            request_ack: bf_get(byte, 3, 1) == 1,
            is_ack: bf_get(byte, 4, 1) == 1,
            payload_type: bf_get(byte, 5, 3),
        }
    }
}

/// Presentation record: library version and a sensor class hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationRecord {
    pub library_version: u8,
    pub sensor_type: u8,
}

/// Typed view of a payload, selected by the payload type tag
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    String(&'a str),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Long32(i32),
    ULong32(u32),
    Custom(&'a [u8]),
    Float32 { value: f32, precision: u8 },
}

/// A single protocol frame
///
/// Setting a payload always updates the payload type tag and the length
/// field together, so the length is the exact serialized payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Node this frame last passed through
    pub last: u8,
    /// Originating node
    pub sender: u8,
    /// Final destination node
    pub destination: u8,
    version_length: u8,
    command_ack_payload: u8,
    /// Command-dependent type code
    pub message_type: u8,
    /// Child sensor id on the node
    pub sensor: u8,
    data: [u8; MAX_PAYLOAD + 1],
}

impl Default for Message {
    fn default() -> Self {
        Self {
            last: 0,
            sender: 0,
            destination: 0,
            version_length: 0,
            command_ack_payload: 0,
            message_type: 0,
            sensor: 0,
            data: [0; MAX_PAYLOAD + 1],
        }
    }
}

impl Message {
    /// Create a message for a child sensor and type, addressed to the gateway
    pub fn new(sensor: u8, message_type: u8) -> Self {
        Self {
            sensor,
            message_type,
            ..Self::default()
        }
    }

    // Header accessors

    pub fn version(&self) -> u8 {
        VersionLength::unpack(self.version_length).version
    }

    pub fn set_version(&mut self, version: u8) -> &mut Self {
        self.version_length = bf_set(self.version_length, version, 0, 2);
        self
    }

    pub fn is_signed(&self) -> bool {
        VersionLength::unpack(self.version_length).signed
    }

    pub fn set_signed(&mut self, signed: bool) -> &mut Self {
        self.version_length = bf_set(self.version_length, signed as u8, 2, 1);
        self
    }

    /// Declared payload length
    pub fn length(&self) -> u8 {
        VersionLength::unpack(self.version_length).length
    }

    fn set_length(&mut self, length: u8) {
        self.version_length = bf_set(self.version_length, length, 3, 5);
    }

    /// Command, or `None` for codes outside the defined set
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command_code()).ok()
    }

    pub fn command_code(&self) -> u8 {
        CommandFlags::unpack(self.command_ack_payload).command
    }

    pub fn set_command(&mut self, command: Command) -> &mut Self {
        self.command_ack_payload = bf_set(self.command_ack_payload, command.as_u8(), 0, 3);
        self
    }

    pub fn request_ack(&self) -> bool {
        CommandFlags::unpack(self.command_ack_payload).request_ack
    }

    pub fn set_request_ack(&mut self, request_ack: bool) -> &mut Self {
        self.command_ack_payload = bf_set(self.command_ack_payload, request_ack as u8, 3, 1);
        self
    }

    /// True if this frame is an acknowledgment
    pub fn is_ack(&self) -> bool {
        CommandFlags::unpack(self.command_ack_payload).is_ack
    }

    pub fn set_ack(&mut self, is_ack: bool) -> &mut Self {
        self.command_ack_payload = bf_set(self.command_ack_payload, is_ack as u8, 4, 1);
        self
    }

    pub fn payload_type(&self) -> PayloadType {
        let code = CommandFlags::unpack(self.command_ack_payload).payload_type;
        // All eight 3-bit codes are defined
        PayloadType::try_from(code).unwrap_or(PayloadType::Custom)
    }

    fn set_payload_type(&mut self, payload_type: PayloadType) {
        self.command_ack_payload =
            bf_set(self.command_ack_payload, payload_type.as_u8(), 5, 3);
    }

    pub fn set_type(&mut self, message_type: u8) -> &mut Self {
        self.message_type = message_type;
        self
    }

    pub fn set_sensor(&mut self, sensor: u8) -> &mut Self {
        self.sensor = sensor;
        self
    }

    pub fn set_destination(&mut self, destination: u8) -> &mut Self {
        self.destination = destination;
        self
    }

    // Payload setters

    fn set_payload(&mut self, payload_type: PayloadType, bytes: &[u8]) -> &mut Self {
        let len = bytes.len().min(MAX_PAYLOAD);
        self.data = [0; MAX_PAYLOAD + 1];
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.set_length(len as u8);
        self.set_payload_type(payload_type);
        self
    }

    /// Set a string payload, truncated to the payload capacity
    pub fn set_str(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(MAX_PAYLOAD);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.set_payload(PayloadType::String, &value.as_bytes()[..end])
    }

    pub fn set_byte(&mut self, value: u8) -> &mut Self {
        self.set_payload(PayloadType::Byte, &[value])
    }

    pub fn set_bool(&mut self, value: bool) -> &mut Self {
        self.set_byte(value as u8)
    }

    pub fn set_int(&mut self, value: i16) -> &mut Self {
        self.set_payload(PayloadType::Int16, &value.to_le_bytes())
    }

    pub fn set_uint(&mut self, value: u16) -> &mut Self {
        self.set_payload(PayloadType::UInt16, &value.to_le_bytes())
    }

    pub fn set_long(&mut self, value: i32) -> &mut Self {
        self.set_payload(PayloadType::Long32, &value.to_le_bytes())
    }

    pub fn set_ulong(&mut self, value: u32) -> &mut Self {
        self.set_payload(PayloadType::ULong32, &value.to_le_bytes())
    }

    /// Set a float payload rendered with `decimals` digits after the point
    pub fn set_float(&mut self, value: f32, decimals: u8) -> &mut Self {
        let mut bytes = [0u8; FLOAT_PAYLOAD_SIZE];
        bytes[..4].copy_from_slice(&value.to_le_bytes());
        bytes[4] = decimals;
        self.set_payload(PayloadType::Float32, &bytes)
    }

    /// Set raw bytes, truncated to the payload capacity
    pub fn set_custom(&mut self, bytes: &[u8]) -> &mut Self {
        self.set_payload(PayloadType::Custom, bytes)
    }

    pub fn set_presentation_record(&mut self, record: PresentationRecord) -> &mut Self {
        self.set_custom(&[record.library_version, record.sensor_type])
    }

    /// Set a custom payload from hex text as produced by [`Message::to_hex`]
    ///
    /// # Errors
    /// `InvalidHex` for malformed text, `LengthOverflow` if the decoded bytes
    /// do not fit the payload.
    pub fn set_hex(&mut self, text: &str) -> Result<&mut Self, FrameError> {
        let bytes = hex::decode(text.trim())?;
        if bytes.len() > MAX_PAYLOAD {
            return Err(FrameError::LengthOverflow(bytes.len().min(u8::MAX as usize) as u8));
        }
        Ok(self.set_custom(&bytes))
    }

    // Payload getters

    fn payload_len(&self) -> usize {
        (self.length() as usize).min(MAX_PAYLOAD)
    }

    /// Payload bytes within the declared length
    pub fn payload_bytes(&self) -> &[u8] {
        &self.data[..self.payload_len()]
    }

    fn fixed<const N: usize>(&self) -> Option<[u8; N]> {
        if self.payload_len() < N {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[..N]);
        Some(out)
    }

    fn parse_text<T: std::str::FromStr + Default>(&self) -> T {
        self.get_str().trim().parse().unwrap_or_default()
    }

    /// Typed view of the payload according to its tag
    pub fn payload(&self) -> Payload<'_> {
        match self.payload_type() {
            PayloadType::String => Payload::String(self.get_str()),
            PayloadType::Byte => Payload::Byte(self.fixed::<1>().map_or(0, |b| b[0])),
            PayloadType::Int16 => Payload::Int16(self.fixed().map_or(0, i16::from_le_bytes)),
            PayloadType::UInt16 => Payload::UInt16(self.fixed().map_or(0, u16::from_le_bytes)),
            PayloadType::Long32 => Payload::Long32(self.fixed().map_or(0, i32::from_le_bytes)),
            PayloadType::ULong32 => Payload::ULong32(self.fixed().map_or(0, u32::from_le_bytes)),
            PayloadType::Custom => Payload::Custom(self.payload_bytes()),
            PayloadType::Float32 => match self.fixed::<FLOAT_PAYLOAD_SIZE>() {
                Some(b) => Payload::Float32 {
                    value: f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                    precision: b[4],
                },
                None => Payload::Float32 { value: 0.0, precision: 0 },
            },
        }
    }

    /// String payload, or empty for other tags and non-UTF-8 bytes
    pub fn get_str(&self) -> &str {
        if self.payload_type() != PayloadType::String {
            return "";
        }
        std::str::from_utf8(self.payload_bytes()).unwrap_or("")
    }

    /// Custom payload bytes, or empty for other tags
    pub fn get_custom(&self) -> &[u8] {
        match self.payload() {
            Payload::Custom(bytes) => bytes,
            _ => &[],
        }
    }

    pub fn get_presentation_record(&self) -> Option<PresentationRecord> {
        match self.get_custom() {
            [library_version, sensor_type] => Some(PresentationRecord {
                library_version: *library_version,
                sensor_type: *sensor_type,
            }),
            _ => None,
        }
    }

    pub fn get_byte(&self) -> u8 {
        match self.payload() {
            Payload::Byte(v) => v,
            Payload::String(_) => self.parse_text(),
            _ => 0,
        }
    }

    pub fn get_bool(&self) -> bool {
        match self.payload() {
            Payload::Byte(v) => v != 0,
            Payload::Int16(v) => v != 0,
            Payload::UInt16(v) => v != 0,
            Payload::Long32(v) => v != 0,
            Payload::ULong32(v) => v != 0,
            Payload::String(_) => self.parse_text::<i64>() != 0,
            _ => false,
        }
    }

    pub fn get_int(&self) -> i16 {
        match self.payload() {
            Payload::Int16(v) => v,
            Payload::String(_) => self.parse_text(),
            _ => 0,
        }
    }

    pub fn get_uint(&self) -> u16 {
        match self.payload() {
            Payload::UInt16(v) => v,
            Payload::String(_) => self.parse_text(),
            _ => 0,
        }
    }

    pub fn get_long(&self) -> i32 {
        match self.payload() {
            Payload::Long32(v) => v,
            Payload::String(_) => self.parse_text(),
            _ => 0,
        }
    }

    pub fn get_ulong(&self) -> u32 {
        match self.payload() {
            Payload::ULong32(v) => v,
            Payload::String(_) => self.parse_text(),
            _ => 0,
        }
    }

    pub fn get_float(&self) -> f32 {
        match self.payload() {
            Payload::Float32 { value, .. } => value,
            Payload::String(_) => self.parse_text(),
            _ => 0.0,
        }
    }

    /// Number of decimals a float payload is rendered with
    pub fn float_precision(&self) -> u8 {
        match self.payload() {
            Payload::Float32 { precision, .. } => precision,
            _ => 0,
        }
    }

    /// Render the payload as text
    ///
    /// Strings are returned verbatim, integers in decimal, floats with exactly
    /// their precision in decimals and custom payloads as uppercase hex.
    pub fn to_value_string(&self) -> String {
        match self.payload() {
            Payload::String(s) => s.to_string(),
            Payload::Byte(v) => v.to_string(),
            Payload::Int16(v) => v.to_string(),
            Payload::UInt16(v) => v.to_string(),
            Payload::Long32(v) => v.to_string(),
            Payload::ULong32(v) => v.to_string(),
            Payload::Custom(bytes) => hex::encode_upper(bytes),
            Payload::Float32 { value, precision } => {
                format!("{:.*}", precision as usize, value)
            }
        }
    }

    /// Raw payload as `2 * length` uppercase hex characters, any payload type
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.payload_bytes())
    }

    // Wire encoding

    /// Bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Encode into a frame buffer, returning the number of bytes written
    pub fn encode(&self, out: &mut [u8; MAX_MESSAGE_LENGTH]) -> usize {
        out[0] = self.last;
        out[1] = self.sender;
        out[2] = self.destination;
        out[3] = self.version_length;
        out[4] = self.command_ack_payload;
        out[5] = self.message_type;
        out[6] = self.sensor;
        let len = self.payload_len();
        out[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&self.data[..len]);
        HEADER_SIZE + len
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = [0u8; MAX_MESSAGE_LENGTH];
        let len = self.encode(&mut buffer);
        buffer[..len].to_vec()
    }

    /// Decode a frame
    ///
    /// Accepts any buffer holding at least the header and the declared
    /// payload; trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let length = VersionLength::unpack(bytes[3]).length;
        if length as usize > MAX_PAYLOAD {
            return Err(FrameError::LengthOverflow(length));
        }
        let total = HEADER_SIZE + length as usize;
        if bytes.len() < total {
            return Err(FrameError::TooShort {
                expected: total,
                actual: bytes.len(),
            });
        }

        let mut data = [0u8; MAX_PAYLOAD + 1];
        data[..length as usize].copy_from_slice(&bytes[HEADER_SIZE..total]);

        Ok(Self {
            last: bytes[0],
            sender: bytes[1],
            destination: bytes[2],
            version_length: bytes[3],
            command_ack_payload: bytes[4],
            message_type: bytes[5],
            sensor: bytes[6],
            data,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} s={},c={},t={},pt={},l={}:{}",
            self.sender,
            self.destination,
            self.sensor,
            self.command_code(),
            self.message_type,
            self.payload_type().as_u8(),
            self.length(),
            self.to_value_string()
        )
    }
}
