//! Core types for the CAN packet decoder library
//!
//! This module defines the values that flow through the two decoding stages:
//! raw frames read from a sniffer trace, messages reassembled from those
//! frames, and packets decoded from messages with a field schema.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Malformed line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("Schema mismatch: expected identifier 0x{expected:X}, found 0x{found:X}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("Payload length {length} outside schema bounds [{min}, {}]", display_bound(.max))]
    LengthOutOfRange { length: usize, min: usize, max: usize },

    #[error("Truncated field '{name}' at offset {offset}: needs {needed} bytes, {available} available")]
    TruncatedField {
        name: String,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Failed to load schema: {0}")]
    SchemaLoad(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn display_bound(max: &usize) -> String {
    if *max == 0 {
        "unbounded".to_string()
    } else {
        max.to_string()
    }
}

impl DecoderError {
    /// True for errors that only affect a single line or message
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DecoderError::SchemaLoad(_) | DecoderError::IoError(_))
    }
}

/// Standard (11-bit) or extended (29-bit) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameKind {
    Standard,
    Extended,
}

/// Bus identifier of a frame (the COB id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub id: u32,
    pub kind: FrameKind,
}

impl FrameId {
    /// Largest identifier that fits an 11-bit standard frame
    pub const MAX_STANDARD: u32 = 0x7FF;
    /// Largest identifier that fits a 29-bit extended frame
    pub const MAX_EXTENDED: u32 = 0x1FFF_FFFF;

    pub fn standard(id: u32) -> Self {
        Self {
            id,
            kind: FrameKind::Standard,
        }
    }

    pub fn extended(id: u32) -> Self {
        Self {
            id,
            kind: FrameKind::Extended,
        }
    }

    /// Parse a hex identifier, promoting it to extended when it does not fit 11 bits
    pub fn parse_hex(text: &str, extended: bool) -> Option<Self> {
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() || digits.len() > 8 {
            return None;
        }
        let id = u32::from_str_radix(digits, 16).ok()?;
        if id > Self::MAX_EXTENDED {
            return None;
        }
        if extended || id > Self::MAX_STANDARD || digits.len() == 8 {
            Some(Self::extended(id))
        } else {
            Some(Self::standard(id))
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FrameKind::Standard => write!(f, "{:03X}", self.id),
            FrameKind::Extended => write!(f, "{:08X}", self.id),
        }
    }
}

impl Serialize for FrameId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Timestamp as written by the sniffer
///
/// Recognised layouts are parsed so they can be compared and re-rendered;
/// anything else is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timestamp {
    /// `HH:MM:SS.mmm`
    TimeOfDay(NaiveTime),
    /// `YYYY-MM-DD HH:MM:SS.mmm`
    DateTime(NaiveDateTime),
    /// Unrecognised text
    Raw(String),
}

const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S%.3f";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

impl Timestamp {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(time) = NaiveTime::parse_from_str(text, TIME_OF_DAY_FORMAT) {
            Timestamp::TimeOfDay(time)
        } else if let Ok(datetime) = NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT) {
            Timestamp::DateTime(datetime)
        } else {
            Timestamp::Raw(text.to_string())
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::TimeOfDay(time) => write!(f, "{}", time.format(TIME_OF_DAY_FORMAT)),
            Timestamp::DateTime(datetime) => write!(f, "{}", datetime.format(DATE_TIME_FORMAT)),
            Timestamp::Raw(text) => f.write_str(text),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Raw CAN frame from a trace file
///
/// One per trace row, before any segment interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// 1-based line number in the trace
    pub line: usize,
    /// Timestamp column as written by the sniffer
    pub timestamp: Timestamp,
    /// Bus identifier
    pub id: FrameId,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Maximum payload of a classic CAN frame
    pub const MAX_DATA_LEN: usize = 8;

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Quality flags attached to a reassembled message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageFlags {
    /// Buffer was force-closed before its final segment arrived
    pub truncated: bool,
    /// At least one continuation segment arrived out of sequence
    pub sequence_gap: bool,
}

impl MessageFlags {
    pub fn is_clean(&self) -> bool {
        !self.truncated && !self.sequence_gap
    }
}

impl fmt::Display for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.truncated {
            names.push("TRUNCATED");
        }
        if self.sequence_gap {
            names.push("SEQ_GAP");
        }
        f.write_str(&names.join(","))
    }
}

/// A complete logical message rebuilt from one or more frames
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledMessage {
    /// Timestamp of the first frame in the sequence
    pub timestamp: Timestamp,
    /// Identifier shared by all contributing frames
    pub id: FrameId,
    /// Message number carried by the start segment, if the layout has one
    pub message_number: Option<u8>,
    /// Reassembled payload bytes
    pub payload: Vec<u8>,
    /// Total length announced by the start segment
    pub expected_length: Option<usize>,
    pub flags: MessageFlags,
}

impl ReassembledMessage {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload_hex(&self) -> String {
        to_hex(&self.payload)
    }
}

/// One decoded schema field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedField {
    /// A FIXED or DYNAMIC field
    Value {
        name: String,
        /// Byte offset of the value within the payload (after any prefix)
        offset: usize,
        #[serde(serialize_with = "serialize_hex")]
        raw: Vec<u8>,
        /// Unsigned interpretation; `None` when wider than 8 bytes
        value: Option<u64>,
    },
    /// A BLOCK field with its repeated groups
    Block {
        name: String,
        /// Byte offset of the count prefix
        offset: usize,
        count: u64,
        instances: Vec<BlockInstance>,
    },
}

impl DecodedField {
    pub fn name(&self) -> &str {
        match self {
            DecodedField::Value { name, .. } => name,
            DecodedField::Block { name, .. } => name,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            DecodedField::Value { offset, .. } => *offset,
            DecodedField::Block { offset, .. } => *offset,
        }
    }

    /// Unsigned value of a FIXED/DYNAMIC field
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DecodedField::Value { value, .. } => *value,
            DecodedField::Block { .. } => None,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            DecodedField::Value { raw, .. } => Some(raw),
            DecodedField::Block { .. } => None,
        }
    }

    pub fn instances(&self) -> Option<&[BlockInstance]> {
        match self {
            DecodedField::Value { .. } => None,
            DecodedField::Block { instances, .. } => Some(instances),
        }
    }
}

/// One repetition of a BLOCK's subfields, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BlockInstance {
    pub fields: Vec<DecodedField>,
}

impl BlockInstance {
    pub fn get(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Non-fatal findings of a successful decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecodeWarning {
    /// Bytes left over after the last top-level field
    TrailingBytes { offset: usize, count: usize },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::TrailingBytes { offset, count } => {
                write!(f, "{} trailing byte(s) from offset {}", count, offset)
            }
        }
    }
}

/// A message decoded with a packet schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPacket {
    pub timestamp: Timestamp,
    pub id: FrameId,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
    pub fields: Vec<DecodedField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DecodeWarning>,
    /// Source message was flagged truncated by the reassembler
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl DecodedPacket {
    /// Look up a top-level field by name
    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name() == name)
    }
}

/// Uppercase hex without separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Parse hex text, ignoring embedded spaces
pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

fn serialize_hex<T, S>(bytes: T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&to_hex(bytes.as_ref()))
}
