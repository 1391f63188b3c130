//! Frame layouts
//!
//! A layout decides what the leading bytes of a frame mean: whether the frame
//! starts, continues or ends a segmented message, which sequence number it
//! carries and which bytes are message data.

use crate::types::{DecoderError, Result};

/// Role of one frame within a segmented message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// First frame of a multi-frame message
    Start {
        sequence: u8,
        message_number: Option<u8>,
        total_length: Option<usize>,
        data: &'a [u8],
    },
    /// Middle frame
    Continuation { sequence: u8, data: &'a [u8] },
    /// Last frame
    End { sequence: u8, data: &'a [u8] },
    /// Complete message in a single frame
    Single {
        message_number: Option<u8>,
        data: &'a [u8],
    },
}

/// Frame classification strategy
pub trait FrameLayout {
    /// Split a frame payload into its segment role and data bytes
    fn classify<'a>(&self, payload: &'a [u8]) -> Result<Segment<'a>>;

    /// Sequence numbers wrap at this value
    fn sequence_modulus(&self) -> u8;

    /// Sequence number expected after `sequence`
    fn next_sequence(&self, sequence: u8) -> u8 {
        let modulus = self.sequence_modulus().max(1) as u16;
        ((sequence as u16 + 1) % modulus) as u8
    }
}

/// Segmented layout of the observed sniffer traces
///
/// ```text
/// byte 0   CS(3) SN(2) VB(3)
///          CS 000 first   byte 1 = message number, bytes 2..3 = total length (BE), data 4..
///          CS 001 middle  data 1..
///          CS 010 end     data 1..1+VB
///          CS 011 single  byte 1 = message number, data 2..2+VB
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentedLayout;

impl SegmentedLayout {
    const CS_FIRST: u8 = 0b000;
    const CS_MIDDLE: u8 = 0b001;
    const CS_END: u8 = 0b010;
    const CS_SINGLE: u8 = 0b011;

    const FIRST_HEADER_LEN: usize = 4;
    const SINGLE_HEADER_LEN: usize = 2;

    fn counted_data<'a>(payload: &'a [u8], from: usize, count: usize) -> &'a [u8] {
        let end = (from + count).min(payload.len());
        if end < from + count {
            log::warn!(
                "Segment announces {} data bytes but only {} present",
                count,
                payload.len().saturating_sub(from)
            );
        }
        &payload[from.min(end)..end]
    }
}

impl FrameLayout for SegmentedLayout {
    fn classify<'a>(&self, payload: &'a [u8]) -> Result<Segment<'a>> {
        let control = *payload
            .first()
            .ok_or_else(|| DecoderError::InvalidData("empty frame payload".to_string()))?;

        let command = control >> 5;
        let sequence = (control >> 3) & 0b11;
        let byte_count = (control & 0b111) as usize;

        match command {
            Self::CS_FIRST => {
                if payload.len() < Self::FIRST_HEADER_LEN {
                    return Err(DecoderError::InvalidData(format!(
                        "first segment too short: {} < {} bytes",
                        payload.len(),
                        Self::FIRST_HEADER_LEN
                    )));
                }
                let total_length = u16::from_be_bytes([payload[2], payload[3]]) as usize;
                Ok(Segment::Start {
                    sequence,
                    message_number: Some(payload[1]),
                    total_length: Some(total_length),
                    data: &payload[Self::FIRST_HEADER_LEN..],
                })
            }
            Self::CS_MIDDLE => Ok(Segment::Continuation {
                sequence,
                data: &payload[1..],
            }),
            Self::CS_END => Ok(Segment::End {
                sequence,
                data: Self::counted_data(payload, 1, byte_count),
            }),
            Self::CS_SINGLE => {
                if payload.len() < Self::SINGLE_HEADER_LEN {
                    return Err(DecoderError::InvalidData(format!(
                        "single segment too short: {} < {} bytes",
                        payload.len(),
                        Self::SINGLE_HEADER_LEN
                    )));
                }
                Ok(Segment::Single {
                    message_number: Some(payload[1]),
                    data: Self::counted_data(payload, Self::SINGLE_HEADER_LEN, byte_count),
                })
            }
            other => Err(DecoderError::InvalidData(format!(
                "invalid command specifier {:03b} in control byte 0x{:02X}",
                other, control
            ))),
        }
    }

    fn sequence_modulus(&self) -> u8 {
        4
    }
}

/// Every frame is a whole message; nothing is stripped
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsegmentedLayout;

impl FrameLayout for UnsegmentedLayout {
    fn classify<'a>(&self, payload: &'a [u8]) -> Result<Segment<'a>> {
        Ok(Segment::Single {
            message_number: None,
            data: payload,
        })
    }

    fn sequence_modulus(&self) -> u8 {
        1
    }
}
