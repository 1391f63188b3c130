//! Decoded trace (`.dt`) files
//!
//! Stage 1 writes one line per reassembled message; stage 2 reads them back:
//!
//! ```text
//! <timestamp> ; <id> ; <message number|-> ; <length> ; <payload hex>[ ; TRUNCATED,SEQ_GAP]
//! 00:30:06.882   ; 374  ; 1      ; 26     ; 02C9080A0202020202020000020202...
//! ```
//!
//! Lines written by the older tooling (`<datetime> ; <cob> ; <seq> ; <len> ; <hex>`)
//! parse the same way.

use super::delimited::columns;
use super::malformed;
use crate::types::{
    parse_hex_bytes, DecoderError, FrameId, MessageFlags, ReassembledMessage, Result, Timestamp,
};
use std::io::Write;

/// Writes reassembled messages in `.dt` format
pub struct DtWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> DtWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Write one line; a timestamp containing the column separator is `InvalidData`
    pub fn write_message(&mut self, message: &ReassembledMessage) -> Result<()> {
        let timestamp = message.timestamp.to_string();
        if timestamp.contains(';') {
            return Err(DecoderError::InvalidData(format!(
                "timestamp '{}' of ID {} contains ';', message not written",
                timestamp, message.id
            )));
        }
        writeln!(self.writer, "{}", format_line(message))?;
        self.written += 1;
        Ok(())
    }

    /// Number of messages written
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the inner writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Render one message as a `.dt` line (without newline)
pub fn format_line(message: &ReassembledMessage) -> String {
    let number = message
        .message_number
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:<14} ; {:<4} ; {:<6} ; {:<6} ; {}",
        message.timestamp.to_string(),
        message.id.to_string(),
        number,
        message.payload.len(),
        message.payload_hex()
    );
    if !message.flags.is_clean() {
        line.push_str(" ; ");
        line.push_str(&message.flags.to_string());
    }
    line
}

/// Parse one `.dt` line
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<ReassembledMessage>> {
    let columns = columns(line);
    if columns.len() != 5 && columns.len() != 6 {
        return Err(malformed(
            line_number,
            format!("expected 5 or 6 columns, found {}", columns.len()),
        ));
    }

    let id = FrameId::parse_hex(columns[1], false)
        .ok_or_else(|| malformed(line_number, format!("invalid identifier '{}'", columns[1])))?;

    let message_number = match columns[2] {
        "-" | "" => None,
        text => Some(text.parse::<u8>().map_err(|_| {
            malformed(line_number, format!("invalid message number '{}'", text))
        })?),
    };

    let length: usize = columns[3]
        .parse()
        .map_err(|_| malformed(line_number, format!("invalid length '{}'", columns[3])))?;

    let payload = parse_hex_bytes(columns[4])
        .ok_or_else(|| malformed(line_number, format!("invalid payload '{}'", columns[4])))?;

    if length != payload.len() {
        log::warn!(
            "Line {}: length column says {} but payload has {} bytes, using payload",
            line_number,
            length,
            payload.len()
        );
    }

    let mut flags = MessageFlags::default();
    if let Some(text) = columns.get(5) {
        for flag in text.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "TRUNCATED" => flags.truncated = true,
                "SEQ_GAP" => flags.sequence_gap = true,
                other => {
                    return Err(malformed(line_number, format!("unknown flag '{}'", other)));
                }
            }
        }
    }

    Ok(Some(ReassembledMessage {
        timestamp: Timestamp::parse(columns[0]),
        id,
        message_number,
        payload,
        expected_length: None,
        flags,
    }))
}
