//! Decoded packet (`.dp`) output
//!
//! Text output lists every field of a packet under its header, with BLOCK
//! groups numbered from 1. JSON output writes one object per line.

use crate::types::{to_hex, DecodedField, DecodedPacket, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;

/// Width of the right-aligned field name column
const NAME_WIDTH: usize = 25;

/// Output format of the `.dp` file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(OutputFormat::Txt),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}' (expected txt or json)", other)),
        }
    }
}

/// Writes decoded packets
pub struct DpWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    written: usize,
}

impl<W: Write> DpWriter<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            written: 0,
        }
    }

    pub fn write_packet(&mut self, packet: &DecodedPacket) -> Result<()> {
        match self.format {
            OutputFormat::Txt => {
                writeln!(self.writer, "{}", format_packet(packet))?;
            }
            OutputFormat::Json => {
                let line = serde_json::to_string(packet).map_err(|e| {
                    crate::types::DecoderError::InvalidData(format!("JSON encoding failed: {}", e))
                })?;
                writeln!(self.writer, "{}", line)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// Number of packets written
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the inner writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Render a packet as a text block
pub fn format_packet(packet: &DecodedPacket) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Packet: {} ({}) {}",
        packet.timestamp,
        packet.id,
        to_hex(&packet.payload)
    );
    if packet.truncated {
        let _ = writeln!(out, "Note: source message was truncated");
    }
    let _ = writeln!(out, "Values:");
    write_fields(&mut out, &packet.fields, "");
    for warning in &packet.warnings {
        let _ = writeln!(out, "Warning: {}", warning);
    }
    out
}

fn write_fields(out: &mut String, fields: &[DecodedField], prefix: &str) {
    for field in fields {
        let label = format!("{}{}", prefix, field.name());
        match field {
            DecodedField::Value { raw, value, .. } => {
                let rendered = match value {
                    Some(v) => format!("{} ({})", to_hex(raw), v),
                    None => to_hex(raw),
                };
                let _ = writeln!(out, "{:>width$} - {}", label, rendered, width = NAME_WIDTH);
            }
            DecodedField::Block {
                count, instances, ..
            } => {
                let _ = writeln!(out, "{:>width$} - {} group(s)", label, count, width = NAME_WIDTH);
                for (index, instance) in instances.iter().enumerate() {
                    let group_prefix = format!("{}[{}].", label, index + 1);
                    write_fields(out, &instance.fields, &group_prefix);
                }
            }
        }
    }
}
