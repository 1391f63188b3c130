//! Quoted trace rows (IXXAT MiniMon ASCII export)
//!
//! ```text
//! "Time","Identifier (hex)","Format","Flags","Data (hex)"
//! "00:30:06.882","374","Std","","00 01 00 1A 02 C9 08 0A"
//! ```
//!
//! The preamble lines before the column header carry no frames and are
//! ignored by the trace reader.

use super::malformed;
use crate::types::{parse_hex_bytes, FrameId, RawFrame, Result, Timestamp};

const COLUMN_SEPARATOR: &str = "\",\"";
const COLUMNS: usize = 5;

/// True if the line has the quoted comma-separated shape
pub fn is_quoted_row(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('"') && line.contains(COLUMN_SEPARATOR)
}

/// Parse a quoted row; the column header row yields `Ok(None)`
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<RawFrame>> {
    let line = line.trim();
    let inner = line
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .ok_or_else(|| malformed(line_number, "unterminated quoted row"))?;

    let columns: Vec<&str> = inner.split(COLUMN_SEPARATOR).collect();
    if columns.len() != COLUMNS {
        return Err(malformed(
            line_number,
            format!("expected {} columns, found {}", COLUMNS, columns.len()),
        ));
    }

    if columns[0].eq_ignore_ascii_case("time") {
        return Ok(None);
    }

    let extended = match columns[2].trim() {
        f if f.eq_ignore_ascii_case("std") => false,
        f if f.eq_ignore_ascii_case("ext") => true,
        other => {
            return Err(malformed(line_number, format!("unknown frame format '{}'", other)));
        }
    };

    let id = FrameId::parse_hex(columns[1], extended)
        .ok_or_else(|| malformed(line_number, format!("invalid identifier '{}'", columns[1])))?;

    let data = parse_hex_bytes(columns[4])
        .ok_or_else(|| malformed(line_number, format!("invalid data bytes '{}'", columns[4])))?;
    if data.len() > RawFrame::MAX_DATA_LEN {
        return Err(malformed(
            line_number,
            format!("{} data bytes exceed frame maximum of {}", data.len(), RawFrame::MAX_DATA_LEN),
        ));
    }

    Ok(Some(RawFrame {
        line: line_number,
        timestamp: Timestamp::parse(columns[0]),
        id,
        data,
    }))
}
