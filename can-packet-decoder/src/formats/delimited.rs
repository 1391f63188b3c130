//! Semicolon-delimited trace rows
//!
//! ```text
//! "<timestamp>" ; <hex-id> ; <dlc> ; <flags> ; <hex-payload-no-spaces>
//! "00:30:06.883" ; 374 ; 8 ; ; 2802020202020200
//! ```

use super::malformed;
use crate::types::{parse_hex_bytes, FrameId, RawFrame, Result, Timestamp};

const COLUMNS: usize = 5;

/// True if the line has the `;`-separated five column shape
pub fn is_delimited_row(line: &str) -> bool {
    line.split(';').count() == COLUMNS
}

/// Split a row into trimmed columns, unquoting each one
pub(crate) fn columns(line: &str) -> Vec<&str> {
    line.split(';')
        .map(|c| {
            let c = c.trim();
            c.strip_prefix('"')
                .and_then(|c| c.strip_suffix('"'))
                .unwrap_or(c)
                .trim()
        })
        .collect()
}

fn is_extended_flag(flags: &str) -> bool {
    flags
        .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
        .any(|flag| flag.eq_ignore_ascii_case("ext") || flag.eq_ignore_ascii_case("x"))
}

pub fn parse_line(line_number: usize, line: &str) -> Result<Option<RawFrame>> {
    let columns = columns(line);
    if columns.len() != COLUMNS {
        return Err(malformed(
            line_number,
            format!("expected {} columns, found {}", COLUMNS, columns.len()),
        ));
    }

    let id = FrameId::parse_hex(columns[1], is_extended_flag(columns[3]))
        .ok_or_else(|| malformed(line_number, format!("invalid identifier '{}'", columns[1])))?;

    let dlc: usize = columns[2]
        .parse()
        .map_err(|_| malformed(line_number, format!("invalid dlc '{}'", columns[2])))?;

    let data = parse_hex_bytes(columns[4])
        .ok_or_else(|| malformed(line_number, format!("invalid payload '{}'", columns[4])))?;

    if data.len() > RawFrame::MAX_DATA_LEN {
        return Err(malformed(
            line_number,
            format!("{} data bytes exceed frame maximum of {}", data.len(), RawFrame::MAX_DATA_LEN),
        ));
    }
    if dlc != data.len() {
        return Err(malformed(
            line_number,
            format!("dlc {} does not match {} payload bytes", dlc, data.len()),
        ));
    }

    Ok(Some(RawFrame {
        line: line_number,
        timestamp: Timestamp::parse(columns[0]),
        id,
        data,
    }))
}
