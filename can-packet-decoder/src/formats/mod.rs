//! Trace and intermediate file formats
//!
//! This module contains the line-oriented readers for sniffer traces (quoted
//! IXXAT export and `;`-delimited rows), the `.dt` decoded-trace codec that
//! connects the two stages, and the `.dp` decoded-packet writer.

use crate::types::{DecoderError, RawFrame, ReassembledMessage, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub mod delimited;
pub mod dp;
pub mod dt;
pub mod ixxat;

pub use dp::{DpWriter, OutputFormat};
pub use dt::DtWriter;

/// Parses one line into a record; `Ok(None)` for lines that carry no record
pub type LineParser<T> = fn(usize, &str) -> Result<Option<T>>;

/// Iterator over the records of a line-oriented file
///
/// Lines are decoded lossily so stray non-UTF-8 bytes in headers do not stop
/// the run. A malformed row yields an error and iteration continues; an I/O
/// error ends iteration.
pub struct RecordReader<R, T> {
    reader: R,
    parse: LineParser<T>,
    line_number: usize,
    buffer: Vec<u8>,
    done: bool,
}

impl<R: BufRead, T> RecordReader<R, T> {
    pub fn new(reader: R, parse: LineParser<T>) -> Self {
        Self {
            reader,
            parse,
            line_number: 0,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Number of lines read so far
    pub fn lines_read(&self) -> usize {
        self.line_number
    }
}

impl<R: BufRead, T> Iterator for RecordReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_number += 1;
                    let line = String::from_utf8_lossy(&self.buffer);
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    if line.trim().is_empty() {
                        continue;
                    }
                    match (self.parse)(self.line_number, line) {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => {
                            log::trace!("Line {}: no record, skipped", self.line_number);
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(DecoderError::IoError(e)));
                }
            }
        }
        None
    }
}

/// Reader yielding raw frames from a sniffer trace
pub type TraceReader<R> = RecordReader<R, RawFrame>;

/// Reader yielding reassembled messages from a `.dt` file
pub type DtReader<R> = RecordReader<R, ReassembledMessage>;

/// Parse one trace line in either supported form
///
/// Rows that look like neither form (preamble, comments) produce `Ok(None)`.
pub fn parse_trace_line(line_number: usize, line: &str) -> Result<Option<RawFrame>> {
    if ixxat::is_quoted_row(line) {
        ixxat::parse_line(line_number, line)
    } else if delimited::is_delimited_row(line) {
        delimited::parse_line(line_number, line)
    } else {
        Ok(None)
    }
}

/// Wrap a buffered reader as a trace frame source
pub fn trace_reader<R: BufRead>(reader: R) -> TraceReader<R> {
    RecordReader::new(reader, parse_trace_line)
}

/// Wrap a buffered reader as a `.dt` message source
pub fn dt_reader<R: BufRead>(reader: R) -> DtReader<R> {
    RecordReader::new(reader, dt::parse_line)
}

/// Open a sniffer trace file
pub fn open_trace(path: &Path) -> Result<TraceReader<BufReader<File>>> {
    log::info!("Opening trace file: {:?}", path);
    Ok(trace_reader(open(path)?))
}

/// Open a stage 1 `.dt` file
pub fn open_dt(path: &Path) -> Result<DtReader<BufReader<File>>> {
    log::info!("Opening decoded trace file: {:?}", path);
    Ok(dt_reader(open(path)?))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        DecoderError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to open {:?}: {}", path, e),
        ))
    })?;
    Ok(BufReader::new(file))
}

/// Build a malformed-line error
pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> DecoderError {
    DecoderError::MalformedLine {
        line,
        reason: reason.into(),
    }
}
