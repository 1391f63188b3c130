//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! `Decoder` runs stage 1 (trace → reassembled messages), `PacketDecoder`
//! runs stage 2 (reassembled messages → decoded packets).

use crate::config::DecoderConfig;
use crate::field_decoder::FieldDecoder;
use crate::formats::{self, DpWriter, DtWriter, OutputFormat, TraceReader};
use crate::reassembly::{FrameReassembler, ReassemblyStats};
use crate::schema::{self, PacketSchema};
use crate::types::{DecodedPacket, DecoderError, RawFrame, ReassembledMessage, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Counters for a stage 1 run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Trace rows that could not be parsed
    pub malformed_lines: usize,
    /// Frames dropped by the message filter
    pub filtered_frames: usize,
    pub reassembly: ReassemblyStats,
}

/// Counters for a stage 2 run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketStats {
    /// Messages offered to the decoder
    pub messages: usize,
    /// Packets decoded successfully
    pub decoded: usize,
    /// Messages for other identifiers
    pub other_identifiers: usize,
    /// Messages rejected by the length bounds
    pub length_out_of_range: usize,
    /// Messages whose payload ended inside a field
    pub truncated_fields: usize,
    /// Messages rejected because reassembly flagged them truncated
    pub rejected_truncated: usize,
    /// Packets decoded with leftover bytes
    pub trailing_bytes: usize,
    /// `.dt` rows that could not be parsed
    pub malformed_lines: usize,
    /// Messages rejected for other data errors
    pub invalid: usize,
}

/// Stage 1 entry point: reassembles trace frames into messages
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Create a new decoder instance
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Reassemble an iterator of frames
    ///
    /// Frame errors from the source are passed through; the returned iterator
    /// keeps going after recoverable ones.
    pub fn reassemble<I>(&self, frames: I) -> ReassemblingIterator<I>
    where
        I: Iterator<Item = Result<RawFrame>>,
    {
        ReassemblingIterator::new(frames, self.config.clone())
    }

    /// Reassemble the frames of a trace file
    ///
    /// # Example
    /// ```no_run
    /// use can_packet_decoder::{Decoder, DecoderConfig};
    /// use std::path::Path;
    ///
    /// let decoder = Decoder::new(DecoderConfig::new());
    /// for message in decoder.reassemble_file(Path::new("trace.txt")).unwrap() {
    ///     match message {
    ///         Ok(message) => println!("{} {} bytes", message.id, message.len()),
    ///         Err(e) => eprintln!("Skipped: {}", e),
    ///     }
    /// }
    /// ```
    pub fn reassemble_file(
        &self,
        path: &Path,
    ) -> Result<ReassemblingIterator<TraceReader<BufReader<File>>>> {
        Ok(self.reassemble(formats::open_trace(path)?))
    }

    /// Run stage 1: decode `trace` and write the `.dt` file to `output`
    pub fn decode_trace_file(&self, trace: &Path, output: &Path) -> Result<TraceStats> {
        let mut messages = self.reassemble_file(trace)?;
        let file = File::create(output)?;
        let mut writer = DtWriter::new(BufWriter::new(file));

        while let Some(result) = messages.next() {
            match result.and_then(|message| writer.write_message(&message)) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => log::warn!("{}", e),
                Err(e) => return Err(e),
            }
        }
        writer.finish()?;

        let stats = messages.stats();
        log::info!(
            "Trace decoded: {} frame(s), {} message(s) written to {:?}",
            stats.reassembly.frames,
            stats.reassembly.messages,
            output
        );
        Ok(stats)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

/// Iterator that reassembles frames into messages
///
/// Messages come out in the order their buffers close. A frame can close
/// more than one buffer, so closed messages are queued.
pub struct ReassemblingIterator<I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    frames: I,
    config: DecoderConfig,
    reassembler: FrameReassembler,
    pending: VecDeque<ReassembledMessage>,
    malformed_lines: usize,
    filtered_frames: usize,
    finished: bool,
}

impl<I> ReassemblingIterator<I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    fn new(frames: I, config: DecoderConfig) -> Self {
        Self {
            frames,
            reassembler: FrameReassembler::from_config(&config),
            config,
            pending: VecDeque::new(),
            malformed_lines: 0,
            filtered_frames: 0,
            finished: false,
        }
    }

    /// Counters so far; complete once the iterator is exhausted
    pub fn stats(&self) -> TraceStats {
        TraceStats {
            malformed_lines: self.malformed_lines,
            filtered_frames: self.filtered_frames,
            reassembly: self.reassembler.stats().clone(),
        }
    }
}

impl<I> Iterator for ReassemblingIterator<I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    type Item = Result<ReassembledMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(Ok(message));
            }
            if self.finished {
                return None;
            }

            match self.frames.next() {
                Some(Ok(frame)) => {
                    if !self.config.should_process_message(frame.id.id) {
                        self.filtered_frames += 1;
                        continue;
                    }
                    log::trace!("Line {}: ID {} {:02X?}", frame.line, frame.id, frame.data);
                    self.pending.extend(self.reassembler.push(&frame));
                }
                Some(Err(e)) => {
                    if e.is_recoverable() {
                        self.malformed_lines += 1;
                    } else {
                        self.finished = true;
                    }
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    self.pending.extend(self.reassembler.finish());
                }
            }
        }
    }
}

/// Stage 2 entry point: applies a packet schema to reassembled messages
pub struct PacketDecoder {
    schema: PacketSchema,
    config: DecoderConfig,
    stats: PacketStats,
}

impl PacketDecoder {
    pub fn new(schema: PacketSchema, config: DecoderConfig) -> Self {
        Self {
            schema,
            config,
            stats: PacketStats::default(),
        }
    }

    /// Load the schema from a JSON file
    pub fn from_schema_file(path: &Path, config: DecoderConfig) -> Result<Self> {
        Ok(Self::new(schema::load_schema(path)?, config))
    }

    pub fn schema(&self) -> &PacketSchema {
        &self.schema
    }

    pub fn stats(&self) -> &PacketStats {
        &self.stats
    }

    /// Decode one message, logging and counting the outcome
    pub fn decode(&mut self, message: &ReassembledMessage) -> Result<DecodedPacket> {
        self.stats.messages += 1;

        if message.flags.truncated && !self.config.decode_truncated && message.id.id == self.schema.id {
            self.stats.rejected_truncated += 1;
            log::warn!(
                "Message at {} (ID {}) was truncated during reassembly, not decoded",
                message.timestamp,
                message.id
            );
            return Err(DecoderError::InvalidData(format!(
                "message at {} truncated during reassembly",
                message.timestamp
            )));
        }

        let result = FieldDecoder::decode(&self.schema, message);
        match &result {
            Ok(packet) => {
                self.stats.decoded += 1;
                if !packet.warnings.is_empty() {
                    self.stats.trailing_bytes += 1;
                    for warning in &packet.warnings {
                        log::warn!("Packet at {} (ID {}): {}", message.timestamp, message.id, warning);
                    }
                }
                if packet.truncated {
                    log::warn!(
                        "Packet at {} (ID {}) decoded from a truncated message",
                        message.timestamp,
                        message.id
                    );
                }
                log::debug!(
                    "Decoded packet at {} (ID {}): {} field(s)",
                    message.timestamp,
                    message.id,
                    packet.fields.len()
                );
            }
            Err(DecoderError::SchemaMismatch { .. }) => {
                self.stats.other_identifiers += 1;
                log::trace!("Message at {} (ID {}) skipped: other identifier", message.timestamp, message.id);
            }
            Err(e) => {
                match e {
                    DecoderError::LengthOutOfRange { .. } => self.stats.length_out_of_range += 1,
                    DecoderError::TruncatedField { .. } => self.stats.truncated_fields += 1,
                    _ => self.stats.invalid += 1,
                }
                log::warn!("Message at {} (ID {}) not decoded: {}", message.timestamp, message.id, e);
            }
        }
        result
    }

    /// Decode a stream of messages, dropping those for other identifiers
    pub fn decode_messages<'a, I>(&'a mut self, messages: I) -> impl Iterator<Item = Result<DecodedPacket>> + 'a
    where
        I: IntoIterator<Item = Result<ReassembledMessage>>,
        I::IntoIter: 'a,
    {
        messages.into_iter().filter_map(move |message| match message {
            Ok(message) => match self.decode(&message) {
                Err(DecoderError::SchemaMismatch { .. }) => None,
                other => Some(other),
            },
            Err(e) => {
                if e.is_recoverable() {
                    self.stats.malformed_lines += 1;
                }
                Some(Err(e))
            }
        })
    }

    /// Run stage 2: decode the `.dt` file `input` and write the `.dp` file to `output`
    pub fn decode_dt_file(&mut self, input: &Path, output: &Path, format: OutputFormat) -> Result<PacketStats> {
        let messages = formats::open_dt(input)?;
        let file = File::create(output)?;
        let mut writer = DpWriter::new(BufWriter::new(file), format);

        for result in self.decode_messages(messages) {
            match result {
                Ok(packet) => writer.write_packet(&packet)?,
                Err(e) if e.is_recoverable() => {
                    if let DecoderError::MalformedLine { .. } = e {
                        log::warn!("{}", e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        writer.finish()?;

        log::info!(
            "Packets decoded: {} of {} message(s) written to {:?}",
            self.stats.decoded,
            self.stats.messages,
            output
        );
        Ok(self.stats.clone())
    }
}
