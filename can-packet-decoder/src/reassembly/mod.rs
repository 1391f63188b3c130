//! Segmented message reconstruction
//!
//! Rebuilds logical messages from frames that share an identifier. Frames are
//! consumed strictly in arrival order; each identifier has at most one message
//! in flight and identifiers interleave freely without affecting each other.

pub mod layout;

pub use layout::{FrameLayout, Segment, SegmentedLayout, UnsegmentedLayout};

use crate::config::{DecoderConfig, FrameLayoutKind};
use crate::types::{FrameId, MessageFlags, RawFrame, ReassembledMessage, Timestamp};
use std::collections::HashMap;

/// Counters collected while reassembling a trace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Frames handed to the reassembler
    pub frames: usize,
    /// Frames the layout could not classify
    pub malformed_frames: usize,
    /// Messages emitted
    pub messages: usize,
    /// Messages emitted with the truncated flag
    pub truncated: usize,
    /// Continuation frames that arrived out of sequence
    pub sequence_gaps: usize,
    /// Continuation or end frames without an open message
    pub orphaned_segments: usize,
}

/// In-flight accumulation state for one identifier
#[derive(Debug)]
struct MessageBuffer {
    id: FrameId,
    start_timestamp: Timestamp,
    message_number: Option<u8>,
    data: Vec<u8>,
    expected_length: Option<usize>,
    next_sequence: u8,
    sequence_gap: bool,
    /// Open order, used to flush in a stable order at end of input
    opened: u64,
}

impl MessageBuffer {
    fn append(&mut self, data: &[u8]) {
        let take = match self.expected_length {
            Some(expected) => data.len().min(expected.saturating_sub(self.data.len())),
            None => data.len(),
        };
        if take < data.len() {
            log_dropped(self.id, &data[take..], self.expected_length);
        }
        self.data.extend_from_slice(&data[..take]);
    }

    fn is_complete(&self) -> bool {
        self.expected_length
            .is_some_and(|expected| self.data.len() >= expected)
    }

    fn into_message(self, truncated: bool) -> ReassembledMessage {
        ReassembledMessage {
            timestamp: self.start_timestamp,
            id: self.id,
            message_number: self.message_number,
            payload: self.data,
            expected_length: self.expected_length,
            flags: MessageFlags {
                truncated,
                sequence_gap: self.sequence_gap,
            },
        }
    }
}

/// Bytes past the announced length: zero fill is frame padding, anything else is lost data
fn log_dropped(id: FrameId, dropped: &[u8], expected_length: Option<usize>) {
    if dropped.iter().any(|&b| b != 0) {
        log::warn!(
            "ID {}: dropping {} byte(s) beyond announced length {:?}: {:02X?}",
            id,
            dropped.len(),
            expected_length,
            dropped
        );
    } else {
        log::trace!("ID {}: dropping {} padding byte(s)", id, dropped.len());
    }
}

/// Reassembles frames into messages, one buffer per identifier
pub struct FrameReassembler {
    layout: Box<dyn FrameLayout>,
    buffers: HashMap<FrameId, MessageBuffer>,
    /// Next sequence of messages that reached their length hint before the end segment
    settled: HashMap<FrameId, u8>,
    opened: u64,
    stats: ReassemblyStats,
}

impl FrameReassembler {
    /// Create a reassembler using the given frame layout
    pub fn new(layout: Box<dyn FrameLayout>) -> Self {
        Self {
            layout,
            buffers: HashMap::new(),
            settled: HashMap::new(),
            opened: 0,
            stats: ReassemblyStats::default(),
        }
    }

    /// Create a reassembler with the layout selected in `config`
    pub fn from_config(config: &DecoderConfig) -> Self {
        let layout: Box<dyn FrameLayout> = match config.layout {
            FrameLayoutKind::Segmented => Box::new(SegmentedLayout),
            FrameLayoutKind::Unsegmented => Box::new(UnsegmentedLayout),
        };
        Self::new(layout)
    }

    /// Feed one frame; returns the messages it closed, in close order
    pub fn push(&mut self, frame: &RawFrame) -> Vec<ReassembledMessage> {
        self.stats.frames += 1;
        let mut closed = Vec::new();

        let segment = match self.layout.classify(&frame.data) {
            Ok(segment) => segment,
            Err(e) => {
                log::warn!("Skipping frame at line {} (ID {}): {}", frame.line, frame.id, e);
                self.stats.malformed_frames += 1;
                return closed;
            }
        };

        match segment {
            Segment::Start {
                sequence,
                message_number,
                total_length,
                data,
            } => {
                self.settled.remove(&frame.id);
                if let Some(previous) = self.buffers.remove(&frame.id) {
                    log::warn!(
                        "ID {}: start frame at line {} interrupts message started at {}, flushing it truncated",
                        frame.id,
                        frame.line,
                        previous.start_timestamp
                    );
                    closed.push(self.close(previous, true));
                }

                let mut buffer = MessageBuffer {
                    id: frame.id,
                    start_timestamp: frame.timestamp.clone(),
                    message_number,
                    data: Vec::with_capacity(total_length.unwrap_or(data.len())),
                    expected_length: total_length,
                    next_sequence: self.layout.next_sequence(sequence),
                    sequence_gap: false,
                    opened: self.opened,
                };
                self.opened += 1;
                buffer.append(data);
                log::trace!(
                    "ID {}: opened message {:?} expecting {:?} bytes",
                    frame.id,
                    message_number,
                    total_length
                );

                if buffer.is_complete() {
                    self.settled.insert(frame.id, buffer.next_sequence);
                    closed.push(self.close(buffer, false));
                } else {
                    self.buffers.insert(frame.id, buffer);
                }
            }
            Segment::Continuation { sequence, data } | Segment::End { sequence, data } => {
                let is_end = matches!(segment, Segment::End { .. });
                let Some(mut buffer) = self.buffers.remove(&frame.id) else {
                    if self.settled.get(&frame.id) == Some(&sequence) {
                        self.absorb_tail(frame, sequence, data, is_end);
                        return closed;
                    }
                    log::warn!(
                        "ID {}: {} segment at line {} without a start frame, discarded",
                        frame.id,
                        if is_end { "end" } else { "middle" },
                        frame.line
                    );
                    self.stats.orphaned_segments += 1;
                    return closed;
                };

                if sequence != buffer.next_sequence {
                    log::warn!(
                        "ID {}: sequence gap at line {} (expected {}, got {})",
                        frame.id,
                        frame.line,
                        buffer.next_sequence,
                        sequence
                    );
                    buffer.sequence_gap = true;
                    self.stats.sequence_gaps += 1;
                }
                buffer.next_sequence = self.layout.next_sequence(sequence);
                buffer.append(data);

                if buffer.is_complete() {
                    if !is_end {
                        self.settled.insert(frame.id, buffer.next_sequence);
                    }
                    closed.push(self.close(buffer, false));
                } else if is_end {
                    let truncated = buffer.expected_length.is_some();
                    if truncated {
                        log::warn!(
                            "ID {}: end frame at line {} after {} of {:?} bytes",
                            frame.id,
                            frame.line,
                            buffer.data.len(),
                            buffer.expected_length
                        );
                    }
                    closed.push(self.close(buffer, truncated));
                } else {
                    self.buffers.insert(frame.id, buffer);
                }
            }
            Segment::Single {
                message_number,
                data,
            } => {
                self.settled.remove(&frame.id);
                if let Some(previous) = self.buffers.remove(&frame.id) {
                    log::warn!(
                        "ID {}: single frame at line {} interrupts message started at {}, flushing it truncated",
                        frame.id,
                        frame.line,
                        previous.start_timestamp
                    );
                    closed.push(self.close(previous, true));
                }
                self.stats.messages += 1;
                closed.push(ReassembledMessage {
                    timestamp: frame.timestamp.clone(),
                    id: frame.id,
                    message_number,
                    payload: data.to_vec(),
                    expected_length: None,
                    flags: MessageFlags::default(),
                });
            }
        }

        closed
    }

    /// Consume the remaining segments of a message already closed on its length hint
    fn absorb_tail(&mut self, frame: &RawFrame, sequence: u8, data: &[u8], is_end: bool) {
        log::trace!(
            "ID {}: {} segment at line {} after announced length reached",
            frame.id,
            if is_end { "end" } else { "middle" },
            frame.line
        );
        if !data.is_empty() {
            log_dropped(frame.id, data, None);
        }
        if is_end {
            self.settled.remove(&frame.id);
        } else {
            let next = self.layout.next_sequence(sequence);
            self.settled.insert(frame.id, next);
        }
    }

    /// Flush every open buffer at end of input, in the order they were opened
    pub fn finish(&mut self) -> Vec<ReassembledMessage> {
        self.settled.clear();
        let mut pending: Vec<MessageBuffer> = self.buffers.drain().map(|(_, b)| b).collect();
        pending.sort_by_key(|b| b.opened);

        pending
            .into_iter()
            .map(|buffer| {
                let truncated = !buffer.is_complete();
                if truncated {
                    log::warn!(
                        "ID {}: input ended with message started at {} incomplete ({} of {:?} bytes)",
                        buffer.id,
                        buffer.start_timestamp,
                        buffer.data.len(),
                        buffer.expected_length
                    );
                }
                self.close(buffer, truncated)
            })
            .collect()
    }

    /// Number of identifiers with a message in flight
    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    fn close(&mut self, buffer: MessageBuffer, truncated: bool) -> ReassembledMessage {
        self.stats.messages += 1;
        if truncated {
            self.stats.truncated += 1;
        }
        let message = buffer.into_message(truncated);
        log::debug!(
            "ID {}: message of {} byte(s) closed{}",
            message.id,
            message.payload.len(),
            if message.flags.is_clean() {
                String::new()
            } else {
                format!(" [{}]", message.flags)
            }
        );
        message
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(Box::new(SegmentedLayout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(line: usize, id: u32, data: &[u8]) -> RawFrame {
        RawFrame {
            line,
            timestamp: Timestamp::parse(&format!("00:30:06.{:03}", line)),
            id: FrameId::standard(id),
            data: data.to_vec(),
        }
    }

    fn feed(reassembler: &mut FrameReassembler, frames: &[RawFrame]) -> Vec<ReassembledMessage> {
        let mut out = Vec::new();
        for f in frames {
            out.extend(reassembler.push(f));
        }
        out.extend(reassembler.finish());
        out
    }

    #[test]
    fn test_full_message_from_capture() {
        let frames = [
            frame(1, 0x374, &[0x00, 0x01, 0x00, 0x1A, 0x02, 0xC9, 0x08, 0x0A]),
            frame(2, 0x374, &[0x28, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x00]),
            frame(3, 0x374, &[0x30, 0x00, 0x02, 0x02, 0x02, 0x00, 0x00, 0x1C]),
            frame(4, 0x374, &[0x38, 0x02, 0x1F, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(5, 0x374, &[0x41, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.payload.len(), 0x1A);
        assert!(message.flags.is_clean());
        assert_eq!(message.message_number, Some(0x01));
        assert_eq!(message.timestamp, frames[0].timestamp);

        let mut expected = frames[0].data[4..].to_vec();
        expected.extend_from_slice(&frames[1].data[1..]);
        expected.extend_from_slice(&frames[2].data[1..]);
        expected.extend_from_slice(&frames[3].data[1..]);
        expected.push(0x00);
        assert_eq!(message.payload, expected);
    }

    #[test]
    fn test_three_frames_concatenate_in_order() {
        let frames = [
            frame(1, 0x374, &[0x00, 0x01, 0x00, 0x1A, 0x02, 0xC9, 0x08, 0x0A]),
            frame(2, 0x374, &[0x28, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x00]),
            frame(3, 0x374, &[0x30, 0x00, 0x02, 0x02, 0x02, 0x00, 0x00, 0x1C]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].payload,
            vec![
                0x02, 0xC9, 0x08, 0x0A, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x02, 0x02,
                0x02, 0x00, 0x00, 0x1C
            ]
        );
        // announced 26 bytes, input ended after 18
        assert!(messages[0].flags.truncated);
        assert_eq!(reassembler.stats().truncated, 1);
    }

    #[test]
    fn test_end_segment_byte_count() {
        let frames = [
            frame(1, 0x300, &[0x00, 0x09, 0x00, 0x07, 0x20, 0x03, 0x00, 0x00]),
            frame(2, 0x300, &[0x4B, 0x01, 0x83, 0x49, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0x20, 0x03, 0x00, 0x00, 0x01, 0x83, 0x49]);
        assert!(messages[0].flags.is_clean());
    }

    #[test]
    fn test_new_start_flushes_open_buffer_truncated() {
        let frames = [
            frame(1, 0x184, &[0x00, 0x06, 0x00, 0x16, 0x75, 0xEE, 0x00, 0x3C]),
            frame(2, 0x184, &[0x28, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(3, 0x184, &[0x00, 0x07, 0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let first = reassembler.push(&frames[0]);
        let second = reassembler.push(&frames[1]);
        assert!(first.is_empty() && second.is_empty());

        let closed = reassembler.push(&frames[2]);
        assert_eq!(closed.len(), 2);
        assert!(closed[0].flags.truncated);
        assert_eq!(closed[0].message_number, Some(0x06));
        assert_eq!(closed[0].payload.len(), 4 + 7);
        assert_eq!(closed[1].message_number, Some(0x07));
        assert_eq!(closed[1].payload, vec![0xAA, 0xBB, 0xCC]);
        assert!(closed[1].flags.is_clean());
        assert_eq!(reassembler.open_buffers(), 0);
    }

    #[test]
    fn test_end_segment_after_length_reached_is_not_orphaned() {
        let mut reassembler = FrameReassembler::default();
        let closed = reassembler.push(&frame(1, 0x300, &[0x00, 0x01, 0x00, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].payload, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(closed[0].flags.is_clean());

        // 0x48 = 010 01 000: end, sequence 1, no data
        let tail = reassembler.push(&frame(2, 0x300, &[0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert!(tail.is_empty());
        assert_eq!(reassembler.stats().orphaned_segments, 0);
        assert_eq!(reassembler.stats().messages, 1);

        // a second end segment has nothing left to belong to
        reassembler.push(&frame(3, 0x300, &[0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(reassembler.stats().orphaned_segments, 1);
    }

    #[test]
    fn test_padding_segments_after_length_reached() {
        let frames = [
            frame(1, 0x374, &[0x00, 0x01, 0x00, 0x06, 0x01, 0x02, 0x03, 0x04]),
            frame(2, 0x374, &[0x28, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(3, 0x374, &[0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(4, 0x374, &[0x58, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert!(messages[0].flags.is_clean());
        assert_eq!(reassembler.stats().orphaned_segments, 0);
        assert_eq!(reassembler.stats().sequence_gaps, 0);
    }

    #[test]
    fn test_data_beyond_length_is_dropped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let frames = [
            // announces 3 bytes, carries 4 non-zero ones
            frame(1, 0x300, &[0x00, 0x02, 0x00, 0x03, 0x11, 0x22, 0x33, 0x44]),
            frame(2, 0x300, &[0x2F, 0x55, 0x66, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0x11, 0x22, 0x33]);
        assert!(messages[0].flags.is_clean());
        assert_eq!(reassembler.stats().orphaned_segments, 0);
    }

    #[test]
    fn test_single_frame_flushes_open_buffer_truncated() {
        let frames = [
            frame(1, 0x184, &[0x00, 0x06, 0x00, 0x16, 0x75, 0xEE, 0x00, 0x3C]),
            frame(2, 0x184, &[0x63, 0x07, 0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        assert!(reassembler.push(&frames[0]).is_empty());

        let closed = reassembler.push(&frames[1]);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].message_number, Some(0x06));
        assert_eq!(closed[0].payload, vec![0x75, 0xEE, 0x00, 0x3C]);
        assert!(closed[0].flags.truncated);
        assert_eq!(closed[1].message_number, Some(0x07));
        assert_eq!(closed[1].payload, vec![0xAA, 0xBB, 0xCC]);
        assert!(closed[1].flags.is_clean());
        assert_eq!(reassembler.open_buffers(), 0);
        assert_eq!(reassembler.stats().truncated, 1);
    }

    #[test]
    fn test_early_end_segment_is_truncated() {
        let frames = [
            frame(1, 0x184, &[0x00, 0x06, 0x00, 0x16, 0x75, 0xEE, 0x00, 0x3C]),
            frame(2, 0x184, &[0x4B, 0x01, 0x83, 0x49, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        assert!(reassembler.push(&frames[0]).is_empty());

        let closed = reassembler.push(&frames[1]);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].payload, vec![0x75, 0xEE, 0x00, 0x3C, 0x01, 0x83, 0x49]);
        assert_eq!(closed[0].expected_length, Some(0x16));
        assert!(closed[0].flags.truncated);
        assert!(reassembler.finish().is_empty());
    }

    #[test]
    fn test_interleaved_identifiers_do_not_interfere() {
        let frames = [
            frame(1, 0x184, &[0x00, 0x06, 0x00, 0x16, 0x75, 0xEE, 0x00, 0x3C]),
            frame(2, 0x300, &[0x00, 0x09, 0x00, 0x07, 0x20, 0x03, 0x00, 0x00]),
            frame(3, 0x184, &[0x28, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(4, 0x300, &[0x4B, 0x01, 0x83, 0x49, 0x00, 0x00, 0x00, 0x00]),
            frame(5, 0x184, &[0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            frame(6, 0x184, &[0x5C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, FrameId::standard(0x300));
        assert_eq!(messages[0].len(), 7);
        assert_eq!(messages[1].id, FrameId::standard(0x184));
        assert_eq!(messages[1].len(), 0x16);
        assert!(messages.iter().all(|m| m.flags.is_clean()));
    }

    #[test]
    fn test_sequence_gap_flags_but_keeps_appending() {
        let frames = [
            frame(1, 0x374, &[0x00, 0x01, 0x00, 0x12, 0x01, 0x02, 0x03, 0x04]),
            // sequence 2 where 1 is expected
            frame(2, 0x374, &[0x30, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]),
            frame(3, 0x374, &[0x38, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert!(messages[0].flags.sequence_gap);
        assert!(!messages[0].flags.truncated);
        assert_eq!(messages[0].payload, (1u8..=0x12).collect::<Vec<_>>());
        assert_eq!(reassembler.stats().sequence_gaps, 1);
    }

    #[test]
    fn test_orphaned_and_malformed_frames_are_skipped() {
        let frames = [
            frame(1, 0x374, &[0x28, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x00]),
            frame(2, 0x374, &[]),
            frame(3, 0x374, &[0xE0, 0x00]),
            frame(4, 0x374, &[0x63, 0x01, 0x0A, 0x0B, 0x0C, 0x00, 0x00, 0x00]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0x0A, 0x0B, 0x0C]);
        let stats = reassembler.stats();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.orphaned_segments, 1);
        assert_eq!(stats.malformed_frames, 2);
    }

    #[test]
    fn test_end_of_input_flushes_in_open_order() {
        let frames = [
            frame(1, 0x200, &[0x00, 0x01, 0x00, 0x20, 0x01, 0x01, 0x01, 0x01]),
            frame(2, 0x100, &[0x00, 0x02, 0x00, 0x20, 0x02, 0x02, 0x02, 0x02]),
            frame(3, 0x300, &[0x00, 0x03, 0x00, 0x20, 0x03, 0x03, 0x03, 0x03]),
        ];
        let mut reassembler = FrameReassembler::default();
        let messages = feed(&mut reassembler, &frames);

        let ids: Vec<u32> = messages.iter().map(|m| m.id.id).collect();
        assert_eq!(ids, vec![0x200, 0x100, 0x300]);
        assert!(messages.iter().all(|m| m.flags.truncated));
    }

    #[test]
    fn test_unsegmented_layout_passes_frames_through() {
        let mut reassembler = FrameReassembler::new(Box::new(UnsegmentedLayout));
        let messages = feed(&mut reassembler, &[frame(1, 0x1FA, &[0x00, 0x01, 0x02])]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0x00, 0x01, 0x02]);
        assert_eq!(messages[0].message_number, None);
    }
}
