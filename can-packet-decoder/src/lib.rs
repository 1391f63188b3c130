//! CAN Packet Decoder Library
//!
//! A reusable library for turning raw CAN sniffer traces into structured
//! packets described by a JSON schema.
//!
//! # Architecture
//!
//! Decoding happens in two stages connected by a plain-text `.dt` file:
//! - Stage 1 parses trace rows and reassembles segmented frames into logical
//!   messages, one in-flight message per identifier
//! - Stage 2 applies a packet schema (FIXED, DYNAMIC and repeated BLOCK
//!   fields) to each message and writes a `.dp` file
//!
//! The library does NOT:
//! - Choose output paths or file names
//! - Configure logging sinks
//! - Print run summaries
//!
//! All higher-level functionality is in the application layer (can-packet-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_packet_decoder::{Decoder, DecoderConfig, OutputFormat, PacketDecoder};
//! use std::path::Path;
//!
//! let config = DecoderConfig::new();
//!
//! // Stage 1: trace -> reassembled messages
//! let decoder = Decoder::new(config.clone());
//! decoder
//!     .decode_trace_file(Path::new("trace.txt"), Path::new("trace.txt.dt"))
//!     .unwrap();
//!
//! // Stage 2: reassembled messages -> decoded packets
//! let mut packets = PacketDecoder::from_schema_file(Path::new("odometry.json"), config).unwrap();
//! let stats = packets
//!     .decode_dt_file(
//!         Path::new("trace.txt.dt"),
//!         Path::new("trace.txt.dt.dp"),
//!         OutputFormat::Txt,
//!     )
//!     .unwrap();
//! println!("{} packet(s) decoded", stats.decoded);
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod field_decoder;
pub mod formats;
pub mod reassembly;
pub mod schema;
pub mod types;

// Re-export main types for convenience
pub use config::{DecoderConfig, FrameLayoutKind};
pub use decoder::{Decoder, PacketDecoder, PacketStats, ReassemblingIterator, TraceStats};
pub use field_decoder::FieldDecoder;
pub use formats::{DpWriter, DtWriter, OutputFormat};
pub use reassembly::{FrameLayout, FrameReassembler, ReassemblyStats};
pub use schema::{load_schema, parse_schema, Endianness, PacketSchema, SchemaNode};
pub use types::{
    BlockInstance, DecodeWarning, DecodedField, DecodedPacket, DecoderError, FrameId, FrameKind,
    MessageFlags, RawFrame, ReassembledMessage, Result, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty trace produces no messages
        let decoder = Decoder::default();
        let mut messages = decoder.reassemble(std::iter::empty::<Result<RawFrame>>());
        assert!(messages.next().is_none());
        assert_eq!(messages.stats(), TraceStats::default());
        assert!(!VERSION.is_empty());
    }
}
