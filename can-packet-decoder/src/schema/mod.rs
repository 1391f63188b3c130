//! Packet schema model and loader
//!
//! A schema describes the byte layout of one message identifier as an ordered
//! tree of FIXED, DYNAMIC and BLOCK fields. Schemas are validated when loaded
//! and are read-only afterwards.

pub mod json;

pub use json::{load_schema, parse_schema};

use serde::Serialize;
use std::fmt;

/// Byte order of multi-byte integers in fields and prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endianness {
    /// Most significant byte first
    Big,
    /// Least significant byte first
    Little,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Big => write!(f, "BIG"),
            Endianness::Little => write!(f, "LITTLE"),
        }
    }
}

/// One node of the field layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchemaNode {
    /// Exactly `length` bytes
    Fixed { length: usize, name: String },
    /// A `length`-byte prefix L, then L bytes of value
    Dynamic { length: usize, name: String },
    /// A `length`-byte count N, then `subfields` repeated N times
    Block {
        length: usize,
        name: String,
        subfields: Vec<SchemaNode>,
    },
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Fixed { name, .. }
            | SchemaNode::Dynamic { name, .. }
            | SchemaNode::Block { name, .. } => name,
        }
    }

    /// Declared length: the value width for FIXED, the prefix width otherwise
    pub fn length(&self) -> usize {
        match self {
            SchemaNode::Fixed { length, .. }
            | SchemaNode::Dynamic { length, .. }
            | SchemaNode::Block { length, .. } => *length,
        }
    }
}

/// Field layout of one message identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketSchema {
    /// Message identifier (COB id) the schema applies to
    pub id: u32,
    pub endianness: Endianness,
    /// Smallest accepted payload length
    pub min_length: usize,
    /// Largest accepted payload length; 0 means unbounded
    pub max_length: usize,
    pub fields: Vec<SchemaNode>,
}

impl PacketSchema {
    /// Check a payload length against the schema bounds
    pub fn accepts_length(&self, length: usize) -> bool {
        length >= self.min_length && (self.max_length == 0 || length <= self.max_length)
    }

    /// Total number of nodes in the field tree
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[SchemaNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    SchemaNode::Block { subfields, .. } => 1 + count(subfields),
                    _ => 1,
                })
                .sum()
        }
        count(&self.fields)
    }
}
