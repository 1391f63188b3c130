//! JSON schema file parser
//!
//! Parses packet description files and converts them into the validated
//! `PacketSchema` model. Everything that could go wrong with a schema is
//! reported here, so decoding never meets an invalid layout.

use crate::schema::{Endianness, PacketSchema, SchemaNode};
use crate::types::{DecoderError, FrameId, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Widest prefix that can be read as an unsigned integer
const MAX_PREFIX_LEN: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    cob: String,
    #[serde(alias = "endianness")]
    endianess: RawEndianness,
    min_length: usize,
    max_length: usize,
    decode: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
enum RawEndianness {
    #[serde(rename = "BIG")]
    Big,
    #[serde(rename = "LITTLE")]
    Little,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    #[serde(rename = "type")]
    kind: RawNodeKind,
    length: usize,
    name: String,
    #[serde(default)]
    subfields: Option<Vec<RawNode>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum RawNodeKind {
    #[serde(rename = "FIXED")]
    Fixed,
    #[serde(rename = "DYNAMIC")]
    Dynamic,
    #[serde(rename = "BLOCK")]
    Block,
}

/// Load and validate a schema file
pub fn load_schema(path: &Path) -> Result<PacketSchema> {
    log::info!("Loading schema file: {:?}", path);

    let content = std::fs::read_to_string(path).map_err(|e| {
        DecoderError::SchemaLoad(format!("Failed to read file {:?}: {}", path, e))
    })?;

    let schema = parse_schema(&content)
        .map_err(|e| match e {
            DecoderError::SchemaLoad(reason) => {
                DecoderError::SchemaLoad(format!("{:?}: {}", path, reason))
            }
            other => other,
        })?;

    log::info!(
        "Schema for COB {:X} loaded: {} field node(s), {} endian, length {}..{}",
        schema.id,
        schema.node_count(),
        schema.endianness,
        schema.min_length,
        if schema.max_length == 0 {
            "unbounded".to_string()
        } else {
            schema.max_length.to_string()
        }
    );

    Ok(schema)
}

/// Parse and validate schema JSON text
pub fn parse_schema(content: &str) -> Result<PacketSchema> {
    let raw: RawSchema = serde_json::from_str(content)
        .map_err(|e| DecoderError::SchemaLoad(format!("invalid schema JSON: {}", e)))?;

    let id = FrameId::parse_hex(&raw.cob, false)
        .ok_or_else(|| DecoderError::SchemaLoad(format!("invalid cob identifier '{}'", raw.cob)))?
        .id;

    if raw.max_length > 0 && raw.min_length > raw.max_length {
        return Err(DecoderError::SchemaLoad(format!(
            "min_length {} exceeds max_length {}",
            raw.min_length, raw.max_length
        )));
    }

    if raw.decode.is_empty() {
        return Err(DecoderError::SchemaLoad("'decode' has no fields".to_string()));
    }

    let fields = convert_nodes(raw.decode, "decode")?;

    Ok(PacketSchema {
        id,
        endianness: match raw.endianess {
            RawEndianness::Big => Endianness::Big,
            RawEndianness::Little => Endianness::Little,
        },
        min_length: raw.min_length,
        max_length: raw.max_length,
        fields,
    })
}

/// Convert one nesting level, rejecting duplicate names within it
fn convert_nodes(nodes: Vec<RawNode>, parent: &str) -> Result<Vec<SchemaNode>> {
    let mut seen = HashSet::new();
    let mut converted = Vec::with_capacity(nodes.len());

    for node in nodes {
        if !seen.insert(node.name.clone()) {
            return Err(DecoderError::SchemaLoad(format!(
                "duplicate field name '{}' in {}",
                node.name, parent
            )));
        }
        converted.push(convert_node(node, parent)?);
    }

    Ok(converted)
}

fn convert_node(node: RawNode, parent: &str) -> Result<SchemaNode> {
    let RawNode {
        kind,
        length,
        name,
        subfields,
    } = node;

    if name.trim().is_empty() {
        return Err(DecoderError::SchemaLoad(format!("field with empty name in {}", parent)));
    }
    if length == 0 {
        return Err(DecoderError::SchemaLoad(format!("field '{}' has length 0", name)));
    }

    match kind {
        RawNodeKind::Fixed | RawNodeKind::Dynamic => {
            if subfields.is_some() {
                return Err(DecoderError::SchemaLoad(format!(
                    "field '{}' has subfields but is not a BLOCK",
                    name
                )));
            }
            if matches!(kind, RawNodeKind::Fixed) {
                Ok(SchemaNode::Fixed { length, name })
            } else {
                check_prefix(&name, length)?;
                Ok(SchemaNode::Dynamic { length, name })
            }
        }
        RawNodeKind::Block => {
            check_prefix(&name, length)?;
            let subfields = match subfields {
                Some(subfields) if !subfields.is_empty() => subfields,
                _ => {
                    return Err(DecoderError::SchemaLoad(format!(
                        "BLOCK '{}' requires non-empty subfields",
                        name
                    )))
                }
            };
            let subfields = convert_nodes(subfields, &name)?;
            Ok(SchemaNode::Block {
                length,
                name,
                subfields,
            })
        }
    }
}

fn check_prefix(name: &str, length: usize) -> Result<()> {
    if length > MAX_PREFIX_LEN {
        return Err(DecoderError::SchemaLoad(format!(
            "prefix of '{}' is {} bytes, at most {} supported",
            name, length, MAX_PREFIX_LEN
        )));
    }
    Ok(())
}
