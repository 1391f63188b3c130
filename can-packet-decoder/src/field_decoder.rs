//! Field Decoding Engine
//!
//! Applies a packet schema to a reassembled message payload. A single byte
//! cursor advances through the whole schema tree: subfields of a BLOCK continue
//! from where the count prefix ended, and every repetition continues from the
//! previous one.

use crate::schema::{Endianness, PacketSchema, SchemaNode};
use crate::types::{
    BlockInstance, DecodeWarning, DecodedField, DecodedPacket, DecoderError, ReassembledMessage,
    Result,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Field decoder - extracts schema fields from message payloads
pub struct FieldDecoder;

impl FieldDecoder {
    /// Decode a reassembled message into a packet
    ///
    /// # Arguments
    /// * `schema` - Packet schema for the message identifier
    /// * `message` - Reassembled message from stage 1
    ///
    /// # Returns
    /// * `Ok(DecodedPacket)` with any non-fatal warnings attached
    /// * `Err(SchemaMismatch)` if the identifiers differ
    /// * `Err(LengthOutOfRange)` if the payload length is outside the schema bounds
    /// * `Err(TruncatedField)` if the payload ends inside a field or prefix
    pub fn decode(schema: &PacketSchema, message: &ReassembledMessage) -> Result<DecodedPacket> {
        if message.id.id != schema.id {
            return Err(DecoderError::SchemaMismatch {
                expected: schema.id,
                found: message.id.id,
            });
        }

        let (fields, warnings) = Self::decode_payload(schema, &message.payload)?;

        Ok(DecodedPacket {
            timestamp: message.timestamp.clone(),
            id: message.id,
            payload: message.payload.clone(),
            fields,
            warnings,
            truncated: message.flags.truncated,
        })
    }

    /// Decode a bare payload, without the identifier check
    pub fn decode_payload(
        schema: &PacketSchema,
        payload: &[u8],
    ) -> Result<(Vec<DecodedField>, Vec<DecodeWarning>)> {
        if !schema.accepts_length(payload.len()) {
            return Err(DecoderError::LengthOutOfRange {
                length: payload.len(),
                min: schema.min_length,
                max: schema.max_length,
            });
        }

        let (fields, cursor) = Self::decode_nodes(&schema.fields, payload, 0, schema.endianness)?;

        let mut warnings = Vec::new();
        if cursor < payload.len() {
            log::debug!(
                "{} trailing byte(s) after last field at offset {}",
                payload.len() - cursor,
                cursor
            );
            warnings.push(DecodeWarning::TrailingBytes {
                offset: cursor,
                count: payload.len() - cursor,
            });
        }

        Ok((fields, warnings))
    }

    /// Decode one nesting level starting at `cursor`; returns the fields and the new cursor
    fn decode_nodes(
        nodes: &[SchemaNode],
        payload: &[u8],
        mut cursor: usize,
        endianness: Endianness,
    ) -> Result<(Vec<DecodedField>, usize)> {
        let mut fields = Vec::with_capacity(nodes.len());

        for node in nodes {
            let (field, next) = Self::decode_node(node, payload, cursor, endianness)?;
            fields.push(field);
            cursor = next;
        }

        Ok((fields, cursor))
    }

    fn decode_node(
        node: &SchemaNode,
        payload: &[u8],
        cursor: usize,
        endianness: Endianness,
    ) -> Result<(DecodedField, usize)> {
        match node {
            SchemaNode::Fixed { length, name } => {
                let raw = Self::take(name, payload, cursor, *length)?;
                Ok((
                    DecodedField::Value {
                        name: name.clone(),
                        offset: cursor,
                        raw: raw.to_vec(),
                        value: read_unsigned(raw, endianness),
                    },
                    cursor + length,
                ))
            }
            SchemaNode::Dynamic { length, name } => {
                let (value_length, start) = Self::read_prefix(name, payload, cursor, *length, endianness)?;
                let value_length = usize::try_from(value_length).unwrap_or(usize::MAX);
                let raw = Self::take(name, payload, start, value_length)?;
                Ok((
                    DecodedField::Value {
                        name: name.clone(),
                        offset: start,
                        raw: raw.to_vec(),
                        value: read_unsigned(raw, endianness),
                    },
                    start + value_length,
                ))
            }
            SchemaNode::Block {
                length,
                name,
                subfields,
            } => {
                let (count, mut next) = Self::read_prefix(name, payload, cursor, *length, endianness)?;

                // Each repetition consumes at least one byte, so the payload bounds the capacity
                let capacity = usize::try_from(count)
                    .unwrap_or(usize::MAX)
                    .min(payload.len() - next);
                let mut instances = Vec::with_capacity(capacity);

                for _ in 0..count {
                    let (fields, after) = Self::decode_nodes(subfields, payload, next, endianness)?;
                    if after == next {
                        return Err(DecoderError::InvalidData(format!(
                            "BLOCK '{}' subfields consume no bytes",
                            name
                        )));
                    }
                    instances.push(BlockInstance { fields });
                    next = after;
                }

                Ok((
                    DecodedField::Block {
                        name: name.clone(),
                        offset: cursor,
                        count,
                        instances,
                    },
                    next,
                ))
            }
        }
    }

    /// Read a length or count prefix; returns its value and the cursor after it
    fn read_prefix(
        name: &str,
        payload: &[u8],
        cursor: usize,
        length: usize,
        endianness: Endianness,
    ) -> Result<(u64, usize)> {
        let raw = Self::take(name, payload, cursor, length)?;
        let value = read_unsigned(raw, endianness).ok_or_else(|| {
            DecoderError::InvalidData(format!(
                "prefix of '{}' is {} bytes wide, at most 8 supported",
                name, length
            ))
        })?;
        Ok((value, cursor + length))
    }

    fn take<'a>(name: &str, payload: &'a [u8], cursor: usize, length: usize) -> Result<&'a [u8]> {
        let available = payload.len().saturating_sub(cursor);
        if length > available {
            return Err(DecoderError::TruncatedField {
                name: name.to_string(),
                offset: cursor,
                needed: length,
                available,
            });
        }
        Ok(&payload[cursor..cursor + length])
    }
}

/// Interpret up to 8 bytes as an unsigned integer
///
/// An empty slice reads as 0; wider slices have no integer interpretation.
pub fn read_unsigned(bytes: &[u8], endianness: Endianness) -> Option<u64> {
    match bytes.len() {
        0 => Some(0),
        1..=8 => Some(match endianness {
            Endianness::Big => BigEndian::read_uint(bytes, bytes.len()),
            Endianness::Little => LittleEndian::read_uint(bytes, bytes.len()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrameId, MessageFlags, Timestamp};

    fn fixed(length: usize, name: &str) -> SchemaNode {
        SchemaNode::Fixed {
            length,
            name: name.to_string(),
        }
    }

    fn dynamic(length: usize, name: &str) -> SchemaNode {
        SchemaNode::Dynamic {
            length,
            name: name.to_string(),
        }
    }

    fn block(length: usize, name: &str, subfields: Vec<SchemaNode>) -> SchemaNode {
        SchemaNode::Block {
            length,
            name: name.to_string(),
            subfields,
        }
    }

    fn odometry(endianness: Endianness) -> PacketSchema {
        PacketSchema {
            id: 0x1FA,
            endianness,
            min_length: 3,
            max_length: 1024,
            fields: vec![
                fixed(1, "CODE"),
                fixed(2, "LEN"),
                dynamic(1, "TIME"),
                block(
                    1,
                    "GROUP",
                    vec![fixed(2, "POSITION"), fixed(1, "TILT_X"), fixed(1, "TILT_Y")],
                ),
            ],
        }
    }

    fn message(id: u32, payload: Vec<u8>) -> ReassembledMessage {
        ReassembledMessage {
            timestamp: Timestamp::parse("2024-06-07 00:30:33.025"),
            id: FrameId::standard(id),
            message_number: None,
            payload,
            expected_length: None,
            flags: MessageFlags::default(),
        }
    }

    #[test]
    fn test_decode_documented_odometry_packet() {
        let payload = crate::types::parse_hex_bytes("020022041122334402000A1719000D2123").unwrap();
        let packet = FieldDecoder::decode(&odometry(Endianness::Big), &message(0x1FA, payload)).unwrap();

        assert!(packet.warnings.is_empty());
        assert_eq!(packet.field("CODE").unwrap().as_u64(), Some(0x02));
        assert_eq!(packet.field("LEN").unwrap().as_u64(), Some(0x0022));

        let time = packet.field("TIME").unwrap();
        assert_eq!(time.as_u64(), Some(287_454_020));
        assert_eq!(time.offset(), 4);
        assert_eq!(time.raw(), Some(&[0x11, 0x22, 0x33, 0x44][..]));

        let groups = packet.field("GROUP").unwrap().instances().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].get("POSITION").unwrap().as_u64(), Some(10));
        assert_eq!(groups[0].get("TILT_X").unwrap().as_u64(), Some(23));
        assert_eq!(groups[0].get("TILT_Y").unwrap().as_u64(), Some(25));
        assert_eq!(groups[1].get("POSITION").unwrap().as_u64(), Some(13));
        assert_eq!(groups[1].get("TILT_X").unwrap().as_u64(), Some(33));
        assert_eq!(groups[1].get("TILT_Y").unwrap().as_u64(), Some(35));
        assert_eq!(groups[1].get("POSITION").unwrap().offset(), 13);
    }

    #[test]
    fn test_schema_mismatch() {
        let result = FieldDecoder::decode(&odometry(Endianness::Big), &message(0x208, vec![0; 8]));
        assert!(matches!(
            result,
            Err(DecoderError::SchemaMismatch {
                expected: 0x1FA,
                found: 0x208
            })
        ));
    }

    #[test]
    fn test_length_out_of_range_before_decoding() {
        let mut schema = odometry(Endianness::Big);
        let short = FieldDecoder::decode(&schema, &message(0x1FA, vec![0x02, 0x00]));
        assert!(matches!(
            short,
            Err(DecoderError::LengthOutOfRange { length: 2, min: 3, .. })
        ));

        // a payload that would decode fine is still rejected when too long
        schema.max_length = 4;
        let long = FieldDecoder::decode(&schema, &message(0x1FA, vec![0x02, 0x00, 0x05, 0x00, 0x00]));
        assert!(matches!(
            long,
            Err(DecoderError::LengthOutOfRange { length: 5, max: 4, .. })
        ));
    }

    #[test]
    fn test_empty_block_consumes_only_prefix() {
        let payload = vec![0x01, 0x00, 0x05, 0x00, 0x00];
        let (fields, warnings) = FieldDecoder::decode_payload(&odometry(Endianness::Big), &payload).unwrap();

        assert!(warnings.is_empty());
        match &fields[3] {
            DecodedField::Block {
                count,
                instances,
                offset,
                ..
            } => {
                assert_eq!(*count, 0);
                assert!(instances.is_empty());
                assert_eq!(*offset, 4);
            }
            other => panic!("expected block, got {:?}", other),
        }
        // TIME has a zero-length value
        assert_eq!(fields[2].raw(), Some(&[][..]));
        assert_eq!(fields[2].as_u64(), Some(0));
    }

    #[test]
    fn test_block_repeats_count_times() {
        let payload = vec![0x02, 0x00, 0x09, 0x00, 0x03, 0x00, 0x01, 0x0A, 0x0B, 0x00, 0x02, 0x0C, 0x0D, 0x00, 0x03, 0x0E, 0x0F];
        let (fields, warnings) = FieldDecoder::decode_payload(&odometry(Endianness::Big), &payload).unwrap();

        assert!(warnings.is_empty());
        let groups = fields[3].instances().unwrap();
        assert_eq!(groups.len(), 3);
        for (i, group) in groups.iter().enumerate() {
            assert_eq!(group.len(), 3);
            assert_eq!(group.get("POSITION").unwrap().as_u64(), Some(i as u64 + 1));
        }
    }

    #[test]
    fn test_truncated_fixed_field() {
        let payload = vec![0x02, 0x00];
        let mut schema = odometry(Endianness::Big);
        schema.min_length = 0;
        let result = FieldDecoder::decode_payload(&schema, &payload);
        match result {
            Err(DecoderError::TruncatedField {
                name,
                offset,
                needed,
                available,
            }) => {
                assert_eq!(name, "LEN");
                assert_eq!(offset, 1);
                assert_eq!(needed, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected truncated field, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_dynamic_value() {
        // TIME announces 4 bytes but only 2 follow
        let payload = vec![0x02, 0x00, 0x08, 0x04, 0x11, 0x22];
        let result = FieldDecoder::decode_payload(&odometry(Endianness::Big), &payload);
        assert!(matches!(
            result,
            Err(DecoderError::TruncatedField { ref name, needed: 4, available: 2, .. }) if name == "TIME"
        ));
    }

    #[test]
    fn test_failing_repetition_fails_whole_block() {
        // two groups announced, second one cut short
        let payload = vec![0x02, 0x00, 0x08, 0x00, 0x02, 0x00, 0x0A, 0x17, 0x19, 0x00, 0x0D];
        let result = FieldDecoder::decode_payload(&odometry(Endianness::Big), &payload);
        assert!(matches!(
            result,
            Err(DecoderError::TruncatedField { ref name, offset: 11, .. }) if name == "TILT_X"
        ));
    }

    #[test]
    fn test_nested_blocks_share_cursor() {
        let schema = PacketSchema {
            id: 0x1FA,
            endianness: Endianness::Big,
            min_length: 0,
            max_length: 0,
            fields: vec![block(
                1,
                "OUTER",
                vec![fixed(1, "TAG"), block(1, "INNER", vec![dynamic(1, "BLOB")])],
            )],
        };
        // 2 outer: [TAG=A0, 1 inner: BLOB(2)=BEEF], [TAG=A1, 0 inner]
        let payload = vec![0x02, 0xA0, 0x01, 0x02, 0xBE, 0xEF, 0xA1, 0x00];
        let (fields, warnings) = FieldDecoder::decode_payload(&schema, &payload).unwrap();

        assert!(warnings.is_empty());
        let outer = fields[0].instances().unwrap();
        assert_eq!(outer.len(), 2);
        let inner = outer[0].get("INNER").unwrap().instances().unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].get("BLOB").unwrap().as_u64(), Some(0xBEEF));
        assert_eq!(outer[1].get("TAG").unwrap().as_u64(), Some(0xA1));
        assert!(outer[1].get("INNER").unwrap().instances().unwrap().is_empty());
    }

    #[test]
    fn test_trailing_bytes_warning() {
        let payload = vec![0x01, 0x00, 0x05, 0x00, 0x00, 0xFF, 0xFF];
        let (_, warnings) = FieldDecoder::decode_payload(&odometry(Endianness::Big), &payload).unwrap();
        assert_eq!(warnings, vec![DecodeWarning::TrailingBytes { offset: 5, count: 2 }]);
    }

    #[test]
    fn test_endianness_applies_to_values_and_prefixes() {
        let schema = |endianness| PacketSchema {
            id: 0x1FA,
            endianness,
            min_length: 0,
            max_length: 0,
            fields: vec![
                fixed(2, "WORD"),
                dynamic(2, "DATA"),
                block(2, "ITEMS", vec![fixed(1, "ITEM")]),
            ],
        };
        let big = vec![0x01, 0x02, 0x00, 0x01, 0xAA, 0x00, 0x02, 0xB1, 0xB2];
        let little = vec![0x01, 0x02, 0x01, 0x00, 0xAA, 0x02, 0x00, 0xB1, 0xB2];

        let (big_fields, _) = FieldDecoder::decode_payload(&schema(Endianness::Big), &big).unwrap();
        let (little_fields, _) = FieldDecoder::decode_payload(&schema(Endianness::Little), &little).unwrap();

        assert_eq!(big_fields[0].as_u64(), Some(0x0102));
        assert_eq!(little_fields[0].as_u64(), Some(0x0201));
        assert_eq!(big_fields[1].raw(), little_fields[1].raw());
        assert_eq!(big_fields[2].instances().unwrap().len(), 2);
        assert_eq!(little_fields[2].instances().unwrap().len(), 2);

        // same bytes, opposite order: the prefix read flips too
        let result = FieldDecoder::decode_payload(&schema(Endianness::Little), &big);
        assert!(matches!(
            result,
            Err(DecoderError::TruncatedField { ref name, needed: 256, .. }) if name == "DATA"
        ));
    }

    #[test]
    fn test_read_unsigned() {
        assert_eq!(read_unsigned(&[0x12, 0x34, 0x56], Endianness::Big), Some(0x123456));
        assert_eq!(read_unsigned(&[0x12, 0x34, 0x56], Endianness::Little), Some(0x563412));
        assert_eq!(read_unsigned(&[], Endianness::Big), Some(0));
        assert_eq!(read_unsigned(&[0xFF; 8], Endianness::Little), Some(u64::MAX));
        assert_eq!(read_unsigned(&[0x00; 9], Endianness::Big), None);
    }
}
