//! Decoder configuration types
//!
//! This module defines the minimal configuration needed by the decoder library.
//! Output paths, verbosity and file handling belong to the application layer.

use serde::{Deserialize, Serialize};

/// Configuration for the decoder library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// How frame payloads are split into control byte and data
    #[serde(default)]
    pub layout: FrameLayoutKind,

    /// Optional: only reassemble frames with these identifiers
    #[serde(default)]
    pub message_filter: Option<Vec<u32>>,

    /// Whether stage 2 decodes messages the reassembler flagged truncated
    #[serde(default = "default_true")]
    pub decode_truncated: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            layout: FrameLayoutKind::default(),
            message_filter: None,
            decode_truncated: true,
        }
    }
}

/// Frame classification strategy used by the reassembler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameLayoutKind {
    /// Leading control byte with command specifier, sequence number and byte count
    #[default]
    Segmented,
    /// Every frame is a complete message
    Unsegmented,
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: select the frame layout
    pub fn with_layout(mut self, layout: FrameLayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Builder method: set message filter
    pub fn with_message_filter(mut self, messages: Vec<u32>) -> Self {
        self.message_filter = Some(messages);
        self
    }

    /// Builder method: decode or reject truncated messages in stage 2
    pub fn with_truncated_decoding(mut self, enabled: bool) -> Self {
        self.decode_truncated = enabled;
        self
    }

    /// Check if a message ID should be processed
    pub fn should_process_message(&self, can_id: u32) -> bool {
        match &self.message_filter {
            Some(messages) => messages.contains(&can_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_layout(FrameLayoutKind::Unsegmented)
            .with_message_filter(vec![0x374, 0x1FA])
            .with_truncated_decoding(false);

        assert_eq!(config.layout, FrameLayoutKind::Unsegmented);
        assert_eq!(config.message_filter, Some(vec![0x374, 0x1FA]));
        assert!(!config.decode_truncated);
    }

    #[test]
    fn test_filter_logic() {
        let config = DecoderConfig::new().with_message_filter(vec![0x123, 0x456]);

        assert!(config.should_process_message(0x123));
        assert!(config.should_process_message(0x456));
        assert!(!config.should_process_message(0x789));
    }

    #[test]
    fn test_no_filters() {
        let config = DecoderConfig::new();

        assert!(config.should_process_message(0x123));
        assert!(config.should_process_message(0x1FFF_FFFF));
        assert!(config.decode_truncated);
        assert_eq!(config.layout, FrameLayoutKind::Segmented);
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: DecoderConfig = serde_json::from_str(r#"{"layout": "unsegmented"}"#).unwrap();
        assert_eq!(config.layout, FrameLayoutKind::Unsegmented);
        assert!(config.decode_truncated);
        assert!(config.message_filter.is_none());
    }
}
