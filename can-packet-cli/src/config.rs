//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_packet_decoder::{DecoderConfig, FrameLayoutKind, OutputFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub reassembly: ReassemblyConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReassemblyConfig {
    #[serde(default)]
    pub layout: FrameLayoutKind,
    /// Identifiers to reassemble; all when absent
    pub message_ids: Option<Vec<u32>>,
    #[serde(default = "default_true")]
    pub decode_truncated: bool,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            layout: FrameLayoutKind::default(),
            message_ids: None,
            decode_truncated: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Directory for generated files; next to the input when absent
    pub output_dir: Option<PathBuf>,
    /// Write per-stage debug logs during `run`
    #[serde(default = "default_true")]
    pub debug_logs: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            output_dir: None,
            debug_logs: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Library configuration, with identifiers from the command line taking precedence
    pub fn decoder_config(&self, message_ids: &[u32]) -> DecoderConfig {
        let mut config = DecoderConfig::new()
            .with_layout(self.reassembly.layout)
            .with_truncated_decoding(self.reassembly.decode_truncated);

        if !message_ids.is_empty() {
            config = config.with_message_filter(message_ids.to_vec());
        } else if let Some(ids) = &self.reassembly.message_ids {
            config = config.with_message_filter(ids.clone());
        }
        config
    }

    /// Path of a generated file: `input` with `extension` appended
    pub fn output_path(&self, input: &Path, extension: &str) -> PathBuf {
        let mut name = input
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(extension);

        match &self.output.output_dir {
            Some(dir) => dir.join(name),
            None => input.with_file_name(name),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
