//! CAN Packet Decoder CLI Application
//!
//! This is the command-line interface for the CAN packet decoder.
//! It uses the can-packet-decoder library and adds:
//! - Output path conventions (`<trace>.dt`, `<trace>.dt.dp`)
//! - TOML configuration
//! - Per-stage debug log files
//! - End-of-run summaries

use anyhow::{Context, Result};
use can_packet_decoder::{Decoder, DecoderConfig, OutputFormat, PacketDecoder};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod config;
mod logging;
mod report;

use config::AppConfig;
use logging::DebugLog;

/// CAN Packet Decoder - Reassemble and decode CAN sniffer traces
#[derive(Parser, Debug)]
#[command(name = "can-packet-cli")]
#[command(about = "Reassemble CAN sniffer traces and decode packets with a JSON schema", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Only reassemble frames with this identifier (hex, can be repeated)
    #[arg(long = "id", value_name = "HEX", value_parser = parse_hex_id, global = true)]
    ids: Vec<u32>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage 1: reassemble a sniffer trace into a .dt file
    Trace {
        /// Sniffer trace file
        trace: PathBuf,

        /// Output file (default: <TRACE>.dt)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Stage 2: decode a .dt file with a JSON packet schema
    Packet {
        /// Decoded trace file from stage 1
        dt: PathBuf,

        /// JSON packet schema
        schema: PathBuf,

        /// Output file (default: <DT>.dp)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format: txt or json
        #[arg(short, long, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },

    /// Both stages, with a debug log per stage
    Run {
        /// Sniffer trace file
        trace: PathBuf,

        /// JSON packet schema; stage 2 is skipped without one
        schema: Option<PathBuf>,

        /// Output format: txt or json
        #[arg(short, long, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },
}

fn parse_hex_id(text: &str) -> std::result::Result<u32, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid identifier '{}': {}", text, e))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let debug_log = logging::init_logging(args.verbose, args.quiet)?;

    log::info!("CAN Packet Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", can_packet_decoder::VERSION);

    let app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    let decoder_config = app_config.decoder_config(&args.ids);

    match args.command {
        Command::Trace { trace, output } => {
            let output = output.unwrap_or_else(|| app_config.output_path(&trace, "dt"));
            run_trace(&decoder_config, &trace, &output, args.quiet)
        }
        Command::Packet {
            dt,
            schema,
            output,
            format,
        } => {
            let output = output.unwrap_or_else(|| app_config.output_path(&dt, "dp"));
            let format = format.unwrap_or(app_config.output.format);
            run_packet(decoder_config, &dt, &schema, &output, format, args.quiet)
        }
        Command::Run {
            trace,
            schema,
            format,
        } => {
            let format = format.unwrap_or(app_config.output.format);
            let result = run_both(
                &app_config,
                decoder_config,
                &debug_log,
                &trace,
                schema.as_deref(),
                format,
                args.quiet,
            );
            debug_log.close();
            result
        }
    }
}

fn run_trace(config: &DecoderConfig, trace: &Path, output: &Path, quiet: bool) -> Result<()> {
    let decoder = Decoder::new(config.clone());
    let stats = decoder
        .decode_trace_file(trace, output)
        .with_context(|| format!("Failed to decode trace {:?}", trace))?;

    if !quiet {
        print!("{}", report::trace_summary(&stats, output));
    }
    Ok(())
}

fn run_packet(
    config: DecoderConfig,
    dt: &Path,
    schema: &Path,
    output: &Path,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let mut decoder = PacketDecoder::from_schema_file(schema, config)
        .with_context(|| format!("Failed to load schema {:?}", schema))?;
    let stats = decoder
        .decode_dt_file(dt, output, format)
        .with_context(|| format!("Failed to decode packets from {:?}", dt))?;

    if !quiet {
        print!("{}", report::packet_summary(&stats, output));
    }
    Ok(())
}

/// Both stages; the schema is loaded before any frame is read
fn run_both(
    app_config: &AppConfig,
    config: DecoderConfig,
    debug_log: &DebugLog,
    trace: &Path,
    schema: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let packet_decoder = match schema {
        Some(path) => Some(
            PacketDecoder::from_schema_file(path, config.clone())
                .with_context(|| format!("Failed to load schema {:?}", path))?,
        ),
        None => None,
    };

    let dt = app_config.output_path(trace, "dt");
    if app_config.output.debug_logs {
        debug_log.redirect(&app_config.output_path(trace, "dt.log"))?;
    }
    run_trace(&config, trace, &dt, quiet)?;

    let Some(mut packet_decoder) = packet_decoder else {
        log::info!("No schema given, stopping after stage 1");
        return Ok(());
    };

    let dp = app_config.output_path(&dt, "dp");
    if app_config.output.debug_logs {
        debug_log.redirect(&app_config.output_path(&dt, "dp.log"))?;
    }
    let stats = packet_decoder
        .decode_dt_file(&dt, &dp, format)
        .with_context(|| format!("Failed to decode packets from {:?}", dt))?;

    if !quiet {
        print!("{}", report::packet_summary(&stats, &dp));
    }
    Ok(())
}
