//! Logging setup
//!
//! Console output goes through `env_logger` at the level picked by `-v`/`-q`.
//! A debug log file can be attached while a stage runs: every record at Debug
//! or above is copied into it independently of the console level.

use anyhow::{Context, Result};
use env_logger::Builder;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const FILE_LEVEL: LevelFilter = LevelFilter::Debug;

type SharedFile = Arc<Mutex<Option<LineWriter<File>>>>;

/// Handle for switching the debug log file
#[derive(Clone)]
pub struct DebugLog {
    file: SharedFile,
}

impl DebugLog {
    /// Handle not attached to any logger
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Start copying records into `path`, replacing any open log file
    pub fn redirect(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file: {:?}", path))?;
        if let Ok(mut guard) = self.file.lock() {
            if let Some(mut previous) = guard.replace(LineWriter::new(file)) {
                let _ = previous.flush();
            }
        }
        Ok(())
    }

    /// Stop copying records and flush the open log file
    pub fn close(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(mut previous) = guard.take() {
                let _ = previous.flush();
            }
        }
    }
}

struct TeeLogger {
    console: env_logger::Logger,
    file: SharedFile,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata) || metadata.level() <= FILE_LEVEL
    }

    fn log(&self, record: &Record) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if record.level() <= FILE_LEVEL {
            if let Ok(mut guard) = self.file.lock() {
                if let Some(file) = guard.as_mut() {
                    let _ = writeln!(
                        file,
                        "[{} {}] {}",
                        record.level(),
                        record.target(),
                        record.args()
                    );
                }
            }
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Initialize logging based on verbosity level
pub fn init_logging(verbose: u8, quiet: bool) -> Result<DebugLog> {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let console = Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .build();

    let file: SharedFile = Arc::new(Mutex::new(None));
    let logger = TeeLogger {
        console,
        file: Arc::clone(&file),
    };

    log::set_boxed_logger(Box::new(logger)).context("Logger already initialized")?;
    log::set_max_level(level.max(FILE_LEVEL));

    Ok(DebugLog { file })
}
