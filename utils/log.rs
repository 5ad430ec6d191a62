//! Console logger for Ferroswitch
//!
//! A `log::Log` backend for environments without stdout: each record is
//! formatted into a bounded line and handed to a platform console sink.
//! No allocation; lines longer than [`LINE_CAPACITY`] are truncated.

use core::fmt::Write;

use heapless::String;
use log::{LevelFilter, Metadata, Record};

use crate::{Error, Result};

/// Maximum length of one formatted log line
pub const LINE_CAPACITY: usize = 256;

/// Platform console output
pub trait ConsoleSink: Sync {
    /// Emit one complete line (without trailing newline)
    fn write_line(&self, line: &str);
}

/// Logger that writes formatted lines to a [`ConsoleSink`]
pub struct ConsoleLogger {
    sink: &'static dyn ConsoleSink,
}

impl ConsoleLogger {
    /// Create a logger for `sink`; usable in a `static`
    pub const fn new(sink: &'static dyn ConsoleSink) -> Self {
        Self { sink }
    }

    /// Format a record as `[LEVEL] target: message`
    pub fn format_line(record: &Record<'_>) -> String<LINE_CAPACITY> {
        let mut line = String::new();
        // A full buffer only truncates the line
        let _ = write!(line, "[{:<5}] {}: {}", record.level(), record.target(), record.args());
        line
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let line = Self::format_line(record);
            self.sink.write_line(&line);
        }
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger and set the level
///
/// Idempotent: when `logger` is already installed only the level changes.
/// Fails if some other logger got installed first.
pub fn init(logger: &'static ConsoleLogger, level: LevelFilter) -> Result<()> {
    if log::set_logger(logger).is_err() {
        let installed = log::logger() as *const dyn log::Log as *const ();
        if installed != logger as *const ConsoleLogger as *const () {
            return Err(Error::LoggerConflict);
        }
    }

    log::set_max_level(level);
    Ok(())
}
