//! # Logger
//!
//! Log records go to two places: the operator's console, which only shows `Info` and above so
//! that per-send debug records don't drown out status changes, and the session log file, which
//! keeps everything down to the requested level. Console tags are coloured, file lines are plain.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use std::fmt::Arguments;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise logging for this execution.
///
/// `min_level` applies to the session log file and must be `Info` or more
/// verbose. The console never shows anything below `Info`.
///
/// Must only be called once per process.
pub fn logger_init(min_level: LevelFilter, session: &session::Session) -> Result<(), LoggerInitError> {
    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file =
        fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileInitError)?;

    let console = fern::Dispatch::new()
        .level(LevelFilter::Info)
        .format(|out, message, record| {
            out.finish(format_args!("{}", format_line(colored_tag(record.level()), message, record)))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("{}", format_line(plain_tag(record.level()), message, record)))
        })
        .chain(log_file);

    fern::Dispatch::new()
        .level(min_level)
        .level_for("zmq", LevelFilter::Info)
        .chain(console)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    if let Ok(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    File log level: {:?}", min_level);
    info!("    Log file: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// `[<elapsed s> <tag>] <message>`, with the target added for debug and trace records.
fn format_line<T: std::fmt::Display>(tag: T, message: &Arguments, record: &Record) -> String {
    let elapsed = session::get_elapsed_seconds();

    if record.level() > Level::Info {
        format!("[{:10.6} {}] {}: {}", elapsed, tag, record.target(), message)
    } else {
        format!("[{:10.6} {}] {}", elapsed, tag, message)
    }
}

fn plain_tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info => "INF",
        Level::Warn => "WRN",
        Level::Error => "ERR",
    }
}

fn colored_tag(level: Level) -> ColoredString {
    let tag = plain_tag(level);

    match level {
        Level::Trace => tag.dimmed().italic(),
        Level::Debug => tag.dimmed(),
        Level::Info => tag.normal(),
        Level::Warn => tag.yellow(),
        Level::Error => tag.red().bold(),
    }
}
