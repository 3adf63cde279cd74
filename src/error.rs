//! Crate-level error type
//!
//! Each module owns a focused error enum; [`SensorError`] gathers them for
//! callers (the CLI, mostly) that only want one type to propagate with `?`.

use thiserror::Error;

/// Longest excerpt of an offending line that ends up in a log record
pub const LOG_EXCERPT_CHARS: usize = 200;

/// Main error type for the sensor client
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] crate::transport::ConnectError),

    #[error("Receive error: {0}")]
    Receive(#[from] crate::transport::ReceiveError),

    #[error("No data: {0}")]
    NoData(#[from] crate::sensor::NoDataError),

    #[error("Worker error: {0}")]
    Worker(#[from] crate::transport::socket::LoopError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used by the binaries
pub type SensorResult<T> = Result<T, SensorError>;

/// Cut `text` to at most `max_chars` characters for logging
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... ({} bytes total)", &text[..cut], text.len()),
        None => text.to_string(),
    }
}
