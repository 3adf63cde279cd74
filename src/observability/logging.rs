//! Structured logging using the tracing crate
//!
//! The worker emits one event per connect attempt, failure, state transition
//! and dropped line; everything else is at debug or trace. Output goes to
//! stderr so stdout stays free for readings.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty or compact (default json)
//! - `LOG_SPANS`: emit span open/close events (true/false, default false)
//! - `RUST_LOG`: full filter override in env_logger syntax
//!
//! ```bash
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG socket-sensor run --config sensor.toml
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event (machine-readable)
    Json,
    /// Multi-line output with colors
    Pretty,
    /// Single-line output with colors
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Only a literal "true" (any case) enables a flag
pub fn parse_flag(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

/// Build the filter for `level`, or take `RUST_LOG` verbatim when it is set
fn build_filter(level: Level, rust_log: Option<String>) -> EnvFilter {
    if let Some(spec) = rust_log {
        return EnvFilter::new(spec);
    }

    let mut filter = EnvFilter::new(level.to_string());
    for noisy in ["tokio=warn", "mio=warn"] {
        if let Ok(directive) = noisy.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
///
/// Installing a second global subscriber is a no-op, so tests and embedding
/// hosts may call this freely.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = build_filter(level, env::var("RUST_LOG").ok());
    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans);
}

/// Span covering the lifetime of one socket worker
#[macro_export]
macro_rules! worker_span {
    ($($field:tt)*) => {
        tracing::info_span!("sensor_worker", $($field)*)
    };
}

/// Span covering one established connection
#[macro_export]
macro_rules! connection_span {
    ($($field:tt)*) => {
        tracing::info_span!("sensor_connection", $($field)*)
    };
}

pub use {connection_span, worker_span};
