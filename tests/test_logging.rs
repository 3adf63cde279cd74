//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that turn environment
//! variable values into logging settings.

use socket_sensor::observability::logging::{parse_flag, parse_level, LogFormat};
use socket_sensor::observability::{init_logging, worker_span};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("jSoN"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PrEtTy"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
    assert_eq!(LogFormat::parse("123"), LogFormat::Json);
}

#[test]
fn test_log_level_from_env_value() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("TRACE"), Level::TRACE);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
fn test_log_spans_flag() {
    assert!(parse_flag("true"));
    assert!(!parse_flag("on"));
}

#[test]
fn test_spans_work_with_subscriber_installed() {
    init_logging(Level::DEBUG, LogFormat::Compact, true);
    let span = worker_span!(path = "/tmp/test.sock");
    let _guard = span.enter();
    tracing::info!("inside worker span");
}
