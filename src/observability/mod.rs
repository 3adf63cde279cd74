//! Observability for the sensor client
//!
//! Structured logging setup and the span macros used by the socket worker.
//! Health figures live next to the worker in
//! [`crate::transport::socket::health_monitor`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, worker_span};
