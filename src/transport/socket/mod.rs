//! Unix domain socket client for the sensor stream
//!
//! The module is split into four focused sub-modules:
//!
//! - [`connection`] - endpoint description, connect/receive/close and error classification
//! - [`line_handler`] - pure routing of framed lines into the shared state
//! - [`health_monitor`] - pure state machine, backoff policy and health assessment
//! - [`worker`] - the background task that ties them together
//!
//! # Usage
//!
//! ```rust,no_run
//! use socket_sensor::transport::socket::{Endpoint, ReconnectLoop, ReconnectPolicy, UnixConnector};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let endpoint = Endpoint::new("/tmp/sensor.sock");
//! let mut worker = ReconnectLoop::new(endpoint, Arc::new(UnixConnector::new()), ReconnectPolicy::default());
//! worker.start()?;
//!
//! let reader = worker.reader();
//! if let Some(reading) = reader.reading() {
//!     println!("{}", reading.record.to_json_string());
//! }
//! worker.stop().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod health_monitor;
pub mod line_handler;
pub mod worker;

pub use connection::{
    ConnectError, Endpoint, ReceiveError, UnixConnection, UnixConnector, DEFAULT_BUFFER_SIZE,
    MAX_BUFFER_SIZE,
};
pub use health_monitor::{
    ConnectionQuality, HealthMetrics, HealthMonitor, LoopEvent, LoopState, ReconnectPolicy,
    ReconnectionDecision,
};
pub use line_handler::{LineHandler, LineRoute};
pub use worker::{LoopError, ReconnectLoop};
