//! Socket Sensor
//!
//! A background client for sensors that push newline-delimited JSON over a
//! Unix domain socket.
//!
//! # Overview
//!
//! - [`protocol`] - line framing and JSON record decoding, no I/O
//! - [`transport`] - the connector seam and the Unix socket worker with its
//!   reconnect state machine
//! - [`state`] - the single-writer, many-reader latest-value cell
//! - [`sensor`] - [`SensorClient`], the facade callers use
//! - [`config`] - TOML and attribute-map configuration
//!
//! # Quick Start
//!
//! ```rust
//! use socket_sensor::protocol::{LineFramer, RecordDecoder};
//! use serde_json::json;
//!
//! let mut framer = LineFramer::default();
//! assert!(framer.feed(b"{\"temp\":").is_empty());
//!
//! let lines = framer.feed(b"61}\n");
//! let line = lines.into_iter().next().unwrap().unwrap();
//! let record = RecordDecoder::decode(&line).unwrap();
//! assert_eq!(record.get("temp"), Some(&json!(61)));
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod state;
pub mod testing;
pub mod transport;

pub use config::{validate_attributes, ConfigError, SensorConfig};
pub use error::{SensorError, SensorResult};
pub use protocol::{DecodeError, FramingError, LineFramer, Record, RecordDecoder, TextEncoding};
pub use sensor::{NoDataError, SensorClient, SensorHealth};
pub use state::{ConnectionStatus, Reading, SharedState, StateReader, StateSnapshot};
pub use transport::socket::{Endpoint, LoopState, ReconnectLoop, ReconnectPolicy, UnixConnector};
