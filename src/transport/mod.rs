//! Transport layer for the sensor stream
//!
//! This module provides the transport abstraction the reconnect worker drives
//! and the Unix domain socket implementation of it.

use async_trait::async_trait;
use bytes::Bytes;

pub mod socket;

pub use socket::{ConnectError, Endpoint, ReceiveError};

/// Opens connections to an endpoint
///
/// Implementations hold no per-connection state and perform no retries; the
/// worker decides when to call again.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Establish a stream to `endpoint`
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection, ConnectError>;
}

/// One open stream, exclusively owned by the worker
#[async_trait]
pub trait Connection: Send + 'static {
    /// Read up to `max_bytes`. An empty chunk means the peer closed the stream.
    async fn receive(&mut self, max_bytes: usize) -> Result<Bytes, ReceiveError>;

    /// Release the stream. Calling it again is a no-op.
    async fn close(&mut self);

    /// Whether `close` has not been called yet
    fn is_open(&self) -> bool;
}

