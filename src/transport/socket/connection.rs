//! Unix domain socket connection and endpoint description
//!
//! Connect, read and close, nothing more. Error classification is kept in
//! pure functions so the worker can log a subtype without caring where the
//! `io::Error` came from.

use crate::protocol::{LineFramer, TextEncoding, DEFAULT_MAX_LINE_BYTES};
use crate::transport::{Connection, Connector};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Default number of bytes requested per read
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest number of bytes requested per read (16 MiB)
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Immutable description of the stream endpoint
///
/// Built once per worker; reconfiguration builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Filesystem path of the socket
    pub path: PathBuf,
    /// Maximum bytes per receive
    pub buffer_size: usize,
    /// Text encoding of the stream
    pub encoding: TextEncoding,
    /// Longest line the framer will hold before dropping it
    pub max_line_bytes: usize,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            encoding: TextEncoding::Utf8,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.clamp(1, MAX_BUFFER_SIZE);
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// A fresh framer for one connection to this endpoint
    pub fn framer(&self) -> LineFramer {
        LineFramer::new(self.encoding, self.max_line_bytes)
    }
}

/// Failure to establish a connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("endpoint {} is refusing connections or missing: {source}", .path.display())]
    RefusedOrUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {} timed out after {timeout:?}", .path.display())]
    TimedOut { path: PathBuf, timeout: Duration },
    #[error("connecting to {} failed: {source}", .path.display())]
    Other {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Classify an `io::Error` from a connect attempt (pure function)
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable => ConnectError::RefusedOrUnavailable { path, source },
            _ => ConnectError::Other { path, source },
        }
    }

    /// Short subtype label for structured logs
    pub fn kind_label(&self) -> &'static str {
        match self {
            ConnectError::RefusedOrUnavailable { .. } => "refused_or_unavailable",
            ConnectError::TimedOut { .. } => "timed_out",
            ConnectError::Other { .. } => "other",
        }
    }
}

/// Failure while reading from an open connection
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("connection reset by peer: {0}")]
    Reset(#[source] io::Error),
    #[error("no data received within {0:?}")]
    TimedOut(Duration),
    #[error("connection is not open")]
    NotConnected,
    #[error("receive failed: {0}")]
    Other(#[source] io::Error),
}

impl ReceiveError {
    /// Classify an `io::Error` from a read (pure function)
    pub fn from_io(source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ReceiveError::Reset(source),
            _ => ReceiveError::Other(source),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ReceiveError::Reset(_) => "reset",
            ReceiveError::TimedOut(_) => "timed_out",
            ReceiveError::NotConnected => "not_connected",
            ReceiveError::Other(_) => "other",
        }
    }
}

/// Opens Unix domain stream sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixConnector;

impl UnixConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for UnixConnector {
    type Connection = UnixConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<UnixConnection, ConnectError> {
        let stream = UnixStream::connect(&endpoint.path)
            .await
            .map_err(|e| ConnectError::from_io(&endpoint.path, e))?;
        debug!(path = %endpoint.path.display(), "Unix socket connected");
        Ok(UnixConnection {
            path: endpoint.path.clone(),
            stream: Some(stream),
            buf: BytesMut::new(),
        })
    }
}

/// An open Unix domain stream socket
#[derive(Debug)]
pub struct UnixConnection {
    path: PathBuf,
    stream: Option<UnixStream>,
    /// Read buffer reused across receives
    buf: BytesMut,
}

impl UnixConnection {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Connection for UnixConnection {
    async fn receive(&mut self, max_bytes: usize) -> Result<Bytes, ReceiveError> {
        let stream = self.stream.as_mut().ok_or(ReceiveError::NotConnected)?;

        let limit = max_bytes.clamp(1, MAX_BUFFER_SIZE);
        self.buf.clear();
        self.buf.reserve(limit);
        stream
            .read_buf(&mut (&mut self.buf).limit(limit))
            .await
            .map_err(ReceiveError::from_io)?;
        Ok(self.buf.split().freeze())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; nothing to do about it
            if let Err(e) = stream.shutdown().await {
                debug!(path = %self.path.display(), error = %e, "Socket shutdown reported an error");
            }
            debug!(path = %self.path.display(), "Unix socket closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
