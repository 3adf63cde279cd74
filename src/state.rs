//! Latest-value hand-off between the socket worker and readers
//!
//! The worker is the only writer. It owns a [`SharedState`] and publishes
//! status changes and freshly decoded records into a `tokio::sync::watch`
//! cell. Any number of [`StateReader`] clones, on any thread, read the cell
//! without touching the socket. Each write replaces the whole
//! [`StateSnapshot`] under one short lock, so a reader sees a status and the
//! record that went with it, never a half-published record.

use crate::protocol::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Connection status as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected; a retry may be pending
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Streaming from the endpoint; the record is fresh
    Connected,
    /// The worker has stopped for good
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Running totals kept by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounters {
    pub connect_attempts: u64,
    pub connections: u64,
    pub records: u64,
    pub decode_failures: u64,
    pub framing_failures: u64,
}

/// Everything a reader can observe, published atomically
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub status: ConnectionStatus,
    /// Last successfully decoded record, kept across disconnects
    pub record: Option<Arc<Record>>,
    /// Sequence number of `record`; 0 while no record exists
    pub sequence: u64,
    /// Wall-clock time `record` was published
    pub received_at: Option<DateTime<Utc>>,
    /// Set while connected
    pub connected_since: Option<Instant>,
    pub last_record_at: Option<Instant>,
    pub counters: StreamCounters,
}

impl StateSnapshot {
    fn initial() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            record: None,
            sequence: 0,
            received_at: None,
            connected_since: None,
            last_record_at: None,
            counters: StreamCounters::default(),
        }
    }

    /// The retained record together with its freshness metadata
    pub fn reading(&self) -> Option<Reading> {
        let record = self.record.clone()?;
        Some(Reading {
            record,
            status: self.status,
            sequence: self.sequence,
            received_at: self.received_at,
        })
    }
}

/// A record as handed to callers, tagged with the status at read time
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub record: Arc<Record>,
    pub status: ConnectionStatus,
    pub sequence: u64,
    pub received_at: Option<DateTime<Utc>>,
}

impl Reading {
    /// False once the connection that produced the record has gone away
    pub fn is_fresh(&self) -> bool {
        self.status.is_connected()
    }
}

/// Write half, owned by the worker
#[derive(Debug)]
pub struct SharedState {
    tx: watch::Sender<StateSnapshot>,
}

impl SharedState {
    /// Create a fresh cell: Disconnected, no record
    pub fn new() -> (Self, StateReader) {
        let (tx, rx) = watch::channel(StateSnapshot::initial());
        (Self { tx }, StateReader { rx })
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.tx.borrow().status
    }

    /// Set the status; returns false if it was already `status`
    pub fn set_status(&self, status: ConnectionStatus) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.status == status {
                return false;
            }
            snapshot.status = status;
            if !status.is_connected() {
                snapshot.connected_since = None;
            }
            true
        })
    }

    pub fn connect_attempt(&self) {
        self.tx.send_modify(|snapshot| {
            snapshot.status = ConnectionStatus::Connecting;
            snapshot.counters.connect_attempts += 1;
        });
    }

    pub fn connection_established(&self) {
        self.tx.send_modify(|snapshot| {
            snapshot.status = ConnectionStatus::Connected;
            snapshot.connected_since = Some(Instant::now());
            snapshot.counters.connections += 1;
        });
    }

    /// Replace the retained record; returns its sequence number
    pub fn publish_record(&self, record: Record) -> u64 {
        let record = Arc::new(record);
        let mut sequence = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.sequence += 1;
            snapshot.record = Some(record);
            snapshot.received_at = Some(Utc::now());
            snapshot.last_record_at = Some(Instant::now());
            snapshot.counters.records += 1;
            sequence = snapshot.sequence;
        });
        sequence
    }

    pub fn record_decode_failure(&self) {
        self.tx
            .send_modify(|snapshot| snapshot.counters.decode_failures += 1);
    }

    pub fn record_framing_failure(&self) {
        self.tx
            .send_modify(|snapshot| snapshot.counters.framing_failures += 1);
    }
}

/// Why [`StateReader::wait_until`] gave up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("condition not met within {0:?}")]
    TimedOut(Duration),
    #[error("state writer dropped before condition was met")]
    WriterGone,
}

/// Read half; cheap to clone and usable from any thread
#[derive(Debug, Clone)]
pub struct StateReader {
    rx: watch::Receiver<StateSnapshot>,
}

impl StateReader {
    /// Copy of the current snapshot
    pub fn read(&self) -> StateSnapshot {
        self.rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.rx.borrow().status
    }

    pub fn reading(&self) -> Option<Reading> {
        self.rx.borrow().reading()
    }

    /// Wait until `condition` holds for the published snapshot
    pub async fn wait_until<F>(
        &self,
        mut condition: F,
        timeout: Duration,
    ) -> Result<StateSnapshot, WaitError>
    where
        F: FnMut(&StateSnapshot) -> bool,
    {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if condition(&*snapshot) {
                        return Ok((*snapshot).clone());
                    }
                }
                if rx.changed().await.is_err() {
                    let snapshot = rx.borrow();
                    return if condition(&*snapshot) {
                        Ok((*snapshot).clone())
                    } else {
                        Err(WaitError::WriterGone)
                    };
                }
            }
        })
        .await;

        waited.unwrap_or(Err(WaitError::TimedOut(timeout)))
    }
}
