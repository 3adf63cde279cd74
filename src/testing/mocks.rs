//! Mock transport for testing
//!
//! [`ScriptedConnector`] hands out connections that replay a fixed script of
//! chunks, errors and hangs, and records every connect and close so tests can
//! check ordering (for instance that an old endpoint was closed before a new
//! one was dialled).

use crate::transport::{ConnectError, Connection, Connector, Endpoint, ReceiveError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One scripted receive outcome
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver these bytes
    Data(Vec<u8>),
    /// Fail the receive with this I/O error kind
    Fail(io::ErrorKind),
    /// Block until the receive is cancelled
    Hang,
}

/// Something the connector observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(PathBuf),
    Refused(PathBuf),
    Closed(PathBuf),
}

/// Connector that replays one script per successful connect
///
/// Once every script has been used, further connects are refused. A
/// connection whose script runs out reports a peer close.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            events: Arc::default(),
        }
    }

    /// Connector whose endpoint never comes up
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Queue another connection script
    pub async fn push_script(&self, script: Vec<Step>) {
        self.scripts.lock().await.push_back(script);
    }

    pub async fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().await.clone()
    }

    /// Connections opened and not yet closed
    pub async fn open_connections(&self) -> usize {
        let events = self.events.lock().await;
        let opened = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Connected(_)))
            .count();
        let closed = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Closed(_)))
            .count();
        opened - closed
    }

    pub async fn refused_attempts(&self) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Refused(_)))
            .count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<ScriptedConnection, ConnectError> {
        let script = self.scripts.lock().await.pop_front();
        let mut events = self.events.lock().await;
        match script {
            Some(steps) => {
                events.push(ConnectionEvent::Connected(endpoint.path.clone()));
                Ok(ScriptedConnection {
                    path: endpoint.path.clone(),
                    steps: steps.into(),
                    events: Arc::clone(&self.events),
                    open: true,
                })
            }
            None => {
                events.push(ConnectionEvent::Refused(endpoint.path.clone()));
                Err(ConnectError::from_io(
                    &endpoint.path,
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                ))
            }
        }
    }
}

/// Connection replaying a script
#[derive(Debug)]
pub struct ScriptedConnection {
    path: PathBuf,
    steps: VecDeque<Step>,
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
    open: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn receive(&mut self, max_bytes: usize) -> Result<Bytes, ReceiveError> {
        if !self.open {
            return Err(ReceiveError::NotConnected);
        }
        match self.steps.pop_front() {
            None => Ok(Bytes::new()),
            Some(Step::Data(mut data)) => {
                // Honour the chunk size like a real socket would
                if data.len() > max_bytes {
                    let rest = data.split_off(max_bytes);
                    self.steps.push_front(Step::Data(rest));
                }
                Ok(Bytes::from(data))
            }
            Some(Step::Fail(kind)) => Err(ReceiveError::from_io(io::Error::from(kind))),
            Some(Step::Hang) => {
                self.steps.push_front(Step::Hang);
                std::future::pending::<()>().await;
                Ok(Bytes::new())
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.events
                .lock()
                .await
                .push(ConnectionEvent::Closed(self.path.clone()));
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
