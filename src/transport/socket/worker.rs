//! The reconnect worker
//!
//! One tokio task per active configuration. It connects, streams lines into
//! its [`SharedState`], and on any connect or receive failure closes what it
//! holds, sleeps for the backoff delay and tries again, forever. Only
//! [`ReconnectLoop::stop`] (or dropping the loop) ends it.
//!
//! Every blocking step (connect, receive, backoff sleep) is raced against the
//! shutdown signal, and the signal is checked again after each step returns,
//! so a stop never waits on a peer that has gone quiet.

use super::health_monitor::{
    HealthMonitor, LoopEvent, LoopState, ReconnectPolicy, ReconnectionDecision,
};
use super::line_handler::LineHandler;
use crate::state::{ConnectionStatus, SharedState, StateReader};
use crate::transport::{ConnectError, Connection, Connector, Endpoint, ReceiveError};
use crate::{connection_span, worker_span};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// How long `stop` waits for the worker before aborting it
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Lifecycle misuse of a [`ReconnectLoop`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    #[error("worker is already running")]
    AlreadyStarted,
    #[error("worker was stopped and cannot be restarted")]
    Stopped,
    #[error("invalid reconnect policy: {0}")]
    InvalidPolicy(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Owner of one background worker and the state it publishes
pub struct ReconnectLoop<C: Connector> {
    endpoint: Endpoint,
    connector: Arc<C>,
    policy: ReconnectPolicy,
    state: Arc<SharedState>,
    reader: StateReader,
    loop_state_tx: Option<watch::Sender<LoopState>>,
    loop_state_rx: watch::Receiver<LoopState>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl<C: Connector> ReconnectLoop<C> {
    /// Build an idle loop with a fresh state cell (Disconnected, no record)
    pub fn new(endpoint: Endpoint, connector: Arc<C>, policy: ReconnectPolicy) -> Self {
        let (state, reader) = SharedState::new();
        let (loop_state_tx, loop_state_rx) = watch::channel(LoopState::Idle);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            endpoint,
            connector,
            policy,
            state: Arc::new(state),
            reader,
            loop_state_tx: Some(loop_state_tx),
            loop_state_rx,
            shutdown_tx,
            handle: None,
            stopped: false,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Spawn the worker on the current tokio runtime
    pub fn start(&mut self) -> Result<(), LoopError> {
        if self.stopped {
            return Err(LoopError::Stopped);
        }
        if self.handle.is_some() {
            return Err(LoopError::AlreadyStarted);
        }
        HealthMonitor::validate_policy(&self.policy).map_err(LoopError::InvalidPolicy)?;

        let loop_state_tx = self.loop_state_tx.take().ok_or(LoopError::AlreadyStarted)?;
        let worker = Worker {
            endpoint: self.endpoint.clone(),
            connector: Arc::clone(&self.connector),
            policy: self.policy.clone(),
            state: Arc::clone(&self.state),
            loop_state_tx,
            shutdown_rx: self.shutdown_tx.subscribe(),
            current: LoopState::Idle,
            failed_attempts: 0,
        };

        let span = worker_span!(path = %self.endpoint.path.display());
        self.handle = Some(tokio::spawn(worker.run().instrument(span)));
        info!(path = %self.endpoint.path.display(), "Sensor worker started");
        Ok(())
    }

    /// Stop the worker, close its connection and wait for it to exit
    ///
    /// Safe to call any number of times, before or after `start`.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(STOP_GRACE_PERIOD, &mut handle).await {
                Ok(Ok(())) => debug!("Sensor worker exited"),
                Ok(Err(e)) => warn!(error = %e, "Sensor worker ended abnormally"),
                Err(_) => {
                    warn!("Sensor worker didn't stop within {:?}, aborting", STOP_GRACE_PERIOD);
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        self.state.set_status(ConnectionStatus::Closed);
    }

    /// Current worker state
    pub fn state(&self) -> LoopState {
        if self.stopped {
            return LoopState::Stopped;
        }
        *self.loop_state_rx.borrow()
    }

    /// Watch the worker state as it changes
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.loop_state_rx.clone()
    }

    /// Reader for the state this loop publishes
    pub fn reader(&self) -> StateReader {
        self.reader.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<C: Connector> Drop for ReconnectLoop<C> {
    fn drop(&mut self) {
        // Can't await here; signal and abort so the task doesn't outlive us
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// How a streaming session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    PeerClosed,
    Failed,
    Shutdown,
}

/// State owned by the spawned task
struct Worker<C: Connector> {
    endpoint: Endpoint,
    connector: Arc<C>,
    policy: ReconnectPolicy,
    state: Arc<SharedState>,
    loop_state_tx: watch::Sender<LoopState>,
    shutdown_rx: watch::Receiver<bool>,
    current: LoopState,
    /// Consecutive failures since the last successful connect
    failed_attempts: u32,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        self.transition(LoopEvent::Started);

        loop {
            match self.connect().await {
                None => break,
                Some(Ok(connection)) => {
                    self.failed_attempts = 0;
                    self.transition(LoopEvent::Connected);
                    let span = connection_span!(path = %self.endpoint.path.display());
                    let ended = self.stream(connection).instrument(span).await;
                    if ended == StreamEnd::Shutdown {
                        break;
                    }
                    self.transition(LoopEvent::StreamEnded);
                }
                Some(Err(e)) => {
                    if self.failed_attempts == 0 {
                        warn!(kind = e.kind_label(), error = %e, "Sensor connect failed, retrying");
                    } else {
                        debug!(kind = e.kind_label(), error = %e, attempt = self.failed_attempts + 1, "Sensor connect failed");
                    }
                    self.transition(LoopEvent::ConnectFailed);
                }
            }

            if !self.backoff().await {
                break;
            }
            self.transition(LoopEvent::BackoffElapsed);
        }

        self.transition(LoopEvent::StopRequested);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Apply an event to the state machine and publish the result
    fn transition(&mut self, event: LoopEvent) {
        let next = HealthMonitor::next_state(self.current, &event);
        if next == self.current {
            return;
        }
        HealthMonitor::log_state_transition(self.current, next);
        self.current = next;

        match next {
            LoopState::Connecting => self.state.connect_attempt(),
            LoopState::Streaming => self.state.connection_established(),
            other => {
                self.state.set_status(other.status());
            }
        }
        let _ = self.loop_state_tx.send(next);
    }

    /// One connect attempt; `None` when shutdown won the race
    async fn connect(&mut self) -> Option<Result<C::Connection, ConnectError>> {
        let attempt = with_deadline(
            self.policy.connect_timeout,
            self.connector.connect(&self.endpoint),
        );

        let result = tokio::select! {
            biased;
            _ = shutdown_signalled(self.shutdown_rx.clone()) => return None,
            result = attempt => result,
        };

        let result = result.unwrap_or_else(|timeout| {
            Err(ConnectError::TimedOut {
                path: self.endpoint.path.clone(),
                timeout,
            })
        });

        match result {
            Ok(mut connection) if self.shutdown_requested() => {
                connection.close().await;
                None
            }
            other => Some(other),
        }
    }

    /// Read until the peer goes away, a receive fails or shutdown is signalled.
    /// The connection is always closed on return.
    async fn stream(&mut self, mut connection: C::Connection) -> StreamEnd {
        let mut framer = self.endpoint.framer();
        let buffer_size = self.endpoint.buffer_size;

        let ended = loop {
            let received = tokio::select! {
                biased;
                _ = shutdown_signalled(self.shutdown_rx.clone()) => break StreamEnd::Shutdown,
                received = with_deadline(self.policy.read_timeout, connection.receive(buffer_size)) => received,
            };

            if self.shutdown_requested() {
                break StreamEnd::Shutdown;
            }

            match received.unwrap_or_else(|timeout| Err(ReceiveError::TimedOut(timeout))) {
                Ok(chunk) if chunk.is_empty() => {
                    info!("Sensor peer closed the stream");
                    break StreamEnd::PeerClosed;
                }
                Ok(chunk) => {
                    LineHandler::handle_lines(framer.feed(&chunk), &self.state);
                }
                Err(e) => {
                    warn!(kind = e.kind_label(), error = %e, "Sensor receive failed");
                    break StreamEnd::Failed;
                }
            }
        };

        if !framer.pending().is_empty() {
            debug!(bytes = framer.pending().len(), "Discarding partial line");
        }
        connection.close().await;
        debug!(?ended, "Sensor connection finished");
        ended
    }

    /// Sleep before the next attempt; false when shutdown interrupted it
    async fn backoff(&mut self) -> bool {
        match HealthMonitor::should_attempt_reconnection(
            self.failed_attempts,
            &self.policy,
            self.shutdown_requested(),
        ) {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.failed_attempts = attempt;
                debug!(attempt, delay_ms, "Waiting before reconnect");
                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                !self.shutdown_requested()
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
        }
    }
}

/// Run `operation` under an optional deadline; `Err` carries the deadline
async fn with_deadline<F, T>(deadline: Option<Duration>, operation: F) -> Result<T, Duration>
where
    F: Future<Output = T>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| limit),
        None => Ok(operation.await),
    }
}

/// Resolves once shutdown is signalled or the signalling side is gone
async fn shutdown_signalled(mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep with shutdown monitoring; false when shutdown cut it short
async fn interruptible_sleep(shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_signalled(shutdown_rx) => {
            debug!("Shutdown signal received during reconnect delay");
            false
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
