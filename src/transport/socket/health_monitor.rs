//! Pure reconnection and health logic for the socket worker
//!
//! This module contains the reconnect state machine's transition table, the
//! backoff policy, and health assessment. Nothing here performs I/O, so every
//! decision the worker makes can be tested in isolation.

use crate::state::{ConnectionStatus, StateSnapshot};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default constant retry interval
pub const DEFAULT_BACKOFF_MS: u64 = 100;
/// Default deadline for a single connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default deadline for a single receive
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Escalating delays in milliseconds for the first attempts (empty = constant)
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay_ms: u64,
    /// Deadline for one connect attempt (None = wait as long as the OS does)
    pub connect_timeout: Option<Duration>,
    /// Deadline for one receive (None = a half-open peer blocks forever)
    pub read_timeout: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff_pattern: Vec::new(),
            sustained_delay_ms: DEFAULT_BACKOFF_MS,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl ReconnectPolicy {
    /// Constant-interval policy without deadlines
    pub fn constant(delay_ms: u64) -> Self {
        Self {
            backoff_pattern: Vec::new(),
            sustained_delay_ms: delay_ms,
            connect_timeout: None,
            read_timeout: None,
        }
    }

    /// Backoff delay before the given (1-based) retry attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay_ms)
    }
}

/// States of the reconnect worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not started
    Idle,
    /// A connect attempt is in flight
    Connecting,
    /// Connected and reading
    Streaming,
    /// Waiting before the next connect attempt
    Backoff,
    /// Terminal; only reached through an explicit stop
    Stopped,
}

impl LoopState {
    /// Status readers should see while the worker is in this state
    pub fn status(&self) -> ConnectionStatus {
        match self {
            LoopState::Idle | LoopState::Backoff => ConnectionStatus::Disconnected,
            LoopState::Connecting => ConnectionStatus::Connecting,
            LoopState::Streaming => ConnectionStatus::Connected,
            LoopState::Stopped => ConnectionStatus::Closed,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopState::Idle => "idle",
            LoopState::Connecting => "connecting",
            LoopState::Streaming => "streaming",
            LoopState::Backoff => "backoff",
            LoopState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Events that drive the worker between states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Started,
    Connected,
    ConnectFailed,
    StreamEnded,
    BackoffElapsed,
    StopRequested,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Health metrics for the sensor connection
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    pub status: ConnectionStatus,
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Time since the last record was published
    pub time_since_last_record: Option<Duration>,
    /// Connections established after the first one
    pub reconnect_count: u64,
    pub records: u64,
    pub decode_failures: u64,
    pub framing_failures: u64,
    /// Overall health status
    pub is_healthy: bool,
}

/// Connection quality assessment
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionQuality {
    /// Stable connection with recent records
    Excellent,
    /// Stable connection, a few reconnects
    Good,
    /// Working but reconnecting regularly
    Fair,
    /// Frequent reconnects
    Poor,
    /// Not delivering data
    Critical,
}

/// Pure reconnection, transition and health logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Transition table of the reconnect worker (pure function)
    ///
    /// Stop wins from every state and `Stopped` absorbs everything. Events
    /// that do not apply to the current state leave it unchanged.
    pub fn next_state(current: LoopState, event: &LoopEvent) -> LoopState {
        match (current, event) {
            (LoopState::Stopped, _) => LoopState::Stopped,
            (_, LoopEvent::StopRequested) => LoopState::Stopped,
            (LoopState::Idle, LoopEvent::Started) => LoopState::Connecting,
            (LoopState::Connecting, LoopEvent::Connected) => LoopState::Streaming,
            (LoopState::Connecting, LoopEvent::ConnectFailed) => LoopState::Backoff,
            (LoopState::Streaming, LoopEvent::StreamEnded) => LoopState::Backoff,
            (LoopState::Backoff, LoopEvent::BackoffElapsed) => LoopState::Connecting,
            (state, event) => {
                debug!(state = %state, event = ?event, "Ignoring event not valid in current state");
                state
            }
        }
    }

    /// Determine if reconnection should be attempted (pure function)
    ///
    /// There is no attempt cap: only shutdown ends the retry cycle.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        policy: &ReconnectPolicy,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: policy.calculate_backoff_delay(attempt),
        }
    }

    /// Log a worker state transition
    pub fn log_state_transition(from: LoopState, to: LoopState) {
        match (from, to) {
            (LoopState::Connecting, LoopState::Streaming) => {
                info!("Sensor socket connected, streaming readings");
            }
            (LoopState::Streaming, LoopState::Backoff) => {
                warn!("Sensor stream ended, will reconnect");
            }
            (_, LoopState::Stopped) => {
                info!(from = %from, "Sensor worker stopped");
            }
            _ => {
                debug!("Sensor worker state: {} -> {}", from, to);
            }
        }
    }

    /// Calculate health metrics from a state snapshot (pure function)
    pub fn calculate_health_metrics(
        snapshot: &StateSnapshot,
        now: Instant,
        stale_after: Duration,
    ) -> HealthMetrics {
        let uptime = snapshot
            .connected_since
            .map(|t| now.saturating_duration_since(t));
        let time_since_last_record = snapshot
            .last_record_at
            .map(|t| now.saturating_duration_since(t));

        HealthMetrics {
            status: snapshot.status,
            uptime,
            time_since_last_record,
            reconnect_count: snapshot.counters.connections.saturating_sub(1),
            records: snapshot.counters.records,
            decode_failures: snapshot.counters.decode_failures,
            framing_failures: snapshot.counters.framing_failures,
            is_healthy: Self::determine_health_status(
                snapshot.status,
                uptime,
                time_since_last_record,
                stale_after,
            ),
        }
    }

    /// Healthy while connected and either still waiting for the first
    /// record of this connection or receiving within `stale_after`
    fn determine_health_status(
        status: ConnectionStatus,
        uptime: Option<Duration>,
        time_since_last_record: Option<Duration>,
        stale_after: Duration,
    ) -> bool {
        if !status.is_connected() {
            return false;
        }
        match (uptime, time_since_last_record) {
            (Some(_), None) => true,
            (Some(up), Some(last)) => last < stale_after || up < stale_after,
            _ => false,
        }
    }

    /// Assess connection quality based on metrics (pure function)
    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.reconnect_count, metrics.uptime) {
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=2, Some(_)) => ConnectionQuality::Fair,
            (3..=5, _) => ConnectionQuality::Fair,
            (6..=10, _) => ConnectionQuality::Poor,
            _ => ConnectionQuality::Critical,
        }
    }

    /// Validate a reconnect policy (pure function)
    pub fn validate_policy(policy: &ReconnectPolicy) -> Result<(), String> {
        if policy.sustained_delay_ms == 0 {
            return Err("sustained_delay_ms must be greater than 0".to_string());
        }
        if policy.backoff_pattern.iter().any(|&d| d == 0) {
            return Err("backoff_pattern_ms entries must be greater than 0".to_string());
        }
        if policy.connect_timeout == Some(Duration::ZERO) || policy.read_timeout == Some(Duration::ZERO)
        {
            return Err("timeouts must be positive; use None to disable".to_string());
        }
        Ok(())
    }
}
