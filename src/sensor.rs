//! Caller-facing sensor client
//!
//! [`SensorClient`] owns at most one [`ReconnectLoop`] and answers reads from
//! the state that loop publishes. No read ever touches the socket.
//!
//! ```rust,no_run
//! use socket_sensor::{SensorClient, SensorConfig};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = SensorConfig::load_from_file(Path::new("sensor.toml"))?;
//! let mut client = SensorClient::new(config)?;
//! client.start()?;
//!
//! match client.get_latest_reading() {
//!     Ok(record) => println!("{}", record.to_json_string()),
//!     Err(e) => println!("nothing yet: {e}"),
//! }
//! client.shutdown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use crate::config::{ConfigError, SensorConfig};
use crate::protocol::Record;
use crate::state::{ConnectionStatus, Reading, StateReader};
use crate::transport::socket::{
    ConnectionQuality, HealthMetrics, HealthMonitor, LoopError, LoopState, ReconnectLoop,
    UnixConnector,
};
use crate::transport::Connector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Why there is no reading to hand out right now
///
/// An expected, transient condition; callers should simply try again later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoDataError {
    #[error("sensor client is not running")]
    NotStarted,
    #[error("no reading received yet")]
    NoReadingYet,
    #[error("sensor connection is {status}")]
    Disconnected { status: ConnectionStatus },
}

/// Health figures plus the derived quality grade
#[derive(Debug, Clone, PartialEq)]
pub struct SensorHealth {
    pub metrics: HealthMetrics,
    pub quality: ConnectionQuality,
}

/// Background Unix-socket sensor client
pub struct SensorClient<C: Connector = UnixConnector> {
    config: SensorConfig,
    connector: Arc<C>,
    worker: Option<ReconnectLoop<C>>,
}

impl SensorClient<UnixConnector> {
    /// Client for a real Unix domain socket; not started yet
    pub fn new(config: SensorConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config, UnixConnector::new())
    }
}

impl<C: Connector> SensorClient<C> {
    /// Client using a custom connector; not started yet
    pub fn with_connector(config: SensorConfig, connector: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            connector: Arc::new(connector),
            worker: None,
        })
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Build a loop for the current configuration and start it
    pub fn start(&mut self) -> Result<(), LoopError> {
        if self.worker.is_some() {
            return Err(LoopError::AlreadyStarted);
        }
        let endpoint = self
            .config
            .endpoint()
            .map_err(|e| LoopError::InvalidEndpoint(e.to_string()))?;

        let mut worker = ReconnectLoop::new(endpoint, Arc::clone(&self.connector), self.config.policy());
        worker.start()?;
        info!(
            sensor = %self.config.sensor.name,
            path = %self.config.socket.endpoint_path.display(),
            "Sensor client started"
        );
        self.worker = Some(worker);
        Ok(())
    }

    /// Latest record, or why there is none
    ///
    /// Fails while the connection is down unless `reporting.serve_stale` is
    /// set; use [`SensorClient::last_reading`] to see retained data anyway.
    pub fn get_latest_reading(&self) -> Result<Record, NoDataError> {
        self.latest_reading()
            .map(|reading| Record::clone(&reading.record))
    }

    /// Same rules as [`SensorClient::get_latest_reading`], but the record
    /// comes with the sequence number and timestamp from the same snapshot
    pub fn latest_reading(&self) -> Result<Reading, NoDataError> {
        let reader = self.reader().ok_or(NoDataError::NotStarted)?;
        let snapshot = reader.read();

        if !snapshot.status.is_connected() && !self.config.reporting.serve_stale {
            debug!(status = %snapshot.status, "No fresh reading while disconnected");
            return Err(NoDataError::Disconnected {
                status: snapshot.status,
            });
        }

        snapshot.reading().ok_or_else(|| {
            debug!("No reading received yet");
            NoDataError::NoReadingYet
        })
    }

    /// Retained record with its status, sequence number and receive time,
    /// whatever the connection state
    pub fn last_reading(&self) -> Option<Reading> {
        self.reader()?.reading()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.reader()
            .map_or(ConnectionStatus::Disconnected, |reader| reader.status())
    }

    /// Worker state, `Idle` when no worker exists
    pub fn loop_state(&self) -> LoopState {
        self.worker.as_ref().map_or(LoopState::Idle, ReconnectLoop::state)
    }

    /// Reader for the running worker's state
    pub fn reader(&self) -> Option<StateReader> {
        self.worker.as_ref().map(ReconnectLoop::reader)
    }

    /// Health of the current connection
    pub fn health(&self) -> Option<SensorHealth> {
        let snapshot = self.reader()?.read();
        let stale_after = self
            .config
            .policy()
            .read_timeout
            .unwrap_or(Duration::from_secs(30));
        let metrics = HealthMonitor::calculate_health_metrics(&snapshot, Instant::now(), stale_after);
        let quality = HealthMonitor::assess_connection_quality(&metrics);
        Some(SensorHealth { metrics, quality })
    }

    /// Switch to a new configuration
    ///
    /// The old worker is fully stopped, and its connection closed, before the
    /// new one makes its first connect attempt. The new worker starts with a
    /// fresh state: Disconnected, no record. If the new configuration is
    /// invalid nothing changes.
    pub async fn reconfigure(&mut self, config: SensorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint()?;

        if let Some(mut old) = self.worker.take() {
            old.stop().await;
            debug!(path = %old.endpoint().path.display(), "Previous sensor worker joined");
        }

        info!(
            sensor = %config.sensor.name,
            path = %endpoint.path.display(),
            "Reconfiguring sensor client"
        );
        self.config = config;

        let mut worker = ReconnectLoop::new(endpoint, Arc::clone(&self.connector), self.config.policy());
        worker
            .start()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the worker and release the connection; safe to call repeatedly
    pub async fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop().await;
            info!(sensor = %self.config.sensor.name, "Sensor client shut down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(ReconnectLoop::is_running)
    }
}
