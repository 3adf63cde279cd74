//! Push-only sensor emulator
//!
//! Binds a Unix socket and writes newline-delimited JSON to every client that
//! connects. Used by the integration tests and the `sensor-emulator` binary.

use chrono::Local;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One sample reading in the shape the reference sensor produces
pub fn sample_reading() -> Value {
    json!({
        "user": "example_user",
        "time": Local::now().format("%H:%M:%S%.3f").to_string(),
        "meat_type": "beef",
        "doneness": "medium-rare",
        "sear_level": "high",
        "cook_time": 360,
        "rest_time": 180,
        "thickness": 1.5,
    })
}

/// What each accepted client receives
#[derive(Debug, Clone)]
pub enum EmulatorMode {
    /// A fresh sample line every `interval`, until the client goes away
    Samples { interval: Duration },
    /// Client N gets script N written chunk by chunk, then the connection is
    /// closed. Once scripts run out the listener is dropped.
    Scripted {
        scripts: Vec<Vec<Vec<u8>>>,
        chunk_delay: Duration,
    },
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicUsize,
    active: AtomicUsize,
}

/// A running emulator; call [`SensorEmulator::shutdown`] to remove the socket
pub struct SensorEmulator {
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl SensorEmulator {
    /// Bind `path` (removing a stale socket file first) and start serving
    pub async fn bind(path: impl AsRef<Path>, mode: EmulatorMode) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_stale_socket(&path)?;
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Sensor emulator listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(accept_loop(
            listener,
            mode,
            shutdown_rx,
            Arc::clone(&counters),
        ));

        Ok(Self {
            path,
            shutdown_tx,
            handle: Some(handle),
            counters,
        })
    }

    /// Sample readings at a fixed rate (10 Hz in the reference sensor)
    pub async fn samples(path: impl AsRef<Path>, interval: Duration) -> io::Result<Self> {
        Self::bind(path, EmulatorMode::Samples { interval }).await
    }

    /// One script of raw lines per client; each line gets its `\n` appended
    pub async fn scripted_lines(path: impl AsRef<Path>, clients: Vec<Vec<&str>>) -> io::Result<Self> {
        let scripts = clients
            .into_iter()
            .map(|lines| {
                lines
                    .into_iter()
                    .map(|line| format!("{line}\n").into_bytes())
                    .collect()
            })
            .collect();
        Self::bind(
            path,
            EmulatorMode::Scripted {
                scripts,
                chunk_delay: Duration::from_millis(5),
            },
        )
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clients accepted so far
    pub fn accepted_clients(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Clients currently being served
    pub fn active_clients(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Stop serving, disconnect every client and remove the socket file
    pub async fn shutdown(mut self) {
        self.stop().await;
    }

    async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Emulator accept loop ended abnormally");
            }
        }
        if let Err(e) = remove_stale_socket(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove emulator socket");
        }
        info!(path = %self.path.display(), "Sensor emulator shut down");
    }
}

impl Drop for SensorEmulator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn accept_loop(
    listener: UnixListener,
    mode: EmulatorMode,
    mut shutdown_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    let mut scripts: Option<VecDeque<Vec<Vec<u8>>>> = match &mode {
        EmulatorMode::Scripted { scripts, .. } => Some(scripts.iter().cloned().collect()),
        EmulatorMode::Samples { .. } => None,
    };
    let mut clients = Vec::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "Emulator accept failed");
                continue;
            }
        };
        counters.accepted.fetch_add(1, Ordering::SeqCst);

        let job = match (&mode, scripts.as_mut()) {
            (EmulatorMode::Samples { interval }, _) => ClientJob::Samples {
                interval: *interval,
            },
            (EmulatorMode::Scripted { chunk_delay, .. }, Some(queue)) => match queue.pop_front() {
                Some(chunks) => ClientJob::Script {
                    chunks,
                    delay: *chunk_delay,
                },
                None => break,
            },
            (EmulatorMode::Scripted { .. }, None) => break,
        };

        counters.active.fetch_add(1, Ordering::SeqCst);
        clients.push(tokio::spawn(serve_client(
            stream,
            job,
            shutdown_rx.clone(),
            Arc::clone(&counters),
        )));

        if scripts.as_ref().is_some_and(VecDeque::is_empty) {
            debug!("Emulator scripts exhausted, no longer listening");
            break;
        }
    }

    drop(listener);
    for client in clients {
        let _ = client.await;
    }
}

enum ClientJob {
    Samples { interval: Duration },
    Script { chunks: Vec<Vec<u8>>, delay: Duration },
}

async fn serve_client(
    mut stream: UnixStream,
    job: ClientJob,
    mut shutdown_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    let result: io::Result<()> = async {
        match job {
            ClientJob::Samples { interval } => loop {
                let line = format!("{}\n", sample_reading());
                stream.write_all(line.as_bytes()).await?;
                tokio::select! {
                    _ = shutdown_rx.changed() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {}
                }
            },
            ClientJob::Script { chunks, delay } => {
                for chunk in chunks {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                    stream.write_all(&chunk).await?;
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        }
    }
    .await;

    if let Err(e) = result {
        debug!(error = %e, "Emulator client went away");
    }
    let _ = stream.shutdown().await;
    counters.active.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_sample_reading_fields() {
        let sample = sample_reading();
        for field in [
            "user",
            "time",
            "meat_type",
            "doneness",
            "sear_level",
            "cook_time",
            "rest_time",
            "thickness",
        ] {
            assert!(sample.get(field).is_some(), "missing {field}");
        }
        assert_eq!(sample["cook_time"], json!(360));
    }

    #[tokio::test]
    async fn test_scripted_client_then_listener_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emu.sock");
        let emulator = SensorEmulator::scripted_lines(&path, vec![vec!["{\"a\":1}", "{\"a\":2}"]])
            .await
            .unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(emulator.accepted_clients(), 1);

        // The accept loop has dropped the listener
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(UnixStream::connect(&path).await.is_err());

        emulator.shutdown().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        let emulator = SensorEmulator::samples(&path, Duration::from_millis(10))
            .await
            .unwrap();
        let mut client = UnixStream::connect(&path).await.unwrap();
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.contains("\"meat_type\":\"beef\""));

        drop(client);
        emulator.shutdown().await;
        assert!(!path.exists());
    }
}
