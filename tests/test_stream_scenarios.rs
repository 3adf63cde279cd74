//! End-to-end scenarios over real Unix domain sockets
//!
//! Each test binds a `SensorEmulator` in a temporary directory and drives a
//! `SensorClient` against it.


use serde_json::json;
use socket_sensor::testing::SensorEmulator;
use socket_sensor::{ConnectionStatus, NoDataError, SensorClient};
use std::time::Duration;
use test_helpers::{socket_path, test_config, WAIT};
use tokio::time::sleep;

#[tokio::test]
async fn test_endpoint_never_available() {
    let (_dir, path) = socket_path("absent.sock");
    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();

    let reader = client.reader().unwrap();
    reader
        .wait_until(|s| s.counters.connect_attempts >= 10, WAIT)
        .await
        .expect("worker keeps retrying");

    let snapshot = reader.read();
    assert_eq!(snapshot.counters.connections, 0);
    assert_ne!(snapshot.status, ConnectionStatus::Connected);
    assert!(matches!(
        client.get_latest_reading(),
        Err(NoDataError::Disconnected { .. })
    ));
    assert!(client.is_running(), "loop never gives up on its own");

    client.shutdown().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_three_lines_then_peer_close() {
    let (_dir, path) = socket_path("three.sock");
    let emulator = SensorEmulator::scripted_lines(
        &path,
        vec![vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]],
    )
    .await
    .unwrap();

    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();
    let reader = client.reader().unwrap();

    // The worker has not been polled yet on this single-threaded runtime.
    // Yielding rather than sleeping lets every status it publishes between
    // its own suspension points be observed.
    let mut statuses = vec![reader.status()];
    let mut published = Vec::new();
    let mut last_sequence = 0;
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = reader.read();
        if statuses.last() != Some(&snapshot.status) {
            statuses.push(snapshot.status);
        }
        assert!(snapshot.sequence >= last_sequence, "sequence regressed");
        if snapshot.sequence != last_sequence {
            let record = snapshot.record.as_ref().unwrap();
            published.push(record.get("n").and_then(|n| n.as_i64()).unwrap());
            last_sequence = snapshot.sequence;
        }
        if snapshot.sequence == 3 && !snapshot.status.is_connected() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out: {statuses:?}");
        tokio::task::yield_now().await;
    }

    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
    assert_eq!(published, vec![1, 2, 3]);

    let retained = client.last_reading().expect("third record is retained");
    assert_eq!(retained.sequence, 3);
    assert_eq!(retained.record.get("n"), Some(&json!(3)));
    assert!(!retained.is_fresh());
    assert!(matches!(
        client.get_latest_reading(),
        Err(NoDataError::Disconnected { .. })
    ));

    client.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn test_serve_stale_returns_retained_record() {
    let (_dir, path) = socket_path("stale.sock");
    let emulator = SensorEmulator::scripted_lines(&path, vec![vec!["{\"temp\":71.5}"]])
        .await
        .unwrap();

    let mut config = test_config(&path);
    config.reporting.serve_stale = true;
    let mut client = SensorClient::new(config).unwrap();
    client.start().unwrap();

    client
        .reader()
        .unwrap()
        .wait_until(|s| s.sequence == 1 && !s.status.is_connected(), WAIT)
        .await
        .unwrap();
    let record = client.get_latest_reading().unwrap();
    assert_eq!(record.get("temp"), Some(&json!(71.5)));

    client.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn test_bad_lines_do_not_stop_the_stream() {
    let (_dir, path) = socket_path("bad.sock");
    let emulator = SensorEmulator::scripted_lines(
        &path,
        vec![vec!["{\"n\":1}", "{not json", "", "[1,2]", "{\"n\":2}"]],
    )
    .await
    .unwrap();

    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();

    let snapshot = client
        .reader()
        .unwrap()
        .wait_until(|s| s.sequence == 2, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.record.unwrap().get("n"), Some(&json!(2)));
    assert_eq!(snapshot.counters.decode_failures, 2);

    client.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn test_sample_stream_from_emulator() {
    let (_dir, path) = socket_path("samples.sock");
    let emulator = SensorEmulator::samples(&path, Duration::from_millis(10))
        .await
        .unwrap();

    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();
    client
        .reader()
        .unwrap()
        .wait_until(|s| s.sequence >= 3, WAIT)
        .await
        .unwrap();

    let record = client.get_latest_reading().unwrap();
    assert_eq!(record.get("meat_type"), Some(&json!("beef")));
    assert_eq!(record.get("cook_time"), Some(&json!(360)));

    let health = client.health().unwrap();
    assert!(health.metrics.is_healthy);
    assert_eq!(health.metrics.reconnect_count, 0);

    client.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_when_emulator_comes_back() {
    let (_dir, path) = socket_path("restart.sock");
    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();
    let reader = client.reader().unwrap();

    reader
        .wait_until(|s| s.counters.connect_attempts >= 2, WAIT)
        .await
        .unwrap();

    let emulator = SensorEmulator::samples(&path, Duration::from_millis(10))
        .await
        .unwrap();
    reader
        .wait_until(|s| s.status.is_connected() && s.sequence >= 1, WAIT)
        .await
        .unwrap();

    client.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn test_reconfigure_while_streaming() {
    let (_dir_a, path_a) = socket_path("a.sock");
    let (_dir_b, path_b) = socket_path("b.sock");
    let emulator_a = SensorEmulator::samples(&path_a, Duration::from_millis(10))
        .await
        .unwrap();
    let emulator_b = SensorEmulator::samples(&path_b, Duration::from_millis(10))
        .await
        .unwrap();

    let mut client = SensorClient::new(test_config(&path_a)).unwrap();
    client.start().unwrap();
    client
        .reader()
        .unwrap()
        .wait_until(|s| s.sequence >= 2, WAIT)
        .await
        .unwrap();
    assert_eq!(emulator_b.accepted_clients(), 0);

    client.reconfigure(test_config(&path_b)).await.unwrap();

    // Fresh state for the new worker
    let reader = client.reader().unwrap();
    reader
        .wait_until(|s| s.status.is_connected() && s.sequence >= 1, WAIT)
        .await
        .unwrap();
    assert_eq!(emulator_b.accepted_clients(), 1);
    assert_eq!(emulator_a.accepted_clients(), 1);

    // The old connection was closed; emulator A notices on its next write
    let deadline = tokio::time::Instant::now() + WAIT;
    while emulator_a.active_clients() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "old connection still open");
        sleep(Duration::from_millis(5)).await;
    }

    client.shutdown().await;
    emulator_a.shutdown().await;
    emulator_b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_on_other_threads_during_stream() {
    let (_dir, path) = socket_path("threads.sock");
    let emulator = SensorEmulator::samples(&path, Duration::from_millis(2))
        .await
        .unwrap();

    let mut client = SensorClient::new(test_config(&path)).unwrap();
    client.start().unwrap();
    let reader = client.reader().unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let reader = reader.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..500 {
                    let sequence = reader.read().sequence;
                    assert!(sequence >= last, "sequence went backwards");
                    last = sequence;
                    std::thread::sleep(Duration::from_micros(200));
                }
                last
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    client.shutdown().await;
    emulator.shutdown().await;
}
