//! End-to-end tests: simulated ADC, data-ready thread, recorder, session and
//! a real TCP client on loopback.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use acq_daemon::config::DaemonConfig;
use acq_daemon::server::Server;
use adc_sensor::Waveform;
use boards::AdcBackend;
use node_types::REC_ADC_CHUNK;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestDaemon {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestDaemon {
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.server).await.unwrap();
    }
}

/// Sets up a complete, running daemon instance for testing.
async fn setup_test_daemon(dir: &Path) -> TestDaemon {
    let mut config = DaemonConfig::default();
    config.network.bind_address = [127, 0, 0, 1].into();
    config.network.port = 0;
    config.recording.directory = dir.to_path_buf();
    config.recording.stop_timeout_ms = 500;

    let backend = AdcBackend::Simulated {
        waveform: Waveform::Ramp { step: 1 },
        rate_hz: Some(8000),
    };
    let session = acq_daemon::assemble(&config, backend).unwrap();
    let server = Server::bind(&config.network, session).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        server
            .run(async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
    });

    TestDaemon {
        addr,
        stop: Some(stop_tx),
        server,
    }
}

async fn send(stream: &mut TcpStream, command: &str) {
    stream.write_all(command.as_bytes()).await.unwrap();
    // Keep consecutive commands in separate reads on the server side.
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Reads until the retrieve response is complete: either the end marker or
/// a single error line.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    let read = async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed mid-response");
            response.extend_from_slice(&buf[..n]);
            if response.ends_with(b"\n.\n") || response == b".\n" {
                break;
            }
            if response.starts_with(b"ERROR:") && response.ends_with(b"\n") {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for retrieve response");
    String::from_utf8(response).unwrap()
}

fn samples_of(recording: &str) -> Vec<i32> {
    recording
        .lines()
        .filter(|l| !l.is_empty() && *l != ".")
        .map(|l| l.parse().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn record_stop_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "s").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    send(&mut client, "n").await;
    send(&mut client, "r").await;

    let recording = read_response(&mut client).await;
    let samples = samples_of(&recording);
    assert!(
        samples.len() > 2 * REC_ADC_CHUNK,
        "only {} samples",
        samples.len()
    );
    // The simulated ramp advances by one per conversion read.
    assert!(samples.windows(2).all(|w| w[1] == w[0] + 1));

    send(&mut client, "x").await;
    let mut rest = Vec::new();
    tokio_test::assert_ok!(client.read_to_end(&mut rest).await);
    assert!(rest.is_empty());

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retrieve_before_any_recording_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "r").await;
    let response = read_response(&mut client).await;
    assert_eq!(
        response,
        format!(
            "ERROR: File not found or cannot be opened: {}\n",
            dir.path().join("TEST.txt").display()
        )
    );

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_does_not_restart_recording() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "s").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut client, "s").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut client, "n").await;
    send(&mut client, "r").await;

    let samples = samples_of(&read_response(&mut client).await);
    // A restart would have truncated the file to the second interval only.
    assert!(samples.len() > 1000, "only {} samples", samples.len());
    assert!(samples.windows(2).all(|w| w[1] == w[0] + 1));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_while_recording_finishes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;

    {
        let mut client = TcpStream::connect(daemon.addr).await.unwrap();
        send(&mut client, "s").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Dropping the stream closes the connection without 'x'.
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut client = TcpStream::connect(daemon.addr).await.unwrap();
    send(&mut client, "r").await;
    let recording = read_response(&mut client).await;
    assert!(recording.ends_with("\n.\n"));
    assert!(!samples_of(&recording).is_empty());
    assert!(!dir.path().join("TEST.txt.part").exists());

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_tokens_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "hello\n").await;
    send(&mut client, "sn").await;
    send(&mut client, "r\n").await;

    // Neither junk line started a recording, so there is still nothing to send.
    let response = read_response(&mut client).await;
    assert!(response.starts_with("ERROR:"));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_without_recording_keeps_session_open() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "n").await;
    send(&mut client, "s").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&mut client, "n").await;
    send(&mut client, "r").await;
    let recording = read_response(&mut client).await;
    assert!(recording.ends_with(".\n"));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_during_recording_publishes_it() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = setup_test_daemon(dir.path()).await;
    let mut client = TcpStream::connect(daemon.addr).await.unwrap();

    send(&mut client, "s").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    daemon.shutdown().await;

    let contents = std::fs::read_to_string(dir.path().join("TEST.txt")).unwrap();
    assert!(contents.ends_with(".\n"));
    drop(client);
}
