//! Daemon integration tests
//!
//! Runs the full daemon against temporary directories and subscribes to
//! its broadcast socket like a desktop notifier would.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing_test::traced_test;

use td_core::DetectorConfig;
use td_daemon::Daemon;
use td_protocol::{TouchEvent, TouchEventCodec, TouchSource, WireFormat};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(dir: &Path) -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.u2f.lock_path = dir.join("pam-u2f-touch");
    config.u2f.retry_interval = Duration::from_millis(20);
    config.gpg.pubring_path = dir.join("gnupg").join("pubring.kbx");
    config.gpg.retry_interval = Duration::from_millis(20);
    config.gpg.check_delay = Duration::from_millis(10);
    config.gpg.recheck_interval = Duration::from_millis(20);
    config.ssh.enabled = false;
    config.socket.path = dir.join("touch-detector.socket");
    config
}

/// Connect and wait until the daemon has registered the subscriber
async fn subscribe(daemon: &Daemon) -> UnixStream {
    let before = daemon.sinks().len();
    let path = daemon.socket_path().expect("broadcast socket enabled");
    let stream = UnixStream::connect(path).await.expect("connect to daemon");

    for _ in 0..100 {
        if daemon.sinks().len() > before {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber was never registered");
}

/// Let the watchers arm their filesystem watches
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
#[traced_test]
async fn test_u2f_touch_reaches_subscriber() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let daemon = Daemon::start(&config).await.unwrap();

    let client = subscribe(&daemon).await;
    let mut lines = BufReader::new(client).lines();
    settle().await;

    std::fs::write(&config.u2f.lock_path, b"").unwrap();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("U2F 1"));

    std::fs::remove_file(&config.u2f.lock_path).unwrap();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("U2F 0"));

    let report = daemon.shutdown().await;
    assert_eq!(report.acknowledged, 3);
    assert_eq!(report.abandoned, 0);

    // Shutdown waits for the diagnostic sink to drain
    assert!(logs_contain("U2F operation is waiting for a touch"));
    assert!(logs_contain("U2F operation no longer waiting for a touch"));
}

#[tokio::test]
async fn test_gpg_lock_reaches_subscriber() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir(dir.path().join("gnupg")).unwrap();
    let daemon = Daemon::start(&config).await.unwrap();

    let client = subscribe(&daemon).await;
    let mut lines = BufReader::new(client).lines();
    settle().await;

    std::fs::write(config.gpg.lock_path(), b"").unwrap();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("GPG 1"));

    std::fs::remove_file(config.gpg.lock_path()).unwrap();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("GPG 0"));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_json_subscribers_each_receive_events() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.socket.format = WireFormat::Json;
    let daemon = Daemon::start(&config).await.unwrap();

    let first = subscribe(&daemon).await;
    let second = subscribe(&daemon).await;
    let mut first = FramedRead::new(first, TouchEventCodec::new(WireFormat::Json));
    let mut second = FramedRead::new(second, TouchEventCodec::new(WireFormat::Json));
    settle().await;

    std::fs::write(&config.u2f.lock_path, b"").unwrap();

    let expected = TouchEvent::started(TouchSource::U2f);
    let event = timeout(WAIT, first.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(event, expected);
    let event = timeout(WAIT, second.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(event, expected);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_late_subscriber_sees_only_new_events() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let daemon = Daemon::start(&config).await.unwrap();
    settle().await;

    // Nobody is listening; the daemon must not block
    std::fs::write(&config.u2f.lock_path, b"").unwrap();
    settle().await;

    let client = subscribe(&daemon).await;
    let mut lines = BufReader::new(client).lines();

    std::fs::remove_file(&config.u2f.lock_path).unwrap();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("U2F 0"));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_subscribers_and_removes_socket() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let daemon = Daemon::start(&config).await.unwrap();

    let client = subscribe(&daemon).await;
    let mut lines = BufReader::new(client).lines();

    let report = timeout(WAIT, daemon.shutdown()).await.unwrap();
    assert_eq!(report.acknowledged, 3);
    assert!(!config.socket.path.exists());

    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line, None);
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    // A crashed instance leaves its socket file behind
    drop(std::os::unix::net::UnixListener::bind(&config.socket.path).unwrap());

    let daemon = Daemon::start(&config).await.unwrap();
    let _client = subscribe(&daemon).await;
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_second_instance_fails_to_start() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    let daemon = Daemon::start(&config).await.unwrap();
    assert!(Daemon::start(&config).await.is_err());
    // The running instance keeps its socket
    assert!(config.socket.path.exists());

    daemon.shutdown().await;
}
