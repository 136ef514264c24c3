//! gpg keybox watcher
//!
//! gpg touches `pubring.kbx` and creates `pubring.kbx.lock` around card
//! operations. Any activity on either file is a hint that a touch may be
//! needed; the trigger decides whether it actually is.

use std::path::PathBuf;
use std::time::Duration;

use super::fs::{arm_watch, event_touches, parent_dir, Armed};
use super::trigger::CheckRequester;
use crate::coordinator::ShutdownListener;

/// Watches the gpg keybox and its lock artifact
pub struct GpgWatcher {
    pubring_path: PathBuf,
    lock_path: PathBuf,
    retry_interval: Duration,
    requester: CheckRequester,
}

impl GpgWatcher {
    pub fn new(
        pubring_path: PathBuf,
        lock_path: PathBuf,
        retry_interval: Duration,
        requester: CheckRequester,
    ) -> Self {
        Self {
            pubring_path,
            lock_path,
            retry_interval,
            requester,
        }
    }

    /// Watch until shutdown is requested
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let dir = parent_dir(&self.pubring_path);
        tracing::info!("Watching gpg keybox {}", self.pubring_path.display());

        let ack = 'watch: loop {
            let mut watch = match arm_watch(&dir, self.retry_interval, &mut shutdown).await {
                Armed::Watching(watch) => watch,
                Armed::Shutdown(ack) => break 'watch ack,
            };

            loop {
                tokio::select! {
                    ack = shutdown.requested() => break 'watch ack,
                    event = watch.next() => match event {
                        Some(Ok(event)) => {
                            let targets = [self.pubring_path.as_path(), self.lock_path.as_path()];
                            if event_touches(&event, &targets) && !self.requester.request() {
                                tracing::debug!("GPG check trigger is gone");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!("GPG watch error: {}", e);
                        }
                        None => break,
                    },
                }

                if !watch.is_alive() {
                    tracing::debug!("{} disappeared, re-arming", watch.dir().display());
                    break;
                }
            }
        };

        // Release the requester before confirming
        drop(self);
        tracing::debug!("GPG watcher stopped");
        ack.acknowledge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ExitCoordinator;
    use crate::detector::{GpgCheckTrigger, LockArtifactProbe, TriggerSettings};
    use crate::hub::{NotificationHub, SinkCapacity};
    use std::sync::Arc;
    use td_protocol::{TouchEvent, TouchSource};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_artifact_drives_gpg_events() {
        let dir = TempDir::new().unwrap();
        let pubring = dir.path().join("pubring.kbx");
        let lock = dir.path().join("pubring.kbx.lock");
        std::fs::write(&pubring, b"").unwrap();

        let hub = NotificationHub::new(8);
        let mut sink = hub.sinks().register("test", SinkCapacity::Unlimited);
        let (trigger, requester) = GpgCheckTrigger::new(
            Arc::new(LockArtifactProbe::new(&lock)),
            hub.publisher(),
            TriggerSettings {
                check_delay: Duration::from_millis(10),
                recheck_interval: Duration::from_millis(20),
            },
        );
        tokio::spawn(hub.run());
        let trigger_task = tokio::spawn(trigger.run());

        let coordinator = ExitCoordinator::new();
        let listener = coordinator.register("gpg").await.unwrap();
        let watcher = GpgWatcher::new(pubring, lock.clone(), Duration::from_millis(20), requester);
        let watcher_task = tokio::spawn(watcher.run(listener));

        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&lock, b"").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TouchEvent::started(TouchSource::Gpg));

        // Cleared by the trigger's recheck
        std::fs::remove_file(&lock).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TouchEvent::stopped(TouchSource::Gpg));

        assert_eq!(coordinator.shutdown().await.acknowledged, 1);
        watcher_task.await.unwrap();
        // The watcher held the only requester
        tokio::time::timeout(Duration::from_secs(5), trigger_task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let pubring = dir.path().join("pubring.kbx");
        let lock = dir.path().join("pubring.kbx.lock");

        let hub = NotificationHub::new(8);
        let mut sink = hub.sinks().register("test", SinkCapacity::Unlimited);
        // A probe that always reports pending makes any check visible
        let (trigger, requester) = GpgCheckTrigger::new(
            Arc::new(LockArtifactProbe::new(dir.path())),
            hub.publisher(),
            TriggerSettings {
                check_delay: Duration::from_millis(5),
                recheck_interval: Duration::from_millis(20),
            },
        );
        tokio::spawn(hub.run());
        tokio::spawn(trigger.run());

        let coordinator = ExitCoordinator::new();
        let listener = coordinator.register("gpg").await.unwrap();
        tokio::spawn(GpgWatcher::new(pubring, lock, Duration::from_millis(20), requester).run(listener));

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("trustdb.gpg"), b"").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.try_recv().is_none());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_while_directory_missing() {
        let dir = TempDir::new().unwrap();
        let pubring = dir.path().join("gnupg").join("pubring.kbx");
        let lock = dir.path().join("gnupg").join("pubring.kbx.lock");

        let hub = NotificationHub::new(8);
        let (_trigger, requester) = GpgCheckTrigger::new(
            Arc::new(LockArtifactProbe::new(&lock)),
            hub.publisher(),
            TriggerSettings::default(),
        );

        let coordinator = ExitCoordinator::new();
        let listener = coordinator.register("gpg").await.unwrap();
        let task = tokio::spawn(
            GpgWatcher::new(pubring, lock, Duration::from_millis(10), requester).run(listener),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.shutdown().await.acknowledged, 1);
        task.await.unwrap();
    }
}
