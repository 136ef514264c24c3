//! pam-u2f lock file watcher
//!
//! pam-u2f creates its lock file when it starts waiting for a touch and
//! removes it once the touch happened (or timed out). The watcher turns the
//! file's existence into `U2F` events, publishing only on change.

use std::path::PathBuf;
use std::time::Duration;

use td_protocol::{TouchEvent, TouchSource};

use super::fs::{arm_watch, event_touches, parent_dir, Armed};
use crate::coordinator::ShutdownListener;
use crate::hub::EventPublisher;

/// Watches the pam-u2f lock file
pub struct U2fWatcher {
    lock_path: PathBuf,
    retry_interval: Duration,
    publisher: EventPublisher,
    waiting: bool,
}

impl U2fWatcher {
    /// Create a watcher for `lock_path`
    pub fn new(lock_path: PathBuf, retry_interval: Duration, publisher: EventPublisher) -> Self {
        Self {
            lock_path,
            retry_interval,
            publisher,
            waiting: false,
        }
    }

    /// Watch until shutdown is requested
    pub async fn run(mut self, mut shutdown: ShutdownListener) {
        let dir = parent_dir(&self.lock_path);
        tracing::info!("Watching U2F lock file {}", self.lock_path.display());

        let ack = 'watch: loop {
            let mut watch = match arm_watch(&dir, self.retry_interval, &mut shutdown).await {
                Armed::Watching(watch) => watch,
                Armed::Shutdown(ack) => break 'watch ack,
            };

            // The file may have changed while nothing was watching
            self.sync().await;

            loop {
                tokio::select! {
                    ack = shutdown.requested() => break 'watch ack,
                    event = watch.next() => match event {
                        Some(Ok(event)) => {
                            if event_touches(&event, &[self.lock_path.as_path()]) {
                                self.sync().await;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!("U2F watch error: {}", e);
                        }
                        None => break,
                    },
                }

                if !watch.is_alive() {
                    tracing::debug!("{} disappeared, re-arming", watch.dir().display());
                    break;
                }
            }

            self.sync().await;
        };

        // Release the publisher before confirming
        drop(self);
        tracing::debug!("U2F watcher stopped");
        ack.acknowledge();
    }

    /// Publish the lock file's state if it changed
    async fn sync(&mut self) {
        let exists = tokio::fs::try_exists(&self.lock_path)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("Cannot stat {}: {}", self.lock_path.display(), e);
                false
            });

        if exists == self.waiting {
            return;
        }
        self.waiting = exists;

        if self
            .publisher
            .publish(TouchEvent::new(TouchSource::U2f, exists))
            .await
            .is_err()
        {
            tracing::debug!("Hub closed, dropping U2F event");
        }
    }
}
