//! GPG check trigger
//!
//! The GPG and SSH watchers only know that something happened near gpg;
//! they ask the trigger to check. The trigger is a single task, so checks
//! never overlap, and its request queue holds one entry, so a burst of
//! requests while a check is queued collapses into that one check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use td_protocol::{TouchEvent, TouchSource};

use super::probe::TouchProbe;
use crate::hub::EventPublisher;

/// Handle for asking the trigger to re-evaluate the GPG state
#[derive(Clone)]
pub struct CheckRequester {
    tx: mpsc::Sender<()>,
}

impl CheckRequester {
    /// Queue a check. Returns `false` if the trigger has exited.
    ///
    /// A request made while another is already queued is absorbed by it.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::trace!("GPG check already queued");
                true
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Trigger timing
#[derive(Debug, Clone, Copy)]
pub struct TriggerSettings {
    /// Delay between a request and the check, letting gpg reach the card
    pub check_delay: Duration,
    /// Re-check period while a touch is pending
    pub recheck_interval: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            check_delay: Duration::from_millis(200),
            recheck_interval: Duration::from_millis(500),
        }
    }
}

/// Serialized evaluator of the GPG touch state
pub struct GpgCheckTrigger {
    probe: Arc<dyn TouchProbe>,
    publisher: EventPublisher,
    settings: TriggerSettings,
    requests: mpsc::Receiver<()>,
    waiting: bool,
}

impl GpgCheckTrigger {
    /// Create the trigger and the first requester handle
    pub fn new(
        probe: Arc<dyn TouchProbe>,
        publisher: EventPublisher,
        settings: TriggerSettings,
    ) -> (Self, CheckRequester) {
        let (tx, requests) = mpsc::channel(1);
        let trigger = Self {
            probe,
            publisher,
            settings,
            requests,
            waiting: false,
        };
        (trigger, CheckRequester { tx })
    }

    /// Serve requests until every requester is dropped
    pub async fn run(mut self) {
        while self.requests.recv().await.is_some() {
            tokio::time::sleep(self.settings.check_delay).await;
            self.check().await;

            // Follow a pending touch until it resolves. Requests arriving
            // meanwhile only shorten the wait.
            while self.waiting {
                tokio::select! {
                    request = self.requests.recv() => {
                        if request.is_none() {
                            self.publish(false).await;
                            tracing::debug!("GPG check trigger stopped");
                            return;
                        }
                        tokio::time::sleep(self.settings.check_delay).await;
                    }
                    _ = tokio::time::sleep(self.settings.recheck_interval) => {}
                }
                self.check().await;
            }
        }

        self.publish(false).await;
        tracing::debug!("GPG check trigger stopped");
    }

    async fn check(&mut self) {
        let pending = self.probe.touch_pending().await;
        self.publish(pending).await;
    }

    /// Publish `waiting` if it differs from the last published state
    async fn publish(&mut self, waiting: bool) {
        if waiting == self.waiting {
            return;
        }
        self.waiting = waiting;

        if self
            .publisher
            .publish(TouchEvent::new(TouchSource::Gpg, waiting))
            .await
            .is_err()
        {
            tracing::debug!("Hub closed, dropping GPG event");
        }
    }
}
