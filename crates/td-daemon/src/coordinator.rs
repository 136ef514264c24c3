//! Exit coordinator for cooperative shutdown
//!
//! Every long-running watcher registers a named handle with the
//! `ExitCoordinator` before it starts. On SIGINT/SIGTERM the coordinator
//! walks the registry in registration order, asks each watcher to stop and
//! waits for that watcher's acknowledgment before moving on.
//!
//! # Lifecycle
//!
//! ```text
//! Running --signal--> ShuttingDown --all acked--> Stopped
//! ```
//!
//! The stop request is a one-shot carrying the acknowledgment channel, so a
//! handle can only ever be signaled once and a watcher can only acknowledge
//! once (`ShutdownAck::acknowledge` consumes the ack).

use std::fmt;

use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Accepting registrations
    Running,
    /// Stopping watchers one by one
    ShuttingDown,
    /// Every registered watcher has finished
    Stopped,
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Running => write!(f, "running"),
            ExitState::ShuttingDown => write!(f, "shutting down"),
            ExitState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registration errors
#[derive(Error, Debug)]
pub enum ExitError {
    /// A watcher with this name is already registered
    #[error("Watcher already registered: {0}")]
    Duplicate(String),

    /// Registration attempted after shutdown began
    #[error("Cannot register {name}: coordinator is {state}")]
    NotRunning { name: String, state: ExitState },
}

/// Registry entry owned by the coordinator
struct WatcherHandle {
    name: String,
    stop_tx: oneshot::Sender<oneshot::Sender<()>>,
}

/// Watcher side of a registration
///
/// Await [`ShutdownListener::requested`] alongside the watcher's external
/// signal; once it resolves, release resources and call
/// [`ShutdownAck::acknowledge`] as the very last step.
pub struct ShutdownListener {
    name: String,
    stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
}

impl ShutdownListener {
    /// Name this watcher was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the coordinator asks this watcher to stop.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` loop. Must not be
    /// awaited again after it has resolved.
    pub async fn requested(&mut self) -> ShutdownAck {
        let ack_tx = (&mut self.stop_rx).await.ok();
        ShutdownAck {
            name: self.name.clone(),
            ack_tx,
        }
    }
}

/// Pending acknowledgment of a stop request
#[must_use = "the coordinator waits until the watcher acknowledges"]
pub struct ShutdownAck {
    name: String,
    /// `None` when the coordinator itself went away
    ack_tx: Option<oneshot::Sender<()>>,
}

impl ShutdownAck {
    /// Confirm the watcher has released its resources
    pub fn acknowledge(self) {
        tracing::debug!("Watcher {} acknowledged shutdown", self.name);
        if let Some(ack_tx) = self.ack_tx {
            let _ = ack_tx.send(());
        }
    }
}

/// Summary of a completed shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Watchers that acknowledged
    pub acknowledged: usize,
    /// Watchers that had already exited before being signaled
    pub already_stopped: usize,
    /// Watchers that dropped their ack without sending it
    pub abandoned: usize,
}

/// Owns the watcher registry and drives the shutdown sequence
pub struct ExitCoordinator {
    /// Registered handles, in registration order
    handles: Mutex<Vec<WatcherHandle>>,
    /// Current lifecycle state; changed only while `handles` is locked
    state: watch::Sender<ExitState>,
}

impl ExitCoordinator {
    /// Create a coordinator in the `Running` state
    pub fn new() -> Self {
        let (state, _) = watch::channel(ExitState::Running);
        Self {
            handles: Mutex::new(Vec::new()),
            state,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExitState {
        *self.state.borrow()
    }

    /// Number of registered, not yet signaled watchers
    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Whether no watcher is registered
    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }

    /// Register a watcher under a unique name.
    ///
    /// Rejected once shutdown has begun, so a watcher that fails to
    /// register must not be started.
    pub async fn register(&self, name: impl Into<String>) -> Result<ShutdownListener, ExitError> {
        let name = name.into();
        let mut handles = self.handles.lock().await;

        let state = self.state();
        if state != ExitState::Running {
            return Err(ExitError::NotRunning { name, state });
        }
        if handles.iter().any(|h| h.name == name) {
            return Err(ExitError::Duplicate(name));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        handles.push(WatcherHandle {
            name: name.clone(),
            stop_tx,
        });
        tracing::debug!("Registered watcher {}", name);

        Ok(ShutdownListener { name, stop_rx })
    }

    /// Stop every registered watcher, one at a time, in registration order.
    ///
    /// Only the first call performs the shutdown; concurrent or later calls
    /// wait for it to reach `Stopped` and return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let drained = {
            let mut handles = self.handles.lock().await;
            if self.state() == ExitState::Running {
                self.state.send_replace(ExitState::ShuttingDown);
                Some(std::mem::take(&mut *handles))
            } else {
                None
            }
        };

        let Some(handles) = drained else {
            self.stopped().await;
            return ShutdownReport::default();
        };

        tracing::info!("Stopping {} watchers", handles.len());
        let mut report = ShutdownReport::default();

        for handle in handles {
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle.stop_tx.send(ack_tx).is_err() {
                tracing::debug!("Watcher {} had already stopped", handle.name);
                report.already_stopped += 1;
                continue;
            }

            tracing::debug!("Waiting for watcher {} to stop", handle.name);
            match ack_rx.await {
                Ok(()) => report.acknowledged += 1,
                Err(_) => {
                    tracing::warn!(
                        "Watcher {} dropped its shutdown handle without acknowledging",
                        handle.name
                    );
                    report.abandoned += 1;
                }
            }
        }

        self.state.send_replace(ExitState::Stopped);
        tracing::debug!("All watchers stopped: {:?}", report);
        report
    }

    /// Wait until the coordinator reaches `Stopped`
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this cannot fail while borrowed
        let _ = state.wait_for(|s| *s == ExitState::Stopped).await;
    }
}

impl Default for ExitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on the first SIGINT or SIGTERM
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        Ok(())
    }
}
