//! Daemon wiring
//!
//! Builds the hub, the sinks, the GPG check trigger and the watchers from a
//! [`DetectorConfig`], registers every watcher with the exit coordinator
//! and tears it all down again in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use td_core::config::GpgProbeKind;
use td_core::{ConfigError, DetectorConfig};

use crate::coordinator::{wait_for_signal, ExitCoordinator, ExitError, ShutdownReport};
use crate::detector::{
    CardStatusProbe, GpgCheckTrigger, GpgWatcher, LockArtifactProbe, SshWatcher,
    TouchProbe, TriggerSettings, U2fWatcher,
};
use crate::hub::{NotificationHub, SinkRegistry};
use crate::sink::{spawn_diagnostic_sink, BroadcastSink, SinkError};

/// Startup errors
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Exit(#[from] ExitError),
}

/// A running detector daemon
pub struct Daemon {
    coordinator: ExitCoordinator,
    registry: Arc<SinkRegistry>,
    socket_path: Option<PathBuf>,
    watchers: Vec<JoinHandle<()>>,
    trigger: Option<JoinHandle<()>>,
    hub: JoinHandle<()>,
    diagnostic: JoinHandle<()>,
}

impl Daemon {
    /// Start every enabled component.
    ///
    /// Fails if the configuration is invalid or the broadcast socket cannot
    /// be bound; nothing is left running in that case.
    pub async fn start(config: &DetectorConfig) -> Result<Self, DaemonError> {
        config.validate()?;

        let hub = NotificationHub::new(config.hub.capacity);
        let registry = hub.sinks();

        // Bound before anything is spawned so a failure leaves no tasks behind
        let broadcast = if config.socket.enabled {
            Some(BroadcastSink::bind(
                &config.socket.path,
                config.socket.format,
                config.socket.client_buffer,
                Arc::clone(&registry),
            )?)
        } else {
            None
        };
        let socket_path = broadcast.as_ref().map(|sink| sink.path().to_path_buf());

        let diagnostic = spawn_diagnostic_sink(&registry);

        let ssh_upstream = if config.ssh.enabled {
            if config.ssh.upstream_socket.is_none() {
                tracing::warn!("SSH_AUTH_SOCK is not set, SSH detection disabled");
            }
            config.ssh.upstream_socket.clone()
        } else {
            None
        };

        let (trigger, requester) = if config.gpg.enabled || ssh_upstream.is_some() {
            let (trigger, requester) = GpgCheckTrigger::new(
                gpg_probe(config, ssh_upstream.is_some()),
                hub.publisher(),
                TriggerSettings {
                    check_delay: config.gpg.check_delay,
                    recheck_interval: config.gpg.recheck_interval,
                },
            );
            (Some(tokio::spawn(trigger.run())), Some(requester))
        } else {
            (None, None)
        };

        let coordinator = ExitCoordinator::new();
        let mut watchers = Vec::new();

        if config.u2f.enabled {
            let watcher = U2fWatcher::new(
                config.u2f.lock_path.clone(),
                config.u2f.retry_interval,
                hub.publisher(),
            );
            let listener = coordinator.register("u2f").await?;
            watchers.push(tokio::spawn(watcher.run(listener)));
        }

        if config.gpg.enabled {
            if let Some(requester) = &requester {
                let watcher = GpgWatcher::new(
                    config.gpg.pubring_path.clone(),
                    config.gpg.lock_path(),
                    config.gpg.retry_interval,
                    requester.clone(),
                );
                let listener = coordinator.register("gpg").await?;
                watchers.push(tokio::spawn(watcher.run(listener)));
            }
        }

        if let (Some(upstream), Some(requester)) = (ssh_upstream, &requester) {
            let watcher = SshWatcher::new(
                config.ssh.proxy_socket.clone(),
                upstream,
                requester.clone(),
            );
            let listener = coordinator.register("ssh").await?;
            watchers.push(tokio::spawn(watcher.run(listener)));
        }

        if let Some(sink) = broadcast {
            let listener = coordinator.register("socket").await?;
            watchers.push(tokio::spawn(sink.run(listener)));
        }

        // Watchers now hold the only requesters and publishers, so the
        // trigger and the hub end once the watchers do
        drop(requester);
        let hub = tokio::spawn(hub.run());

        tracing::info!("Touch detector started with {} watchers", watchers.len());
        Ok(Self {
            coordinator,
            registry,
            socket_path,
            watchers,
            trigger,
            hub,
            diagnostic,
        })
    }

    /// Exit coordinator owning the watcher handles
    pub fn coordinator(&self) -> &ExitCoordinator {
        &self.coordinator
    }

    /// Registry of the hub's sinks
    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    /// Broadcast socket path, if the broadcast sink is enabled
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Wait for SIGINT or SIGTERM, then shut down
    pub async fn run_until_signal(self) -> std::io::Result<ShutdownReport> {
        wait_for_signal().await?;
        Ok(self.shutdown().await)
    }

    /// Stop every watcher in registration order, then drain the hub
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self.coordinator.shutdown().await;

        for watcher in self.watchers {
            if let Err(e) = watcher.await {
                tracing::warn!("Watcher task failed: {}", e);
            }
        }
        if let Some(trigger) = self.trigger {
            if let Err(e) = trigger.await {
                tracing::warn!("GPG check trigger failed: {}", e);
            }
        }
        if let Err(e) = self.hub.await {
            tracing::warn!("Notification hub failed: {}", e);
        }

        // Every event has been fanned out; let the diagnostic sink finish
        self.registry.clear();
        if let Err(e) = self.diagnostic.await {
            tracing::warn!("Diagnostic sink failed: {}", e);
        }

        tracing::info!("Touch detector stopped");
        report
    }
}

fn gpg_probe(config: &DetectorConfig, ssh_active: bool) -> Arc<dyn TouchProbe> {
    let kind = resolve_probe(config.gpg.probe, ssh_active);
    tracing::debug!("GPG touch probe: {:?}", kind);
    match kind {
        GpgProbeKind::CardStatus => Arc::new(CardStatusProbe::new(
            config.gpg.program.clone(),
            config.gpg.card_status_timeout,
        )),
        GpgProbeKind::Lock | GpgProbeKind::Auto => {
            Arc::new(LockArtifactProbe::new(config.gpg.lock_path()))
        }
    }
}

/// SSH sign requests never create the keybox lock, so `auto` only picks
/// the lock heuristic when no SSH requests can arrive
fn resolve_probe(kind: GpgProbeKind, ssh_active: bool) -> GpgProbeKind {
    match kind {
        GpgProbeKind::Auto if ssh_active => GpgProbeKind::CardStatus,
        GpgProbeKind::Auto => GpgProbeKind::Lock,
        other => other,
    }
}
