//! GPG touch probes
//!
//! A probe answers one question: is a GPG operation waiting for a touch
//! right now? The trigger never looks at gpg itself, which keeps the
//! heuristic swappable and lets tests drive the trigger with fakes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// "Is a GPG touch pending?" predicate
#[async_trait]
pub trait TouchProbe: Send + Sync {
    /// Evaluate the predicate once
    async fn touch_pending(&self) -> bool;
}

/// Pending while gpg holds the keybox lock file
///
/// gpg-agent keeps `pubring.kbx.lock` while a card operation is in flight,
/// which covers the time spent waiting for the touch.
#[derive(Debug, Clone)]
pub struct LockArtifactProbe {
    path: PathBuf,
}

impl LockArtifactProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TouchProbe for LockArtifactProbe {
    async fn touch_pending(&self) -> bool {
        match tokio::fs::try_exists(&self.path).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::debug!("Cannot stat {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

/// Pending while `gpg --card-status` cannot finish
///
/// The card answers status queries immediately unless it is busy waiting
/// for a touch, in which case the query blocks until `timeout`.
#[derive(Debug, Clone)]
pub struct CardStatusProbe {
    program: String,
    timeout: Duration,
}

impl CardStatusProbe {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TouchProbe for CardStatusProbe {
    async fn touch_pending(&self) -> bool {
        let child = Command::new(&self.program)
            .args(["--no-tty", "--card-status"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", self.program, e);
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(_status)) => false,
            Ok(Err(e)) => {
                tracing::debug!("Waiting for {} failed: {}", self.program, e);
                false
            }
            // Still blocked on the card; kill_on_drop reaps it
            Err(_) => true,
        }
    }
}
