//! Touch detectors
//!
//! Each detector is an independent task watching one external signal:
//!
//! - [`U2fWatcher`]: the pam-u2f lock file, publishes `U2F` events directly
//! - [`GpgWatcher`]: the gpg keybox, asks the [`GpgCheckTrigger`] to check
//! - [`SshWatcher`]: sign requests relayed to the SSH agent, also asks the
//!   trigger, since the token behind the agent is the one gpg uses
//!
//! The trigger is the single place deciding whether a GPG touch is pending,
//! through a [`TouchProbe`].

mod fs;
mod gpg;
mod probe;
mod ssh;
mod trigger;
mod u2f;

pub use fs::{arm_watch, event_touches, Armed, PathWatch};
pub use gpg::GpgWatcher;
pub use probe::{CardStatusProbe, LockArtifactProbe, TouchProbe};
pub use ssh::{is_sign_request, SshWatcher, MAX_AGENT_MESSAGE, SSH_AGENTC_SIGN_REQUEST};
pub use trigger::{CheckRequester, GpgCheckTrigger, TriggerSettings};
pub use u2f::U2fWatcher;

use thiserror::Error;

/// Detector errors; all of them are transient and retried
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Filesystem watch could not be established
    #[error("Filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
