//! Detector daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use td_protocol::WireFormat;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::paths;

/// Configuration for the touch-detector daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// pam-u2f lock file watcher
    pub u2f: U2fConfig,
    /// GPG keybox watcher and check trigger
    pub gpg: GpgConfig,
    /// SSH agent activity watcher
    pub ssh: SshConfig,
    /// Broadcast socket sink
    pub socket: SocketConfig,
    /// Notification hub
    pub hub: HubConfig,
}

impl DetectorConfig {
    /// Expand environment references in every configured path
    pub fn expand_paths(&mut self) {
        self.u2f.lock_path = paths::expand_path(&self.u2f.lock_path);
        self.gpg.pubring_path = paths::expand_path(&self.gpg.pubring_path);
        self.ssh.proxy_socket = paths::expand_path(&self.ssh.proxy_socket);
        self.ssh.upstream_socket = self
            .ssh
            .upstream_socket
            .as_deref()
            .map(paths::expand_path);
        self.socket.path = paths::expand_path(&self.socket.path);
    }

    /// Reject combinations the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.capacity == 0 {
            return Err(ConfigError::Invalid("hub.capacity must be at least 1".into()));
        }
        if self.socket.client_buffer == 0 {
            return Err(ConfigError::Invalid(
                "socket.client_buffer must be at least 1".into(),
            ));
        }
        if self.gpg.recheck_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "gpg.recheck_interval must be greater than zero".into(),
            ));
        }
        if self.ssh.enabled {
            if let Some(upstream) = &self.ssh.upstream_socket {
                if upstream == &self.ssh.proxy_socket {
                    return Err(ConfigError::Invalid(
                        "ssh.proxy_socket must differ from ssh.upstream_socket".into(),
                    ));
                }
            }
        }
        if self.socket.enabled && self.ssh.enabled && self.socket.path == self.ssh.proxy_socket {
            return Err(ConfigError::Invalid(
                "socket.path must differ from ssh.proxy_socket".into(),
            ));
        }
        Ok(())
    }
}

/// pam-u2f lock file watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct U2fConfig {
    /// Whether the watcher runs
    pub enabled: bool,

    /// Lock file created by pam-u2f while it waits for a touch
    pub lock_path: PathBuf,

    /// Delay between attempts to watch a directory that does not exist yet
    #[serde(with = "duration_secs")]
    pub retry_interval: Duration,
}

impl Default for U2fConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_path: paths::default_u2f_lock_path(),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// How the GPG check trigger decides whether a touch is pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpgProbeKind {
    /// `card-status` while the SSH proxy runs, `lock` otherwise
    #[default]
    Auto,
    /// The keybox lock artifact exists. Blind to SSH sign requests, which
    /// never create the artifact
    Lock,
    /// `gpg --card-status` does not finish in time
    CardStatus,
}

/// GPG keybox watcher and check trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpgConfig {
    /// Whether the watcher and trigger run
    pub enabled: bool,

    /// gpg keybox file
    pub pubring_path: PathBuf,

    /// Touch-pending heuristic
    pub probe: GpgProbeKind,

    /// gpg executable used by the card-status probe
    pub program: String,

    /// Settle time before each check, in milliseconds
    #[serde(with = "duration_millis")]
    pub check_delay: Duration,

    /// Re-check cadence while a touch is pending, in milliseconds
    #[serde(with = "duration_millis")]
    pub recheck_interval: Duration,

    /// Card-status probe time limit, in milliseconds
    #[serde(with = "duration_millis")]
    pub card_status_timeout: Duration,

    /// Delay between attempts to watch a directory that does not exist yet
    #[serde(with = "duration_secs")]
    pub retry_interval: Duration,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pubring_path: paths::default_pubring_path(),
            probe: GpgProbeKind::default(),
            program: "gpg".to_string(),
            check_delay: Duration::from_millis(200),
            recheck_interval: Duration::from_millis(500),
            card_status_timeout: Duration::from_millis(400),
            retry_interval: Duration::from_secs(5),
        }
    }
}

impl GpgConfig {
    /// Lock artifact gpg creates next to the keybox while it holds it
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.pubring_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// SSH agent activity watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Whether the watcher runs
    pub enabled: bool,

    /// Real agent socket (defaults to `$SSH_AUTH_SOCK`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_socket: Option<PathBuf>,

    /// Socket clients connect to instead of the real agent
    pub proxy_socket: PathBuf,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upstream_socket: paths::default_ssh_upstream(),
            proxy_socket: paths::default_ssh_proxy_path(),
        }
    }
}

/// Broadcast socket sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Whether the socket sink runs
    pub enabled: bool,

    /// Unix socket path subscribers connect to
    pub path: PathBuf,

    /// Line format written to subscribers
    pub format: WireFormat,

    /// Events buffered per client before it is dropped
    pub client_buffer: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: paths::default_socket_path(),
            format: WireFormat::default(),
            client_buffer: 32,
        }
    }
}

/// Notification hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Events buffered between detectors and the fan-out task
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}
