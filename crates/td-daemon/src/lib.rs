//! td-daemon: detects when a security token waits for a touch
//!
//! Independent detectors watch the pam-u2f lock file, the gpg keybox and
//! the SSH agent traffic. They publish [`td_protocol::TouchEvent`]s into
//! the notification hub, which fans every event out to the diagnostic log
//! and to subscribers of the broadcast socket. The exit coordinator stops
//! every watcher in turn on SIGINT or SIGTERM.

pub mod coordinator;
pub mod daemon;
pub mod detector;
pub mod hub;
pub mod sink;
pub mod socket;

pub use coordinator::{ExitCoordinator, ExitError, ExitState, ShutdownAck, ShutdownListener};
pub use daemon::{Daemon, DaemonError};
pub use hub::{EventPublisher, NotificationHub, SinkCapacity, SinkReceiver, SinkRegistry};
