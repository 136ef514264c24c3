//! Notification sinks
//!
//! A sink consumes touch events from the hub and renders or forwards them.
//! The diagnostic sink logs every event; the broadcast sink streams them to
//! subscribers connected to a Unix socket.

mod broadcast;
mod diagnostic;

pub use broadcast::{BroadcastSink, CLIENT_WRITE_TIMEOUT};
pub use diagnostic::{render, spawn_diagnostic_sink};

use std::path::PathBuf;
use thiserror::Error;

/// Sink startup errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// The broadcast socket could not be bound
    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
