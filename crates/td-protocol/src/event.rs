//! Touch event types
//!
//! A [`TouchEvent`] says that the token used by one [`TouchSource`] has
//! started (`waiting = true`) or stopped (`waiting = false`) waiting for a
//! physical touch. Events carry no identity beyond their fields, so
//! consumers must treat a repeated identical event as a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Operation family that is waiting for a touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TouchSource {
    /// pam-u2f authentication
    U2f,
    /// GPG signing or decryption
    Gpg,
    /// SSH key operation
    Ssh,
}

impl TouchSource {
    /// All sources, in wire order
    pub const ALL: [TouchSource; 3] = [TouchSource::U2f, TouchSource::Gpg, TouchSource::Ssh];

    /// Wire name of this source
    pub fn as_str(&self) -> &'static str {
        match self {
            TouchSource::U2f => "U2F",
            TouchSource::Gpg => "GPG",
            TouchSource::Ssh => "SSH",
        }
    }
}

impl fmt::Display for TouchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TouchSource {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TouchSource::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownSource(s.to_string()))
    }
}

/// A change in touch state for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TouchEvent {
    /// Which operation family this event concerns
    pub source: TouchSource,
    /// Whether the token is now waiting for a touch
    pub waiting: bool,
}

impl TouchEvent {
    /// Create a new event
    pub fn new(source: TouchSource, waiting: bool) -> Self {
        Self { source, waiting }
    }

    /// The token started waiting for a touch
    pub fn started(source: TouchSource) -> Self {
        Self::new(source, true)
    }

    /// The token no longer waits for a touch
    pub fn stopped(source: TouchSource) -> Self {
        Self::new(source, false)
    }

    /// Render as `<SOURCE> <0|1>` without the line terminator
    pub fn to_text(&self) -> String {
        format!("{} {}", self.source, u8::from(self.waiting))
    }

    /// Parse the `<SOURCE> <0|1>` text form (terminator already stripped)
    pub fn parse_text(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_ascii_whitespace();
        let (Some(source), Some(state), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ProtocolError::Malformed(line.to_string()));
        };

        let waiting = match state {
            "1" => true,
            "0" => false,
            _ => return Err(ProtocolError::Malformed(line.to_string())),
        };

        Ok(Self::new(source.parse()?, waiting))
    }
}

impl fmt::Display for TouchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, u8::from(self.waiting))
    }
}

/// Serialization used on the broadcast socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `U2F 1\n`
    #[default]
    Text,
    /// `{"source":"U2F","waiting":true}\n`
    Json,
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(WireFormat::Text),
            "json" => Ok(WireFormat::Json),
            other => Err(ProtocolError::Malformed(format!("unknown wire format {other}"))),
        }
    }
}
