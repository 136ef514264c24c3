//! td-protocol: Touch events and the broadcast wire format
//!
//! This crate defines the event published whenever a hardware token starts
//! or stops waiting for a physical touch, and the line-oriented codec used
//! to stream those events to socket subscribers.

pub mod codec;
pub mod error;
pub mod event;

pub use codec::{TouchEventCodec, MAX_LINE_LENGTH};
pub use error::ProtocolError;
pub use event::{TouchEvent, TouchSource, WireFormat};
