//! td-core: Configuration and shared errors for touch-detector
//!
//! This crate provides the configuration structures, default path
//! derivation and error types used by the daemon.

pub mod config;
pub mod error;
pub mod paths;

pub use config::DetectorConfig;
pub use error::ConfigError;
