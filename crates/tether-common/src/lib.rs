//! Shared utilities for Tether: configuration, logging, error types.
//!
//! This crate provides common infrastructure used across all Tether components,
//! including the control-message protocol spoken between a controller and the
//! background sync task.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod protocol;

pub use config::{SeedEngineKind, SyncConfig};
pub use error::{Error, Result};
pub use protocol::*;

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the CLI's JSON lines, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
