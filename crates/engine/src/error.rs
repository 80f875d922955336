//! Engine error types
//!
//! Failures are split by concern: config file problems are recoverable and
//! leave the caller with an empty table, bus problems abort only the
//! `start`/`scan` call that hit them. Script execution failures are not
//! errors at all; they are [`crate::ExecutionOutcome`] values.

use crate::store::DeviceIdentity;
use std::path::PathBuf;
use thiserror::Error;

/// Rule file load/save failures. Never fatal to the hosting process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read rule file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse rule file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot write rule file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("rule for {identity} has an empty script path")]
    EmptyScript { identity: DeviceIdentity },
}

/// Device-bus subscription failures, fatal to the individual call only.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("USB subsystem error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("hotplug events are not supported on this platform")]
    HotplugUnsupported,

    #[error("monitor worker failed: {0}")]
    Worker(String),
}
