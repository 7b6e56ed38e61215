//! Error types for the daemon.

use thiserror::Error;

use crate::snmp::SnmpError;

/// Daemon-level errors.
#[derive(Error, Debug)]
pub enum ZinodError {
    /// State engine error.
    #[error(transparent)]
    Core(#[from] zino_core::CoreError),

    /// SNMP transport error.
    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    /// Unknown device name.
    #[error("router {0} unknown")]
    UnknownDevice(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, ZinodError>;
