//! Error taxonomy for the bench.
//!
//! Fatal-at-connect failures (`LinkError::Unavailable`, `LinkError::ModeUnconfirmed`)
//! propagate out of link construction. Everything else is absorbed at the
//! component boundary by the background loops and only surfaces here when a
//! caller asked for it directly.

use std::{io, time::Duration};
use thiserror::Error;

/// Telemetry payload whose length does not match the configured schema.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("telemetry frame needs {expected} B, got {actual} B")]
pub struct FormatError {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Error, Debug)]
pub enum LinkError {
    /// No heartbeat within the connect window.
    #[error("no heartbeat within {timeout:?}, check port/baud")]
    Unavailable { timeout: Duration },

    /// Vehicle never reported the requested mode.
    #[error("could not enter mode {mode} within {timeout:?}")]
    ModeUnconfirmed { mode: String, timeout: Duration },

    #[error("channel {0} out of range")]
    InvalidChannel(u8),

    /// Link is faulted or closed.
    #[error("command link not ready")]
    NotReady,

    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("log file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("settings file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level error returned by the coordinator.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Logger(#[from] LoggerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("telemetry socket error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address {0:?}")]
    Address(String),

    #[error("motor {0} out of range")]
    InvalidChannel(u8),
}
