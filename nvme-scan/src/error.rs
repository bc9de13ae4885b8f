//! Error types for the topology engine
//!
//! Only structural problems are errors here. A command that runs and fails
//! is reported as a `CommandOutput` status, never as an `Err`.

use thiserror::Error;

/// Malformed kernel device path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty device path")]
    Empty,
    #[error("device path '{path}' has {segments} segments, at least 3 required")]
    TooFewSegments { path: String, segments: usize },
    #[error("device path '{path}' has no bus address")]
    NoBusAddress { path: String },
    #[error("device path '{path}' contains an empty segment")]
    EmptySegment { path: String },
    #[error("anchor '{anchor}' not found in device path '{path}'")]
    AnchorNotFound { path: String, anchor: String },
    #[error("device path '{path}' resolves to a single bus address, an upstream device is required")]
    ChainTooShort { path: String },
}

/// Errors raised by the collector, the snapshot store and configuration
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("topology parse failed: {0}")]
    Path(#[from] PathError),
    #[error("no snapshot captured yet, run a full scan first")]
    NoSnapshot,
    #[error("incomplete SSH login credentials provided: missing {0}")]
    Credentials(&'static str),
    #[error("remote transport error: {0}")]
    Transport(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl From<keyring::Error> for ScanError {
    fn from(err: keyring::Error) -> Self {
        ScanError::Keyring(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
