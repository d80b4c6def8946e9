//! Error types for supervisor operations

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for supervisor operations
#[derive(Debug, Error)]
pub enum HoverflyError {
    /// Structural configuration problem, detected before any process or network action
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource not found: {name} (searched: {})", display_paths(.searched))]
    ResourceNotFound { name: String, searched: Vec<PathBuf> },

    #[error("Unsupported platform: os={os}, arch={arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    /// Temp directory or binary extraction failure
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Failed to spawn {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Proxy was not healthy within {timeout:?}")]
    HealthCheckTimeout { timeout: Duration },

    #[error(transparent)]
    Client(#[from] ClientError),

    /// A single simulation source failed to load or parse
    #[error("Failed to load simulation source {source_name}: {message}")]
    Source { source_name: String, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation '{operation}' is not valid in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Control plane failure. Transport errors carry no status.
#[derive(Debug, Clone, Error)]
pub struct ClientError {
    pub operation: String,
    pub status: Option<u16>,
    pub message: String,
}

impl ClientError {
    pub fn new(operation: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(operation, None, err.to_string())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "Admin API call '{}' failed with status {}: {}",
                self.operation, status, self.message
            ),
            None => write!(f, "Admin API call '{}' failed: {}", self.operation, self.message),
        }
    }
}

impl HoverflyError {
    pub fn source_error(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        HoverflyError::Source {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// True for errors raised before any process was spawned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HoverflyError::Configuration(_)
                | HoverflyError::ResourceNotFound { .. }
                | HoverflyError::UnsupportedPlatform { .. }
        )
    }
}
