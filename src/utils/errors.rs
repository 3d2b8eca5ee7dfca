//! Error types used throughout the application

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for FilePilot
#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Completion provider error: {0}")]
    Completion(#[from] crate::llm::CompletionError),

    #[error("Not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("{component} not initialized")]
    NotInitialized { component: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("AI rate limit exceeded{}", retry_after.map(|s| format!(", retry after {}s", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("File system error: {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration key: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration: {source}")]
    ReadError {
        #[source]
        source: io::Error,
    },

    #[error("Failed to write configuration: {source}")]
    WriteError {
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError {
        #[source]
        source: toml::ser::Error,
    },
}

impl PilotError {
    /// Map an I/O failure on `path` onto the filesystem taxonomy
    pub fn from_io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::FileSystem { path, source },
        }
    }

    /// Create a new not found error
    pub fn not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new not-a-directory error
    pub fn not_a_directory<P: Into<PathBuf>>(path: P) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Create a new not initialized error
    pub fn not_initialized<S: Into<String>>(component: S) -> Self {
        Self::NotInitialized {
            component: component.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new remote rate limit error
    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        Self::RateLimitExceeded { retry_after }
    }

    /// Create a new cancelled error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a new unknown error
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Completion(_) => "completion",
            Self::NotFound { .. } => "notfound",
            Self::NotADirectory { .. } => "notadir",
            Self::PermissionDenied { .. } => "permission",
            Self::NotInitialized { .. } => "uninitialized",
            Self::Connection { .. } => "connection",
            Self::RateLimitExceeded { .. } => "ratelimit",
            Self::Cancelled { .. } => "cancelled",
            Self::FileSystem { .. } => "filesystem",
            Self::Watch(_) => "watch",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Unknown { .. } => "unknown",
        }
    }
}
