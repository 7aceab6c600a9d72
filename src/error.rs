//! Error types for Cairn
//!
//! All modules use `CairnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Cairn operations
pub type CairnResult<T> = Result<T, CairnError>;

/// All errors that can occur in Cairn
#[derive(Error, Debug)]
pub enum CairnError {
    // Input errors
    #[error("Invalid platform: {0:?}. Expected OS/ARCH, e.g. linux/amd64")]
    InvalidPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidInput(String),

    // Environment errors
    #[error("Neither XDG_CACHE_HOME nor HOME is set, cannot determine cache directory")]
    CacheRootUnavailable,

    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Pipeline errors
    #[error("Image fetch failed: {image}: {reason}")]
    FetchFailed { image: String, reason: String },

    #[error("Platform mismatch: requested {requested}, image reports {actual}")]
    PlatformMismatch { requested: String, actual: String },

    #[error("Layer conversion failed: {digest}: {reason}")]
    ConversionFailed { digest: String, reason: String },

    #[error("Layer merge failed: {reason}")]
    MergeFailed { reason: String },

    #[error("Failed to publish artifact {path}: {source}")]
    PublishFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image manifest invalid: {reason}")]
    ManifestInvalid { reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CairnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidPlatform(_) => Some("Pass --platform OS/ARCH, e.g. --platform linux/amd64"),
            Self::CacheRootUnavailable => Some("Set XDG_CACHE_HOME or HOME"),
            Self::CliNotFound { .. } => Some("Install skopeo and erofs-utils"),
            Self::FetchFailed { .. } => Some("Check the image reference and registry connectivity"),
            _ => None,
        }
    }
}
