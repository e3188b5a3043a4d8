//! CQS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CqsError>;

/// Top-level error type for Container Quota Sentinel.
#[derive(Debug, Error)]
pub enum CqsError {
    #[error("[CQS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CQS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CQS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CQS-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[CQS-2001] policy lookup failed in {source_name}: {details}")]
    PolicyLookup {
        source_name: String,
        details: String,
    },

    #[error("[CQS-2002] volume enumeration failed in {source_name}: {details}")]
    VolumeEnumeration {
        source_name: String,
        details: String,
    },

    #[error("[CQS-2003] notification backend {backend} failed: {details}")]
    NotificationDelivery {
        backend: &'static str,
        details: String,
    },

    #[error("[CQS-2004] cooldown state unreadable at {path}: {details}")]
    CooldownState { path: PathBuf, details: String },

    #[error("[CQS-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CQS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CQS-3003] external command {command} failed: {details}")]
    Command {
        command: String,
        details: String,
    },

    #[error("[CQS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CqsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CQS-1001",
            Self::MissingConfig { .. } => "CQS-1002",
            Self::ConfigParse { .. } => "CQS-1003",
            Self::UnsupportedPlatform { .. } => "CQS-1101",
            Self::PolicyLookup { .. } => "CQS-2001",
            Self::VolumeEnumeration { .. } => "CQS-2002",
            Self::NotificationDelivery { .. } => "CQS-2003",
            Self::CooldownState { .. } => "CQS-2004",
            Self::Serialization { .. } => "CQS-2101",
            Self::Io { .. } => "CQS-3002",
            Self::Command { .. } => "CQS-3003",
            Self::Runtime { .. } => "CQS-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for CqsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for CqsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<regex::Error> for CqsError {
    fn from(value: regex::Error) -> Self {
        Self::InvalidConfig {
            details: format!("invalid label pattern: {value}"),
        }
    }
}
