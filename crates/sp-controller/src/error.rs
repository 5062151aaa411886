//! Error types for the controller
//!
//! Three families, mirroring how failures are handled:
//! - **Transient**: retried in the same phase with backoff
//! - **Fatal**: the resource moves to `Failed`
//! - **Cancelled**: the pass was abandoned; nothing is persisted

use sp_types::{ObjectKey, TransitionError};
use std::path::PathBuf;

/// Persistence failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{0} not found")]
    NotFound(ObjectKey),

    /// Object already exists
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    /// Write based on a stale resource version
    #[error("conflict writing {key}: expected version {expected}, found {actual}")]
    Conflict {
        /// Object written
        key: ObjectKey,
        /// Version the writer read
        expected: u64,
        /// Version in the store
        actual: u64,
    },

    /// Backend not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a retry could succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

/// Reconciliation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    /// Retryable condition (pass deadline, unavailable dependency)
    #[error("transient: {0}")]
    Transient(String),

    /// Non-retryable condition; the resource fails
    #[error("{reason}: {message}")]
    Fatal {
        /// Machine-readable reason
        reason: String,
        /// Detail
        message: String,
    },

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Illegal phase change (a bug, never retried)
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Pass cancelled by deletion or shutdown
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Create a fatal error
    pub fn fatal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Whether the phase should be retried
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Fatal { .. } => "fatal",
            Self::Store(_) => "store",
            Self::Transition(_) => "transition",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// File could not be parsed
    #[error("failed to parse {}: {message}", path.display())]
    Parse {
        /// File
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Extension is neither TOML nor YAML
    #[error("unsupported config format: {} (expected .toml, .yaml or .yml)", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
