//! Error types for policy compilation and evaluation
//!
//! Evaluation errors are never fatal to a reconcile pass: classifiers treat
//! every variant as "no policy answer" and move on to their fallbacks.
//! Compilation errors reject a whole bundle update.

use crate::bundle::PolicyDomain;
use std::path::PathBuf;
use std::time::Duration;

/// Errors from the policy subsystem
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// No rule set is loaded for the domain
    #[error("no policy loaded for domain '{0}'")]
    NotLoaded(PolicyDomain),

    /// Wall-clock budget exhausted
    #[error("policy evaluation exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// Memory budget exhausted
    #[error("policy evaluation exceeded memory budget: {used} > {limit} bytes")]
    MemoryExceeded { used: u64, limit: u64 },

    /// Step budget exhausted
    #[error("policy evaluation exceeded step budget of {0}")]
    StepLimitExceeded(u64),

    /// Evaluation failed for another reason
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    /// A rule file failed to parse or compile
    #[error("invalid policy in {domain}: {message}")]
    InvalidRuleSet {
        domain: PolicyDomain,
        message: String,
    },

    /// Reading the policy directory failed
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    /// Create an invalid rule set error
    pub fn invalid(domain: PolicyDomain, message: impl Into<String>) -> Self {
        Self::InvalidRuleSet {
            domain,
            message: message.into(),
        }
    }

    /// Create an IO error for a path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the evaluation ran out of budget
    #[must_use]
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::MemoryExceeded { .. } | Self::StepLimitExceeded(_)
        )
    }

    /// Short reason code used as a metric label and in provenance
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotLoaded(_) => "not_loaded",
            Self::Timeout(_) => "timeout",
            Self::MemoryExceeded { .. } => "memory_exceeded",
            Self::StepLimitExceeded(_) => "step_limit_exceeded",
            Self::Evaluation(_) => "evaluation",
            Self::InvalidRuleSet { .. } => "invalid_rule_set",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
