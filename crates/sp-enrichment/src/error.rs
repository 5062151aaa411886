//! Error types for cluster access and enrichment

use sp_types::ResourceRef;

/// Errors from a [`ClusterApi`](crate::ClusterApi) call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Call did not finish in time
    #[error("cluster call timed out")]
    Timeout,

    /// API server unreachable or returned a server error
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Access denied
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Kind the client cannot address
    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),
}

impl ClusterError {
    /// Create a not-found error for a reference
    pub fn not_found(what: impl ToString) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Whether the object definitively does not exist
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a retry could succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Enrichment failures that cannot be expressed as a degraded context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    /// The target's namespace does not exist
    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// The target object does not exist
    #[error("target {0} not found")]
    TargetNotFound(ResourceRef),

    /// The target reference cannot be looked up
    #[error("invalid target reference '{0}': kind and name are required")]
    InvalidTarget(ResourceRef),
}

impl EnrichError {
    /// Machine-readable reason for status and audit
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NamespaceNotFound(_) => "NamespaceNotFound",
            Self::TargetNotFound(_) => "TargetNotFound",
            Self::InvalidTarget(_) => "InvalidTarget",
        }
    }
}
