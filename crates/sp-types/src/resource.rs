//! Resource references and owner chains
//!
//! A [`ResourceRef`] names a Kubernetes object by namespace, kind and name.
//! Cluster-scoped objects (nodes, namespaces) carry an empty namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard cap on the number of owner chain entries
pub const MAX_OWNER_CHAIN_DEPTH: usize = 5;

/// Reference to a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Namespace (empty for cluster-scoped kinds)
    #[serde(default)]
    pub namespace: String,
    /// Object kind, e.g. `Pod`, `Deployment`
    pub kind: String,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Create a namespaced reference
    #[inline]
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped reference
    #[inline]
    #[must_use]
    pub fn cluster_scoped(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(String::new(), kind, name)
    }

    /// Whether this reference has no namespace
    #[inline]
    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Whether every identifying field needed for a lookup is present
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.kind.is_empty() && !self.name.is_empty()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// Owner chain entries share the shape of a resource reference
pub type OwnerChainEntry = ResourceRef;

/// Resolved ancestry of a resource
///
/// Entries are ordered immediate owner first, root-most owner last. The
/// starting resource itself is not part of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerChain {
    /// Owners, nearest first
    pub entries: Vec<OwnerChainEntry>,
    /// Traversal stopped at [`MAX_OWNER_CHAIN_DEPTH`] with owners remaining
    #[serde(default)]
    pub truncated: bool,
    /// Traversal stopped because an owner was already visited
    #[serde(default)]
    pub cycle_detected: bool,
    /// Set when a lookup failed mid-walk; entries hold what was resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<String>,
}

impl OwnerChain {
    /// Empty chain (resource has no owners)
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of resolved owners
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no owner was resolved
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Root-most resolved owner
    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<&OwnerChainEntry> {
        self.entries.last()
    }

    /// Whether any owner has the given kind
    #[must_use]
    pub fn contains_kind(&self, kind: &str) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }
}

/// Key of a persisted signal processing object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace the object lives in
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create new key
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_namespaced_and_cluster_scoped() {
        let pod = ResourceRef::new("payments", "Pod", "api-0");
        assert_eq!(pod.to_string(), "payments/Pod/api-0");

        let node = ResourceRef::cluster_scoped("Node", "worker-1");
        assert!(node.is_cluster_scoped());
        assert_eq!(node.to_string(), "Node/worker-1");
    }

    #[test]
    fn incomplete_reference() {
        assert!(!ResourceRef::new("ns", "", "x").is_complete());
        assert!(!ResourceRef::new("ns", "Pod", "").is_complete());
        assert!(ResourceRef::new("ns", "Pod", "x").is_complete());
    }

    #[test]
    fn owner_chain_root_is_last_entry() {
        let chain = OwnerChain {
            entries: vec![
                ResourceRef::new("ns", "ReplicaSet", "api-7d9"),
                ResourceRef::new("ns", "Deployment", "api"),
            ],
            ..OwnerChain::default()
        };
        assert_eq!(chain.root().map(|r| r.kind.as_str()), Some("Deployment"));
        assert!(chain.contains_kind("ReplicaSet"));
        assert!(!chain.contains_kind("StatefulSet"));
    }
}
