//! Owner chain resolution
//!
//! Walks owner references from a starting object towards the root:
//!
//! ```text
//! Pod ──controller──→ ReplicaSet ──controller──→ Deployment ──→ (none)
//!        entry 0                      entry 1
//! ```
//!
//! The controller reference is followed, falling back to the first owner.
//! The walk stops when an object has no owner, when the chain holds
//! [`MAX_OWNER_CHAIN_DEPTH`] entries, or when an owner repeats (including
//! the starting object). A lookup failure mid-walk keeps what was resolved
//! and records why the chain is incomplete; the builder itself never fails.

use crate::cluster::{ClusterApi, ObjectMeta};
use sp_types::{OwnerChain, ResourceRef, MAX_OWNER_CHAIN_DEPTH};
use tokio::time::Instant;

/// Resolved chain plus the metadata of its root-most resolved owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerResolution {
    /// The chain, nearest owner first
    pub chain: OwnerChain,
    /// Metadata of the last owner fetched, if any
    pub root: Option<ObjectMeta>,
}

/// Builds owner chains through a [`ClusterApi`]
#[derive(Debug, Clone, Copy)]
pub struct OwnerChainBuilder {
    max_depth: usize,
}

impl Default for OwnerChainBuilder {
    fn default() -> Self {
        Self {
            max_depth: MAX_OWNER_CHAIN_DEPTH,
        }
    }
}

impl OwnerChainBuilder {
    /// Builder with the standard depth cap
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower the depth cap; it never exceeds [`MAX_OWNER_CHAIN_DEPTH`]
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.min(MAX_OWNER_CHAIN_DEPTH);
        self
    }

    /// Walk owners of `start`, whose metadata has already been fetched
    pub async fn build(
        &self,
        api: &dyn ClusterApi,
        start: &ObjectMeta,
        deadline: Instant,
    ) -> OwnerResolution {
        let origin = start.reference();
        let mut chain = OwnerChain::empty();
        let mut root = None;
        let mut current = start.clone();

        loop {
            let Some(owner) = current.primary_owner() else {
                break;
            };
            let entry = ResourceRef::new(current.namespace.clone(), owner.kind.clone(), owner.name.clone());

            if entry == origin || chain.entries.contains(&entry) {
                tracing::debug!(resource = %origin, owner = %entry, "owner cycle detected");
                chain.cycle_detected = true;
                break;
            }
            if chain.entries.len() >= self.max_depth {
                chain.truncated = true;
                break;
            }
            chain.entries.push(entry.clone());

            match tokio::time::timeout_at(deadline, api.get_object(&entry)).await {
                Ok(Ok(meta)) => {
                    current = meta.clone();
                    root = Some(meta);
                }
                Ok(Err(e)) => {
                    chain.incomplete_reason = Some(format!("lookup of {entry} failed: {e}"));
                    break;
                }
                Err(_) => {
                    chain.incomplete_reason = Some(format!("lookup of {entry} timed out"));
                    break;
                }
            }
        }

        OwnerResolution { chain, root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ClusterOperation, InMemoryCluster};
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn pod_replicaset_deployment() {
        let cluster = InMemoryCluster::new();
        cluster.insert_object(ObjectMeta::new("ns", "ReplicaSet", "api-7d9f").with_owner("Deployment", "api", true));
        cluster.insert_object(ObjectMeta::new("ns", "Deployment", "api"));
        let pod = ObjectMeta::new("ns", "Pod", "api-7d9f-x").with_owner("ReplicaSet", "api-7d9f", true);

        let res = OwnerChainBuilder::new().build(&cluster, &pod, far()).await;
        let kinds: Vec<_> = res.chain.entries.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ReplicaSet", "Deployment"]);
        assert_eq!(res.root.unwrap().kind, "Deployment");
        assert!(!res.chain.truncated);
        assert!(res.chain.incomplete_reason.is_none());
    }

    #[tokio::test]
    async fn no_owners_gives_empty_chain() {
        let cluster = InMemoryCluster::new();
        let pod = ObjectMeta::new("ns", "Pod", "bare");
        let res = OwnerChainBuilder::new().build(&cluster, &pod, far()).await;
        assert!(res.chain.is_empty());
        assert!(res.root.is_none());
        assert_eq!(cluster.calls(), 0);
    }

    #[tokio::test]
    async fn cycle_terminates() {
        let cluster = InMemoryCluster::new();
        cluster.insert_object(ObjectMeta::new("ns", "A", "a").with_owner("B", "b", true));
        cluster.insert_object(ObjectMeta::new("ns", "B", "b").with_owner("A", "a", true));
        let start = ObjectMeta::new("ns", "Pod", "p").with_owner("A", "a", true);

        let res = OwnerChainBuilder::new().build(&cluster, &start, far()).await;
        assert_eq!(res.chain.len(), 2);
        assert!(res.chain.cycle_detected);
    }

    #[tokio::test]
    async fn self_reference_terminates() {
        let cluster = InMemoryCluster::new();
        let start = ObjectMeta::new("ns", "Pod", "p").with_owner("Pod", "p", true);
        let res = OwnerChainBuilder::new().build(&cluster, &start, far()).await;
        assert!(res.chain.is_empty());
        assert!(res.chain.cycle_detected);
    }

    #[tokio::test]
    async fn depth_is_capped() {
        let cluster = InMemoryCluster::new();
        for i in 0..10 {
            cluster.insert_object(
                ObjectMeta::new("ns", "Level", format!("l{i}")).with_owner("Level", format!("l{}", i + 1), true),
            );
        }
        let start = ObjectMeta::new("ns", "Pod", "p").with_owner("Level", "l0", true);
        let res = OwnerChainBuilder::new().build(&cluster, &start, far()).await;
        assert_eq!(res.chain.len(), MAX_OWNER_CHAIN_DEPTH);
        assert!(res.chain.truncated);
    }

    #[tokio::test]
    async fn lookup_failure_keeps_partial_chain() {
        let cluster = InMemoryCluster::new();
        cluster.fail_operation(ClusterOperation::GetObject);
        let pod = ObjectMeta::new("ns", "Pod", "p").with_owner("ReplicaSet", "rs", true);
        let res = OwnerChainBuilder::new().build(&cluster, &pod, far()).await;
        assert_eq!(res.chain.len(), 1);
        assert!(res.chain.incomplete_reason.is_some());
        assert!(res.root.is_none());
    }

    #[tokio::test]
    async fn missing_owner_object_keeps_reference() {
        let cluster = InMemoryCluster::new();
        let pod = ObjectMeta::new("ns", "Pod", "p").with_owner("ReplicaSet", "gone", true);
        let res = OwnerChainBuilder::new().build(&cluster, &pod, far()).await;
        assert_eq!(res.chain.entries[0].name, "gone");
        assert!(res.chain.incomplete_reason.unwrap().contains("not found"));
    }
}
