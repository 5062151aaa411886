//! Active bundle holder
//!
//! Single writer (the watcher), many readers. Readers take one snapshot per
//! evaluation with a lock-free load; a swap never blocks them and they keep
//! the snapshot they took for as long as they hold it.

use crate::bundle::PolicyBundle;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide active policy bundle
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicyBundle>,
    next_version: AtomicU64,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// Store holding the empty bundle (version 0)
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicyBundle::empty()),
            next_version: AtomicU64::new(1),
        }
    }

    /// Current bundle
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicyBundle> {
        self.current.load_full()
    }

    /// Install a compiled bundle, assigning the next version
    pub fn install(&self, mut bundle: PolicyBundle) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        bundle.set_version(version);
        self.current.store(Arc::new(bundle));
        tracing::info!(version, "policy bundle installed");
        version
    }

    /// Version of the current bundle
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PolicyDomain;

    #[test]
    fn versions_increase() {
        let store = PolicyStore::new();
        assert_eq!(store.version(), 0);
        let b = PolicyBundle::from_sources([(PolicyDomain::Priority, "rules: []")]).unwrap();
        assert_eq!(store.install(b.clone()), 1);
        assert_eq!(store.install(b), 2);
        assert_eq!(store.snapshot().version(), 2);
    }

    #[test]
    fn held_snapshot_survives_swap() {
        let store = PolicyStore::new();
        let before = store.snapshot();
        store.install(
            PolicyBundle::from_sources([(PolicyDomain::Priority, "rules: []")]).unwrap(),
        );
        assert_eq!(before.version(), 0);
        assert!(before.is_empty());
        assert_eq!(store.version(), 1);
    }
}
