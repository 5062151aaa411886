//! Resource persistence
//!
//! Writes use optimistic concurrency: an update must carry the resource
//! version it read, and the store bumps it on success. A stale writer gets
//! [`StoreError::Conflict`] and retries from a fresh read.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sp_types::{ObjectKey, SignalProcessing};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;

/// Notifications buffered per watcher before it lags
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Object created
    Created(ObjectKey),
    /// Object deleted
    Deleted(ObjectKey),
}

/// Persistence for signal processing objects
#[async_trait]
pub trait SignalProcessingStore: Send + Sync {
    /// Read an object
    async fn get(&self, key: &ObjectKey) -> Result<Option<SignalProcessing>, StoreError>;

    /// Create an object; its resource version becomes 1
    async fn create(&self, obj: SignalProcessing) -> Result<SignalProcessing, StoreError>;

    /// Replace an object if its resource version is current
    async fn update(&self, obj: SignalProcessing) -> Result<SignalProcessing, StoreError>;

    /// Delete an object
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Keys of all objects
    async fn list(&self) -> Result<Vec<ObjectKey>, StoreError>;
}

/// In-process store
#[derive(Debug)]
pub struct InMemoryStore {
    objects: DashMap<ObjectKey, SignalProcessing>,
    events: broadcast::Sender<StoreEvent>,
    fail_transitions: AtomicU32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Empty store whose watchers lag after `capacity` unread events
    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: DashMap::new(),
            events,
            fail_transitions: AtomicU32::new(0),
        }
    }

    /// Subscribe to create/delete notifications
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Make the next `n` updates that change the phase fail as unavailable
    pub fn fail_next_transitions(&self, n: u32) {
        self.fail_transitions.store(n, Ordering::SeqCst);
    }

    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SignalProcessingStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<SignalProcessing>, StoreError> {
        Ok(self.objects.get(key).map(|o| o.value().clone()))
    }

    async fn create(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, StoreError> {
        let key = obj.key.clone();
        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(slot) => {
                obj.resource_version = 1;
                obj.status.observe(Utc::now());
                slot.insert(obj.clone());
            }
        }
        let _ = self.events.send(StoreEvent::Created(key));
        Ok(obj)
    }

    async fn update(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, StoreError> {
        match self.objects.entry(obj.key.clone()) {
            Entry::Vacant(_) => Err(StoreError::NotFound(obj.key)),
            Entry::Occupied(mut slot) => {
                if slot.get().phase() != obj.phase() && self.take_injected_failure() {
                    return Err(StoreError::Unavailable("injected failure".into()));
                }
                let actual = slot.get().resource_version;
                if actual != obj.resource_version {
                    return Err(StoreError::Conflict {
                        key: obj.key,
                        expected: obj.resource_version,
                        actual,
                    });
                }
                obj.resource_version = actual + 1;
                slot.insert(obj.clone());
                Ok(obj)
            }
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let _ = self.events.send(StoreEvent::Deleted(key.clone()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectKey>, StoreError> {
        let mut keys: Vec<_> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_types::{ResourceRef, SignalRequest};

    fn object(name: &str) -> SignalProcessing {
        SignalProcessing::new(
            ObjectKey::new("ns", name),
            format!("uid-{name}"),
            SignalRequest::new("X", "info", ResourceRef::new("ns", "Pod", "p")),
        )
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = InMemoryStore::new();
        let created = store.create(object("a")).await.unwrap();
        assert_eq!(created.resource_version, 1);
        let updated = store.update(created).await.unwrap();
        assert_eq!(updated.resource_version, 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create(object("a")).await.unwrap();
        store.update(created.clone()).await.unwrap();
        let err = store.update(created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn create_records_pending_entry() {
        let store = InMemoryStore::new();
        let created = store.create(object("a")).await.unwrap();
        assert_eq!(created.status.phase_history.len(), 1);
        assert!(created.status.phase_entered_at(sp_types::Phase::Pending).is_some());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryStore::new();
        store.create(object("a")).await.unwrap();
        let err = store.create(object("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn events_follow_lifecycle() {
        let store = InMemoryStore::new();
        let mut events = store.watch();
        store.create(object("a")).await.unwrap();
        store.delete(&ObjectKey::new("ns", "a")).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Created(ObjectKey::new("ns", "a")));
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Deleted(ObjectKey::new("ns", "a")));
    }

    #[tokio::test]
    async fn injected_failures_hit_phase_changes_only() {
        let store = InMemoryStore::new();
        let created = store.create(object("a")).await.unwrap();
        store.fail_next_transitions(1);

        let same_phase = store.update(created.clone()).await.unwrap();
        let mut advanced = same_phase.clone();
        advanced
            .status
            .enter_phase(sp_types::Phase::Enriching, chrono::Utc::now())
            .unwrap();
        assert!(matches!(
            store.update(advanced.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.update(advanced).await.is_ok());
    }
}
