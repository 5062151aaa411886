//! Work-queue controller
//!
//! ```text
//! enqueue(key) ──dedupe──→ [ queue ] ──→ permit ──→ reconcile(key)
//!      ↑                                              │
//!      ├── Continue: immediately                      │
//!      ├── RequeueAfter(d): after d   ←───────────────┘
//!      └── error: after the first backoff step
//! ```
//!
//! - A key is queued at most once and processed by at most one pass at a
//!   time; a key that arrives while its pass runs is retried shortly after
//! - At most `max_concurrent` passes run at once
//! - [`cancel`](Controller::cancel) aborts the running pass of a key
//!   (deletion); [`shutdown`](Controller::shutdown) stops intake, cancels
//!   running passes and waits for them to finish
//! - [`follow`](Controller::follow) feeds the queue from store
//!   notifications and relists the store when notifications were missed

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, StoreError};
use crate::readiness::Readiness;
use crate::reconciler::{ReconcileAction, Reconciler};
use crate::retry::Backoff;
use crate::store::{SignalProcessingStore, StoreEvent};
use dashmap::{DashMap, DashSet};
use sp_types::ObjectKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Delay before retrying a key whose previous pass is still running
const BUSY_REQUEUE: Duration = Duration::from_millis(50);

/// Drives reconciles from a deduplicating work queue
pub struct Controller {
    reconciler: Arc<Reconciler>,
    readiness: Arc<Readiness>,
    tx: mpsc::UnboundedSender<ObjectKey>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ObjectKey>>>,
    queued: DashSet<ObjectKey>,
    in_flight: DashMap<ObjectKey, CancellationToken>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    peak_in_flight: AtomicUsize,
    backoff: Backoff,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("queued", &self.queued.len())
            .field("in_flight", &self.in_flight.len())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller; nothing runs until [`run`](Self::run)
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, readiness: Arc<Readiness>) -> Self {
        let ReconcileConfig { max_concurrent, .. } = *reconciler.config();
        let max_concurrent = max_concurrent.max(1);
        let backoff = reconciler.config().backoff();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            reconciler,
            readiness,
            tx,
            rx: Mutex::new(Some(rx)),
            queued: DashSet::new(),
            in_flight: DashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            peak_in_flight: AtomicUsize::new(0),
            backoff,
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue a key unless it is already queued
    pub fn enqueue(&self, key: ObjectKey) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.queued.insert(key.clone()) && self.tx.send(key.clone()).is_err() {
            self.queued.remove(&key);
        }
    }

    /// Abort the running pass of `key`, if any
    pub fn cancel(&self, key: &ObjectKey) {
        self.queued.remove(key);
        if let Some(token) = self.in_flight.get(key) {
            tracing::debug!(resource = %key, "cancelling running pass");
            token.cancel();
        }
    }

    /// Stop intake and cancel running passes; [`run`](Self::run) returns
    /// once they have finished
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown was requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Keys waiting in the queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Passes running now
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Most passes observed running at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Process the queue until [`shutdown`](Self::shutdown)
    pub async fn run(self: Arc<Self>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            tracing::warn!("controller already running");
            return;
        };
        self.readiness.set_controller_running(true);
        tracing::info!(max_concurrent = self.max_concurrent, "controller started");

        loop {
            let key = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                key = rx.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            self.queued.remove(&key);
            if self.in_flight.contains_key(&key) {
                self.requeue_after(key, BUSY_REQUEUE);
                continue;
            }

            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let token = self.shutdown.child_token();
            self.in_flight.insert(key.clone(), token.clone());
            self.peak_in_flight
                .fetch_max(self.in_flight.len(), Ordering::Relaxed);

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                this.process(key, token).await;
            });
        }

        // Wait for running passes; they observe the cancelled shutdown token
        let all = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        let _ = self.permits.acquire_many(all).await;
        self.readiness.set_controller_running(false);
        tracing::info!("controller stopped");
    }

    /// Queue created objects and cancel passes of deleted ones until
    /// `cancel` fires or the controller shuts down
    pub async fn follow(
        self: Arc<Self>,
        store: Arc<dyn SignalProcessingStore>,
        mut events: broadcast::Receiver<StoreEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(StoreEvent::Created(key)) => self.enqueue(key),
                Ok(StoreEvent::Deleted(key)) => self.cancel(&key),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "store events lagged; relisting");
                    self.resync_until_listed(store.as_ref(), &cancel).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Queue every non-terminal object in `store`
    ///
    /// # Errors
    /// The first store failure; keys queued before it stay queued.
    pub async fn resync(&self, store: &dyn SignalProcessingStore) -> Result<usize, StoreError> {
        let mut queued = 0;
        for key in store.list().await? {
            match store.get(&key).await? {
                Some(obj) if !obj.phase().is_terminal() => {
                    self.enqueue(key);
                    queued += 1;
                }
                _ => {}
            }
        }
        Ok(queued)
    }

    async fn resync_until_listed(&self, store: &dyn SignalProcessingStore, cancel: &CancellationToken) {
        let mut attempt = 1;
        loop {
            match self.resync(store).await {
                Ok(queued) => {
                    tracing::info!(queued, "resynced from store");
                    return;
                }
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(error = %err, ?delay, "relist failed; retrying");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = self.shutdown.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn process(self: &Arc<Self>, key: ObjectKey, token: CancellationToken) {
        let result = self.reconciler.reconcile(&key, &token).await;
        self.in_flight.remove(&key);
        match result {
            Ok(ReconcileAction::Done) => {}
            Ok(ReconcileAction::Continue) => self.enqueue(key),
            Ok(ReconcileAction::RequeueAfter(delay)) => self.requeue_after(key, delay),
            Err(ReconcileError::Cancelled) => {
                tracing::debug!(resource = %key, "pass cancelled");
            }
            Err(err) => {
                let delay = self.backoff.delay(1);
                tracing::error!(resource = %key, error = %err, ?delay, "reconcile failed; requeueing");
                self.requeue_after(key, delay);
            }
        }
    }

    fn requeue_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = this.shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => this.enqueue(key),
            }
        });
    }
}
