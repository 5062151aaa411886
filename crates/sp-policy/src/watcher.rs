//! Policy directory watcher
//!
//! ```text
//! notify event ─┐
//!               ├─→ digest dir ─→ unchanged? ─→ skip
//! poll tick ────┘        │
//!                        └─→ compile bundle ─→ ok ──→ install (atomic swap)
//!                                  │
//!                                  └─ error ─→ keep previous, report Rejected
//! ```
//!
//! Filesystem events make reloads prompt; the poll interval bounds how long
//! a change can go unnoticed when events are lost (network filesystems,
//! ConfigMap symlink swaps). A rejected digest is remembered so the same
//! broken content is reported once, not on every tick.

use crate::bundle::{digest_dir, PolicyBundle};
use crate::error::PolicyError;
use crate::store::PolicyStore;
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Outcome of a reload attempt, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// New bundle installed
    Applied {
        /// Assigned version
        version: u64,
        /// Content digest
        digest: String,
    },
    /// Update rejected; previous bundle stays active
    Rejected {
        /// Digest of the rejected content, when it could be read
        digest: Option<String>,
        /// Why
        error: String,
    },
    /// Content unchanged since the last attempt
    Unchanged,
}

impl ReloadEvent {
    /// Metric label for the outcome
    #[must_use]
    pub fn result_label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Rejected { .. } => "rejected",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Default)]
struct WatchState {
    last_digest: Option<String>,
    attempted: bool,
}

/// Watches a policy directory and swaps bundles into a [`PolicyStore`]
#[derive(Debug)]
pub struct PolicyWatcher {
    dir: PathBuf,
    store: Arc<PolicyStore>,
    poll_interval: Duration,
    state: Mutex<WatchState>,
    events: broadcast::Sender<ReloadEvent>,
}

impl PolicyWatcher {
    /// Create a watcher; nothing is loaded until [`reload`](Self::reload) or
    /// [`run`](Self::run)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, store: Arc<PolicyStore>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            dir: dir.into(),
            store,
            poll_interval,
            state: Mutex::new(WatchState::default()),
            events,
        }
    }

    /// Watched directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subscribe to reload outcomes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    /// Whether at least one load attempt has finished
    #[must_use]
    pub fn has_attempted(&self) -> bool {
        self.state.lock().attempted
    }

    /// Check the directory once and install a new bundle if it changed
    ///
    /// Reads the directory on the calling thread; async callers use
    /// [`reload`](Self::reload).
    pub fn reload_now(&self) -> ReloadEvent {
        let event = self.try_reload();
        self.state.lock().attempted = true;

        metrics::counter!(
            "signalprocessing_policy_reloads_total",
            "result" => event.result_label()
        )
        .increment(1);

        match &event {
            ReloadEvent::Applied { version, digest } => {
                tracing::info!(dir = %self.dir.display(), version, digest = %digest, "policy reload applied");
            }
            ReloadEvent::Rejected { error, .. } => {
                tracing::warn!(dir = %self.dir.display(), error = %error, "policy reload rejected; keeping previous bundle");
            }
            ReloadEvent::Unchanged => {
                tracing::trace!(dir = %self.dir.display(), "policy directory unchanged");
            }
        }
        if !matches!(event, ReloadEvent::Unchanged) {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
        event
    }

    /// [`reload_now`](Self::reload_now) on the blocking pool
    pub async fn reload(self: &Arc<Self>) -> ReloadEvent {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.reload_now()).await {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(dir = %self.dir.display(), error = %e, "policy reload task failed");
                ReloadEvent::Rejected {
                    digest: None,
                    error: format!("reload task failed: {e}"),
                }
            }
        }
    }

    fn try_reload(&self) -> ReloadEvent {
        let digest = match digest_dir(&self.dir) {
            Ok(d) => d,
            Err(e) => return self.reject(None, &e),
        };
        if self.state.lock().last_digest.as_deref() == Some(digest.as_str()) {
            return ReloadEvent::Unchanged;
        }

        let bundle = match PolicyBundle::load_dir(&self.dir) {
            Ok(b) => b,
            Err(e) => return self.reject(Some(digest), &e),
        };
        // The files may have changed between digest and load; key on what was compiled
        let digest = bundle.digest().to_string();
        let version = self.store.install(bundle);
        self.state.lock().last_digest = Some(digest.clone());
        ReloadEvent::Applied { version, digest }
    }

    fn reject(&self, digest: Option<String>, error: &PolicyError) -> ReloadEvent {
        let mut state = self.state.lock();
        if digest.is_some() && state.last_digest == digest {
            return ReloadEvent::Unchanged;
        }
        // Unreadable directories are retried on every tick
        if digest.is_some() {
            state.last_digest.clone_from(&digest);
        }
        ReloadEvent::Rejected {
            digest,
            error: error.to_string(),
        }
    }

    /// Watch until cancelled: an initial load, then reloads on filesystem
    /// events and on every poll tick
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let _fs_watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                // Coalesce bursts; a pending signal already covers this event
                let _ = tx.try_send(());
            }
        }) {
            Ok(mut w) => match w.watch(&self.dir, RecursiveMode::NonRecursive) {
                Ok(()) => Some(w),
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "filesystem watch unavailable; polling only");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "filesystem watcher unavailable; polling only");
                None
            }
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.reload().await;
                }
                Some(()) = rx.recv() => {
                    // Let editors finish writing before reading
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    self.reload().await;
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), "policy watcher stopped");
    }
}
