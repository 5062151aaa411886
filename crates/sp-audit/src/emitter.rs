//! Bounded, fire-and-forget audit emission
//!
//! ```text
//! emit() ──push──→ [ bounded VecDeque ] ──drain task──→ AuditSink
//!   │                 full: drop oldest        batch / interval / shutdown
//!   └─ never blocks beyond the enqueue lock, never fails
//! ```
//!
//! The drain task wakes when a batch fills up or the flush interval
//! elapses, writes in batches and absorbs sink failures. On cancellation it
//! flushes whatever is still queued before exiting.

use crate::event::AuditEvent;
use crate::sink::AuditSink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Emitter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Events held before the oldest are dropped
    pub capacity: usize,
    /// Events per sink write
    pub batch_size: usize,
    /// Longest time an event waits before being written
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            batch_size: 64,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl AuditConfig {
    /// Set the buffer capacity
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the flush interval
    #[inline]
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Emitter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    /// Events accepted by `emit`
    pub emitted: u64,
    /// Events dropped on overflow
    pub dropped: u64,
    /// Events written by a sink
    pub written: u64,
    /// Failed sink writes (batches)
    pub failed_batches: u64,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<AuditEvent>>,
    notify: Notify,
    emitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed_batches: AtomicU64,
    running: AtomicBool,
}

/// Cloneable handle for emitting audit events
#[derive(Debug, Clone)]
pub struct AuditEmitter {
    shared: Arc<Shared>,
    config: AuditConfig,
}

impl AuditEmitter {
    /// Create an emitter; events queue until a drain task is spawned
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        let config = AuditConfig {
            capacity: config.capacity.max(1),
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
                notify: Notify::new(),
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                written: AtomicU64::new(0),
                failed_batches: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            config,
        }
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Queue an event; drops the oldest queued event when full
    pub fn emit(&self, event: AuditEvent) {
        let len = {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.config.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("signalprocessing_audit_events_dropped_total").increment(1);
            }
            queue.push_back(event);
            queue.len()
        };
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        if len >= self.config.batch_size {
            self.shared.notify.notify_one();
        }
    }

    /// Events waiting to be written
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            emitted: self.shared.emitted.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            written: self.shared.written.load(Ordering::Relaxed),
            failed_batches: self.shared.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Whether a drain task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start the drain task
    pub fn spawn(&self, sink: Arc<dyn AuditSink>, cancel: CancellationToken) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let config = self.config;
        shared.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = shared.notify.notified() => {}
                    _ = ticker.tick() => {}
                }
                flush_pending(&shared, sink.as_ref(), config.batch_size).await;
            }
            flush_pending(&shared, sink.as_ref(), config.batch_size).await;
            shared.running.store(false, Ordering::Release);
            tracing::debug!(sink = sink.name(), "audit drain stopped");
        })
    }

    /// Write everything queued to `sink` now
    pub async fn flush(&self, sink: &dyn AuditSink) {
        flush_pending(&self.shared, sink, self.config.batch_size).await;
    }
}

async fn flush_pending(shared: &Shared, sink: &dyn AuditSink, batch_size: usize) {
    loop {
        let batch: Vec<AuditEvent> = {
            let mut queue = shared.queue.lock();
            let n = queue.len().min(batch_size);
            queue.drain(..n).collect()
        };
        if batch.is_empty() {
            return;
        }
        match sink.write_batch(&batch).await {
            Ok(()) => {
                shared
                    .written
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(err) => {
                shared.failed_batches.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("signalprocessing_audit_flush_failures_total").increment(1);
                tracing::warn!(
                    sink = sink.name(),
                    events = batch.len(),
                    error = %err,
                    "audit batch lost"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventKind;
    use crate::sink::{MemorySink, MockAuditSink, SinkError};
    use sp_types::{ObjectKey, Phase};

    fn event(i: usize) -> AuditEvent {
        AuditEvent::for_resource(
            ObjectKey::new("ns", format!("sp-{i}")),
            AuditEventKind::PhaseTransition {
                from: Phase::Pending,
                to: Phase::Enriching,
            },
        )
    }

    #[test]
    fn overflow_drops_oldest() {
        let emitter = AuditEmitter::new(AuditConfig::default().with_capacity(3));
        for i in 0..5 {
            emitter.emit(event(i));
        }
        let stats = emitter.stats();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.dropped, 2);
        let names: Vec<String> = emitter
            .shared
            .queue
            .lock()
            .iter()
            .map(|e| e.resource.as_ref().unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["sp-2", "sp-3", "sp-4"]);
    }

    #[tokio::test]
    async fn shutdown_flushes_everything() {
        let emitter = AuditEmitter::new(
            AuditConfig::default()
                .with_batch_size(4)
                .with_flush_interval(Duration::from_secs(3600)),
        );
        let sink = Arc::new(MemorySink::new());
        let cancel = CancellationToken::new();
        let handle = emitter.spawn(sink.clone(), cancel.clone());
        assert!(emitter.is_running());

        for i in 0..10 {
            emitter.emit(event(i));
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.len(), 10);
        assert_eq!(emitter.pending(), 0);
        assert_eq!(emitter.stats().written, 10);
        assert!(!emitter.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_partial_batches() {
        let emitter = AuditEmitter::new(
            AuditConfig::default()
                .with_batch_size(100)
                .with_flush_interval(Duration::from_millis(200)),
        );
        let sink = Arc::new(MemorySink::new());
        let cancel = CancellationToken::new();
        let handle = emitter.spawn(sink.clone(), cancel.clone());

        emitter.emit(event(0));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sink_failures_are_absorbed() {
        let mut sink = MockAuditSink::new();
        sink.expect_write_batch()
            .returning(|_| Err(SinkError::Unavailable("down".into())));
        sink.expect_name().return_const("mock");

        let emitter = AuditEmitter::new(AuditConfig::default().with_batch_size(2));
        for i in 0..5 {
            emitter.emit(event(i));
        }
        emitter.flush(&sink).await;

        let stats = emitter.stats();
        assert_eq!(stats.failed_batches, 3);
        assert_eq!(stats.written, 0);
        assert_eq!(emitter.pending(), 0);

        // Emission keeps working after failures
        emitter.emit(event(9));
        assert_eq!(emitter.pending(), 1);
    }
}
