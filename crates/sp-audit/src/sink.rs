//! Audit sinks
//!
//! A sink receives batches from the emitter's drain task. Sinks may fail;
//! the emitter counts and absorbs the failure.

use crate::event::AuditEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Sink failure
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing failed
    #[error("audit sink io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failed
    #[error("audit event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Downstream refused the batch
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for audit batches
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one batch, oldest first
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError>;

    /// Sink name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Emits every event as a structured `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        for event in events {
            let payload = serde_json::to_string(&event.kind)?;
            tracing::info!(
                target: "audit",
                id = %event.id,
                kind = event.kind.name(),
                resource = event.resource.as_ref().map(ToString::to_string).as_deref(),
                fingerprint = event.fingerprint.as_deref(),
                payload = %payload,
                "audit event"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Appends events as JSON lines to a file
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    /// Sink appending to `path`; the file is created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesSink {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        let mut buf = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Number of events written
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        self.events.lock().extend_from_slice(events);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
