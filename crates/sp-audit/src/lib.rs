//! Signal Processing Audit
//!
//! Fire-and-forget audit trail for the pipeline:
//! - [`AuditEvent`]: phase transitions, classifications, rejections,
//!   policy reloads
//! - [`AuditEmitter`]: bounded queue drained by a background task
//! - [`AuditSink`]: where batches go ([`TracingSink`], [`JsonLinesSink`],
//!   [`MemorySink`])
//!
//! Emission never blocks the pipeline and never reports errors back to it.
//! Overflow drops the oldest event; sink failures are counted and dropped.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod emitter;
pub mod event;
pub mod sink;

pub use emitter::{AuditConfig, AuditEmitter, AuditStats};
pub use event::{AuditEvent, AuditEventKind};
pub use sink::{AuditSink, JsonLinesSink, MemorySink, SinkError, TracingSink};
