//! Signal Processing Controller
//!
//! Moves signal processing objects through their phases:
//!
//! ```text
//! Pending → Enriching → Classifying → Categorizing → Completed
//!    └──────────┴────────────┴──────────────┴──────→ Failed
//! ```
//!
//! - [`Reconciler`]: one phase per pass, persisted with optimistic concurrency
//! - [`Controller`]: deduplicating work queue with bounded concurrency
//! - [`Services`]: wiring of policy, enrichment, classification and audit
//! - [`ControllerConfig`]: TOML/YAML configuration
//! - [`Readiness`]: probe state
//!
//! # Example
//!
//! ```no_run
//! use sp_controller::{ControllerConfig, InMemoryStore, Services};
//! use sp_enrichment::InMemoryCluster;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let store = Arc::new(InMemoryStore::new());
//! let mut services = Services::build(
//!     ControllerConfig::default(),
//!     Arc::new(InMemoryCluster::new()),
//!     store,
//! );
//! services.start().await;
//! // enqueue keys with services.controller.enqueue(..)
//! services.shutdown().await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod readiness;
pub mod reconciler;
pub mod retry;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::{AuditSettings, AuditSinkConfig, ControllerConfig, PolicyConfig, ReconcileConfig};
pub use controller::Controller;
pub use error::{ConfigError, ReconcileError, StoreError};
pub use manifest::{ManifestMetadata, RequestManifest};
pub use readiness::{Readiness, ReadinessReport};
pub use reconciler::{ReconcileAction, Reconciler, RETRY_BUDGET_EXHAUSTED};
pub use retry::Backoff;
pub use services::Services;
pub use store::{InMemoryStore, SignalProcessingStore, StoreEvent, DEFAULT_EVENT_CAPACITY};
