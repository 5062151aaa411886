//! Component wiring
//!
//! ```text
//! PolicyWatcher ──swap──→ PolicyStore ←──reads── PolicyEngine ←── Classifiers ─┐
//!      │ reload events                                                         │
//!      └──────────→ AuditEmitter ←── Reconciler ←── Controller ←── enqueue     │
//!                        │              ├── K8sEnricher ──→ ClusterApi          │
//!                        ↓              ├── LabelDetector                       │
//!                    AuditSink          └───────────────────────────────────────┘
//! ```
//!
//! [`Services::start`] launches the background tasks in dependency order:
//! audit drain, policy load and watcher, then the controller loop.
//! [`Services::shutdown`] stops them in reverse so the last audit events
//! are flushed.

use crate::config::{AuditSinkConfig, ControllerConfig};
use crate::controller::Controller;
use crate::readiness::Readiness;
use crate::reconciler::Reconciler;
use crate::store::SignalProcessingStore;
use sp_audit::{AuditEmitter, AuditEvent, AuditEventKind, AuditSink, JsonLinesSink, TracingSink};
use sp_classifier::Classifiers;
use sp_enrichment::{ClusterApi, K8sEnricher, LabelDetector};
use sp_policy::{PolicyEngine, PolicyStore, PolicyWatcher, ReloadEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every long-lived component of a running controller
pub struct Services {
    /// Effective configuration
    pub config: ControllerConfig,
    /// Active policy bundle
    pub policy_store: Arc<PolicyStore>,
    /// Policy directory watcher, when a directory is configured
    pub watcher: Option<Arc<PolicyWatcher>>,
    /// Audit emitter
    pub audit: AuditEmitter,
    /// Probe state
    pub readiness: Arc<Readiness>,
    /// Phase reconciler
    pub reconciler: Arc<Reconciler>,
    /// Work-queue controller
    pub controller: Arc<Controller>,
    sink: Arc<dyn AuditSink>,
    background: CancellationToken,
    audit_cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    audit_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("sink", &self.sink.name())
            .field("controller", &self.controller)
            .field("readiness", &self.readiness.report())
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Wire components over a cluster and a store
    #[must_use]
    pub fn build(
        config: ControllerConfig,
        cluster: Arc<dyn ClusterApi>,
        store: Arc<dyn SignalProcessingStore>,
    ) -> Self {
        let sink: Arc<dyn AuditSink> = match &config.audit.sink {
            AuditSinkConfig::Tracing => Arc::new(TracingSink),
            AuditSinkConfig::JsonLines { path } => Arc::new(JsonLinesSink::new(path.clone())),
        };
        Self::build_with_sink(config, cluster, store, sink)
    }

    /// Wire components with an explicit audit sink
    #[must_use]
    pub fn build_with_sink(
        config: ControllerConfig,
        cluster: Arc<dyn ClusterApi>,
        store: Arc<dyn SignalProcessingStore>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let policy_store = Arc::new(PolicyStore::new());
        let watcher = config.policy.directory.as_ref().map(|dir| {
            Arc::new(PolicyWatcher::new(
                dir.clone(),
                Arc::clone(&policy_store),
                config.policy.poll_interval,
            ))
        });
        let engine = Arc::new(PolicyEngine::new(Arc::clone(&policy_store)));
        let classifiers = Classifiers::new(engine, &config.classification());
        let enricher = Arc::new(K8sEnricher::new(cluster, config.enrichment.clone()));
        let audit = AuditEmitter::new(config.audit.emitter);
        let readiness = Arc::new(Readiness::new(Some(audit.clone())));

        let reconciler = Arc::new(
            Reconciler::new(
                store,
                enricher,
                classifiers,
                Arc::new(LabelDetector::new()),
                audit.clone(),
                config.reconcile,
            )
            .with_policy_store(Arc::clone(&policy_store)),
        );
        let controller = Arc::new(Controller::new(
            Arc::clone(&reconciler),
            Arc::clone(&readiness),
        ));

        Self {
            config,
            policy_store,
            watcher,
            audit,
            readiness,
            reconciler,
            controller,
            sink,
            background: CancellationToken::new(),
            audit_cancel: CancellationToken::new(),
            handles: Vec::new(),
            audit_handle: None,
        }
    }

    /// Launch background tasks after a first policy load
    pub async fn start(&mut self) {
        if self.audit_handle.is_some() {
            return;
        }
        self.audit_handle = Some(
            self.audit
                .spawn(Arc::clone(&self.sink), self.audit_cancel.clone()),
        );

        match self.watcher.clone() {
            Some(watcher) => {
                let events = watcher.subscribe();
                self.handles.push(tokio::spawn(forward_reload_events(
                    events,
                    self.audit.clone(),
                    self.background.clone(),
                )));
                watcher.reload().await;
                self.readiness.mark_policy_attempted();
                self.handles
                    .push(tokio::spawn(watcher.run(self.background.clone())));
            }
            None => {
                tracing::info!("no policy directory configured; classification uses fallbacks");
                self.readiness.mark_policy_attempted();
            }
        }

        self.handles
            .push(tokio::spawn(Arc::clone(&self.controller).run()));
    }

    /// Stop the controller, then the watcher, then drain the audit buffer
    pub async fn shutdown(mut self) {
        self.controller.shutdown();
        self.background.cancel();
        for result in futures::future::join_all(self.handles.drain(..)).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "background task panicked");
            }
        }
        self.audit_cancel.cancel();
        if let Some(handle) = self.audit_handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "audit drain panicked");
            }
        }
        let stats = self.audit.stats();
        tracing::info!(
            emitted = stats.emitted,
            written = stats.written,
            dropped = stats.dropped,
            "shutdown complete"
        );
    }
}

/// Turn policy reload outcomes into audit events
async fn forward_reload_events(
    mut events: broadcast::Receiver<ReloadEvent>,
    audit: AuditEmitter,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let kind = match event {
            Ok(ReloadEvent::Applied { version, digest }) => {
                AuditEventKind::PolicyReloaded { version, digest }
            }
            Ok(ReloadEvent::Rejected { digest, error }) => {
                AuditEventKind::PolicyRejected { digest, error }
            }
            Ok(ReloadEvent::Unchanged) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "policy reload events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        audit.emit(AuditEvent::global(kind));
    }
}
