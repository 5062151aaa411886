//! Phase reconciler
//!
//! One call to [`Reconciler::reconcile`] performs the work of the current
//! phase and persists the next one:
//!
//! ```text
//! Pending ──→ Enriching ──→ Classifying ──→ Categorizing ──→ Completed
//!             enrich        environment     business
//!             owner chain   priority        label detection
//!                           signal mode     custom labels
//!                                           signal labels
//! ```
//!
//! - Terminal resources are left untouched and emit nothing
//! - Work runs under the pass deadline and the caller's cancellation token
//! - Transient failures persist a [`RetryState`] and requeue with backoff;
//!   exhausting the retry budget fails the resource
//! - Fatal failures move the resource to `Failed` with a reason
//! - Every persisted transition emits an audit event and a log record

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, StoreError};
use crate::metrics::{record_error, record_pass, record_phase_duration};
use crate::retry::Backoff;
use crate::store::SignalProcessingStore;
use chrono::Utc;
use sp_audit::{AuditEmitter, AuditEvent, AuditEventKind};
use sp_classifier::Classifiers;
use sp_enrichment::{EnrichError, K8sEnricher, LabelDetector};
use sp_policy::PolicyStore;
use sp_types::{
    truncate_label_value, ConditionStatus, ConditionType, EnrichmentContext, FailureInfo,
    ObjectKey, Phase, RetryState, SignalProcessing,
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Reason recorded when the retry budget runs out
pub const RETRY_BUDGET_EXHAUSTED: &str = "RetryBudgetExhausted";

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Terminal or gone; nothing more to do
    Done,
    /// Advanced a phase; reconcile again right away
    Continue,
    /// Reconcile again after the delay
    RequeueAfter(Duration),
}

/// Drives one resource through the phase machine
pub struct Reconciler {
    store: Arc<dyn SignalProcessingStore>,
    enricher: Arc<K8sEnricher>,
    classifiers: Classifiers,
    detector: Arc<LabelDetector>,
    audit: AuditEmitter,
    policy_store: Option<Arc<PolicyStore>>,
    config: ReconcileConfig,
    backoff: Backoff,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(
        store: Arc<dyn SignalProcessingStore>,
        enricher: Arc<K8sEnricher>,
        classifiers: Classifiers,
        detector: Arc<LabelDetector>,
        audit: AuditEmitter,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            enricher,
            classifiers,
            detector,
            audit,
            policy_store: None,
            backoff: config.backoff(),
            config,
        }
    }

    /// Record the active policy bundle version on classified resources
    #[must_use]
    pub fn with_policy_store(mut self, store: Arc<PolicyStore>) -> Self {
        self.policy_store = Some(store);
        self
    }

    /// Settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SignalProcessingStore> {
        &self.store
    }

    /// Run one pass for `key`
    ///
    /// # Errors
    /// `Cancelled` when `cancel` fires; store failures that could not be
    /// recorded as a retry. Phase failures are persisted, not returned.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileAction, ReconcileError> {
        let started = Instant::now();
        let Some(obj) = self.store.get(key).await? else {
            return Ok(ReconcileAction::Done);
        };
        let phase = obj.phase();
        if phase.is_terminal() {
            return Ok(ReconcileAction::Done);
        }
        if let Some(retry) = obj.status.retry.as_ref().filter(|r| r.phase == phase) {
            if let Ok(wait) = (retry.next_attempt_at - Utc::now()).to_std() {
                if !wait.is_zero() {
                    return Ok(ReconcileAction::RequeueAfter(wait));
                }
            }
        }

        let work = tokio::time::timeout(self.config.pass_timeout, self.step(obj));
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                record_pass(phase, "cancelled", started.elapsed());
                return Err(ReconcileError::Cancelled);
            }
            result = work => result.unwrap_or_else(|_| {
                Err(ReconcileError::Transient(format!(
                    "pass deadline of {:?} exceeded",
                    self.config.pass_timeout
                )))
            }),
        };

        let action = match outcome {
            Ok(saved) if saved.phase().is_terminal() => Ok(ReconcileAction::Done),
            Ok(_) => Ok(ReconcileAction::Continue),
            Err(ReconcileError::Store(StoreError::NotFound(_))) => Ok(ReconcileAction::Done),
            Err(err) if err.is_transient() => self.record_retry(key, phase, &err).await,
            Err(ReconcileError::Fatal { reason, message }) => {
                self.fail(key, &reason, &message).await.map(|()| ReconcileAction::Done)
            }
            Err(err) => {
                let reason = err.kind();
                self.fail(key, reason, &err.to_string())
                    .await
                    .map(|()| ReconcileAction::Done)
            }
        };
        let result = match &action {
            Ok(ReconcileAction::Done | ReconcileAction::Continue) => "ok",
            Ok(ReconcileAction::RequeueAfter(_)) => "retry",
            Err(_) => "error",
        };
        record_pass(phase, result, started.elapsed());
        action
    }

    /// Reconcile until terminal, honoring requeue delays
    ///
    /// # Errors
    /// As [`reconcile`](Self::reconcile).
    pub async fn run_to_completion(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Option<SignalProcessing>, ReconcileError> {
        loop {
            match self.reconcile(key, cancel).await? {
                ReconcileAction::Done => return Ok(self.store.get(key).await?),
                ReconcileAction::Continue => {}
                ReconcileAction::RequeueAfter(delay) => {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ReconcileError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn step(&self, obj: SignalProcessing) -> Result<SignalProcessing, ReconcileError> {
        match obj.phase() {
            Phase::Pending => self.start(obj).await,
            Phase::Enriching => self.enrich(obj).await,
            Phase::Classifying => self.classify(obj).await,
            Phase::Categorizing => self.categorize(obj).await,
            Phase::Completed | Phase::Failed => Ok(obj),
        }
    }

    async fn start(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, ReconcileError> {
        obj.status.observe(Utc::now());
        let target = &obj.spec.target;
        if !target.is_complete() {
            return Err(ReconcileError::fatal(
                "InvalidTarget",
                format!("target reference '{target}' is incomplete"),
            ));
        }
        self.transition(obj, Phase::Enriching).await
    }

    async fn enrich(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, ReconcileError> {
        let ctx = self
            .enricher
            .enrich(&obj.spec.target)
            .await
            .map_err(|e: EnrichError| ReconcileError::fatal(e.reason(), e.to_string()))?;
        let now = Utc::now();
        let status = &mut obj.status;
        if ctx.degraded {
            status.set_condition(
                ConditionType::EnrichmentComplete,
                ConditionStatus::True,
                "EnrichmentDegraded",
                ctx.degraded_reasons.join("; "),
                now,
            );
            self.audit.emit(
                AuditEvent::for_resource(
                    obj.key.clone(),
                    AuditEventKind::EnrichmentDegraded {
                        reasons: ctx.degraded_reasons.clone(),
                    },
                )
                .with_fingerprint(obj.spec.fingerprint.clone()),
            );
        } else {
            status.set_condition(
                ConditionType::EnrichmentComplete,
                ConditionStatus::True,
                "Enriched",
                format!("owner chain depth {}", ctx.owner_chain.len()),
                now,
            );
        }
        status.owner_chain = Some(ctx.owner_chain.clone());
        status.enrichment = Some(EnrichmentContext::clone(&ctx));
        self.transition(obj, Phase::Classifying).await
    }

    async fn classify(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, ReconcileError> {
        let ctx = context_of(&obj);
        let signal = &obj.spec;
        let (environment, signal_mode) = tokio::join!(
            self.classifiers.environment.classify(signal, &ctx),
            self.classifiers.signal_mode.classify(signal, &ctx),
        );
        let priority = self
            .classifiers
            .priority
            .assign(signal, environment.value, &ctx)
            .await;
        let policy_version = self
            .policy_store
            .as_ref()
            .map(|s| s.version())
            .filter(|v| *v > 0);

        self.audit.emit(
            AuditEvent::for_resource(
                obj.key.clone(),
                AuditEventKind::Classified {
                    environment: environment.value.to_string(),
                    environment_source: environment.source.to_string(),
                    priority: priority.value.to_string(),
                    priority_source: priority.source.to_string(),
                    policy_version,
                },
            )
            .with_fingerprint(obj.spec.fingerprint.clone()),
        );
        let status = &mut obj.status;
        status.set_condition(
            ConditionType::ClassificationComplete,
            ConditionStatus::True,
            "Classified",
            format!(
                "environment={} ({}), priority={} ({})",
                environment.value, environment.source, priority.value, priority.source
            ),
            Utc::now(),
        );
        status.environment = Some(environment);
        status.priority = Some(priority);
        status.signal_mode = Some(signal_mode);
        status.policy_version = policy_version;
        self.transition(obj, Phase::Categorizing).await
    }

    async fn categorize(&self, mut obj: SignalProcessing) -> Result<SignalProcessing, ReconcileError> {
        let ctx = context_of(&obj);
        let signal = &obj.spec;
        let labels = async {
            let detected = self.detector.detect(&ctx);
            let custom = self
                .classifiers
                .custom_labels
                .extract(signal, &ctx, Some(&detected))
                .await;
            (detected, custom)
        };
        let (business, (detected, custom)) =
            tokio::join!(self.classifiers.business.classify(signal, &ctx), labels);

        for rejected in &custom.rejected {
            self.audit.emit(
                AuditEvent::for_resource(
                    obj.key.clone(),
                    AuditEventKind::CustomLabelRejected {
                        key: rejected.key.clone(),
                        value: rejected.value.clone(),
                        reason: rejected.reason,
                    },
                )
                .with_fingerprint(obj.spec.fingerprint.clone()),
            );
        }

        let mut signal_labels = std::collections::BTreeMap::new();
        let mut truncated = Vec::new();
        for (key, value) in &obj.spec.labels {
            let stored = truncate_label_value(value);
            if matches!(stored, Cow::Owned(_)) {
                truncated.push(key.clone());
            }
            signal_labels.insert(key.clone(), stored.into_owned());
        }

        let now = Utc::now();
        let failed = detected.failed_detections.len();
        let status = &mut obj.status;
        status.set_condition(
            ConditionType::CategorizationComplete,
            ConditionStatus::True,
            if failed == 0 { "Categorized" } else { "CategorizedWithFailures" },
            format!(
                "business confidence {:.2}, {} custom labels, {} failed detections",
                business.confidence,
                custom.labels.len(),
                failed
            ),
            now,
        );
        status.set_condition(
            ConditionType::ProcessingComplete,
            ConditionStatus::True,
            "Completed",
            "",
            now,
        );
        if status.owner_chain.is_none() {
            status.owner_chain = Some(ctx.owner_chain.clone());
        }
        status.business = Some(business);
        status.detected_labels = Some(detected);
        status.custom_labels = custom.labels;
        status.rejected_label_writes = custom.rejected;
        status.signal_labels = signal_labels;
        status.truncated_labels = truncated;
        self.transition(obj, Phase::Completed).await
    }

    /// Persist a phase change, then audit and log it
    async fn transition(
        &self,
        mut obj: SignalProcessing,
        to: Phase,
    ) -> Result<SignalProcessing, ReconcileError> {
        let from = obj.phase();
        let now = Utc::now();
        let entered = obj.status.phase_entered_at(from);
        obj.status.enter_phase(to, now)?;
        let saved = self.store.update(obj).await?;

        if let Some(entered) = entered {
            let secs = (now - entered).num_milliseconds().max(0) as f64 / 1000.0;
            record_phase_duration(from, secs);
        }
        self.audit.emit(
            AuditEvent::for_resource(saved.key.clone(), AuditEventKind::PhaseTransition { from, to })
                .with_fingerprint(saved.spec.fingerprint.clone()),
        );
        tracing::info!(resource = %saved.key, %from, %to, "phase transition");
        Ok(saved)
    }

    /// Persist a transient failure, or fail once the budget is spent
    async fn record_retry(
        &self,
        key: &ObjectKey,
        phase: Phase,
        err: &ReconcileError,
    ) -> Result<ReconcileAction, ReconcileError> {
        record_error(err.kind());
        let Some(mut obj) = self.store.get(key).await? else {
            return Ok(ReconcileAction::Done);
        };
        if obj.phase() != phase {
            return Ok(ReconcileAction::Continue);
        }
        let attempts = obj
            .status
            .retry
            .as_ref()
            .filter(|r| r.phase == phase)
            .map_or(0, |r| r.attempts)
            + 1;
        if attempts > self.config.max_retries {
            let message = format!("{attempts} attempts in {phase}; last error: {err}");
            self.fail(key, RETRY_BUDGET_EXHAUSTED, &message).await?;
            return Ok(ReconcileAction::Done);
        }

        let delay = self.backoff.delay(attempts);
        let next_attempt_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        obj.status.retry = Some(RetryState {
            phase,
            attempts,
            last_error: err.to_string(),
            next_attempt_at,
        });
        self.store.update(obj).await?;
        tracing::warn!(resource = %key, %phase, attempts, ?delay, error = %err, "transient failure; retrying");
        Ok(ReconcileAction::RequeueAfter(delay))
    }

    /// Move a resource to `Failed`
    async fn fail(&self, key: &ObjectKey, reason: &str, message: &str) -> Result<(), ReconcileError> {
        let Some(mut obj) = self.store.get(key).await? else {
            return Ok(());
        };
        let phase = obj.phase();
        if phase.is_terminal() {
            return Ok(());
        }
        let now = Utc::now();
        obj.status.failure = Some(FailureInfo {
            phase,
            reason: reason.to_string(),
            message: message.to_string(),
        });
        obj.status.set_condition(
            ConditionType::ProcessingComplete,
            ConditionStatus::False,
            reason,
            message,
            now,
        );
        record_error("fatal");
        tracing::warn!(resource = %key, %phase, reason, message, "processing failed");
        let saved = self.transition(obj, Phase::Failed).await?;
        self.audit.emit(
            AuditEvent::for_resource(
                saved.key.clone(),
                AuditEventKind::ProcessingFailed {
                    phase,
                    reason: reason.to_string(),
                    message: message.to_string(),
                },
            )
            .with_fingerprint(saved.spec.fingerprint.clone()),
        );
        Ok(())
    }
}

/// Context persisted by the enriching phase, or a degraded stand-in
fn context_of(obj: &SignalProcessing) -> EnrichmentContext {
    obj.status.enrichment.clone().unwrap_or_else(|| {
        EnrichmentContext::degraded(obj.spec.target.clone(), "enrichment context missing")
    })
}
