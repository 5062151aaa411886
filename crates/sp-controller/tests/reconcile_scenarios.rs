//! End-to-end reconcile scenarios over in-memory backends

use pretty_assertions::assert_eq;
use sp_controller::{ReconcileAction, RETRY_BUDGET_EXHAUSTED};
use sp_policy::PolicyDomain;
use sp_test_utils::{
    bare_pod, crashloop_signal, fast_config, prod_payment_cluster, signal, Harness,
};
use sp_types::{
    ClassificationSource, ConditionStatus, ConditionType, DetectionCategory, Environment,
    LabelRejectionReason, Phase, Priority, ResourceRef, SignalMode,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn names(events: &[sp_audit::AuditEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

#[tokio::test]
async fn critical_production_signal_completes_without_policies() {
    let h = Harness::prod_payment();
    let key = h.submit("crashloop", crashloop_signal()).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Completed);
    assert!(obj.status.completed_at.is_some());
    assert!(obj.status.retry.is_none());

    let env = obj.status.environment.as_ref().unwrap();
    assert_eq!(env.value, Environment::Production);
    assert_eq!(env.source, ClassificationSource::Fallback);

    let priority = obj.status.priority.as_ref().unwrap();
    assert_eq!(priority.value, Priority::P0);
    assert_eq!(priority.source, ClassificationSource::Fallback);

    let business = obj.status.business.as_ref().unwrap();
    assert_eq!(business.business_unit.value, "payments");
    assert_eq!(business.service_owner.value, "team-checkout");

    let chain = obj.status.owner_chain.as_ref().unwrap();
    let kinds: Vec<&str> = chain.entries.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["ReplicaSet", "Deployment"]);

    let detected = obj.status.detected_labels.as_ref().unwrap();
    assert!(detected.is_detected(DetectionCategory::PdbProtected));
    assert!(detected.is_detected(DetectionCategory::HpaEnabled));
    assert!(!detected.is_detected(DetectionCategory::Stateful));

    assert_eq!(obj.status.signal_mode.as_ref().unwrap().mode, SignalMode::Reactive);
    assert_eq!(obj.status.policy_version, None);
    for condition in [
        ConditionType::EnrichmentComplete,
        ConditionType::ClassificationComplete,
        ConditionType::CategorizationComplete,
        ConditionType::ProcessingComplete,
    ] {
        assert_eq!(
            obj.status.condition(condition).map(|c| c.status),
            Some(ConditionStatus::True),
            "{condition:?}"
        );
    }

    let history: Vec<Phase> = obj.status.phase_history.iter().map(|t| t.phase).collect();
    assert_eq!(
        history,
        vec![
            Phase::Pending,
            Phase::Enriching,
            Phase::Classifying,
            Phase::Categorizing,
            Phase::Completed
        ]
    );

    let events = h.audit_events().await;
    assert_eq!(
        names(&events),
        vec![
            "phase_transition",
            "phase_transition",
            "classified",
            "phase_transition",
            "phase_transition",
        ]
    );
    assert!(events
        .iter()
        .all(|e| e.fingerprint.as_deref() == Some("fp-KubePodCrashLooping")));
}

#[tokio::test]
async fn unreachable_cluster_degrades_but_completes() {
    let h = Harness::prod_payment();
    h.cluster.set_unavailable(true);
    let key = h.submit("blind", crashloop_signal()).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Completed);

    let ctx = obj.status.enrichment.as_ref().unwrap();
    assert!(ctx.degraded);
    assert!(!ctx.degraded_reasons.is_empty());
    assert_eq!(
        obj.status.condition(ConditionType::EnrichmentComplete).unwrap().reason,
        "EnrichmentDegraded"
    );

    // Namespace prefix still identifies production, at reduced confidence
    let env = obj.status.environment.as_ref().unwrap();
    assert_eq!(env.value, Environment::Production);
    assert!(env.confidence > 0.0 && env.confidence < 0.7);

    let events = h.audit_events().await;
    assert!(names(&events).contains(&"enrichment_degraded"));
}

#[tokio::test]
async fn pod_without_owners_has_empty_chain() {
    let h = Harness::prod_payment();
    let key = h.submit("bare", signal("KubePodOOMKilled", "warning", bare_pod())).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Completed);
    let chain = obj.status.owner_chain.as_ref().unwrap();
    assert!(chain.is_empty());
    assert!(!chain.truncated);
    assert_eq!(obj.status.priority.as_ref().unwrap().value, Priority::P1);
}

#[tokio::test]
async fn missing_target_fails_in_enrichment() {
    let h = Harness::prod_payment();
    let target = ResourceRef::new("prod-payment", "Pod", "ghost");
    let key = h.submit("ghost", signal("KubePodCrashLooping", "critical", target)).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Failed);
    let failure = obj.status.failure.as_ref().unwrap();
    assert_eq!(failure.phase, Phase::Enriching);
    assert_eq!(failure.reason, "TargetNotFound");
    assert_eq!(
        obj.status.condition(ConditionType::ProcessingComplete).unwrap().status,
        ConditionStatus::False
    );

    let events = h.audit_events().await;
    assert_eq!(names(&events).last(), Some(&"processing_failed"));
}

#[tokio::test]
async fn missing_namespace_fails() {
    let h = Harness::prod_payment();
    let target = ResourceRef::new("nowhere", "Pod", "api-0");
    let key = h.submit("lost", signal("KubePodCrashLooping", "critical", target)).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.status.failure.as_ref().unwrap().reason, "NamespaceNotFound");
}

#[tokio::test]
async fn incomplete_target_fails_before_enrichment() {
    let h = Harness::prod_payment();
    let target = ResourceRef::new("prod-payment", "Pod", "");
    let key = h.submit("nameless", signal("KubePodCrashLooping", "critical", target)).await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Failed);
    let failure = obj.status.failure.as_ref().unwrap();
    assert_eq!(failure.phase, Phase::Pending);
    assert_eq!(failure.reason, "InvalidTarget");
    assert_eq!(h.cluster.calls(), 0);
}

#[tokio::test]
async fn terminal_objects_are_left_alone() {
    let h = Harness::prod_payment();
    let key = h.submit("done", crashloop_signal()).await;
    let completed = h.run(&key).await;
    let emitted = h.audit.stats().emitted;

    let action = h
        .reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(h.get(&key).await, completed);
    assert_eq!(h.audit.stats().emitted, emitted);
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let h = Harness::prod_payment();
    let key = h.submit("flaky", crashloop_signal()).await;
    h.store.fail_next_transitions(2);

    let first = h
        .reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(first, ReconcileAction::RequeueAfter(_)));
    let retry = h.get(&key).await.status.retry.unwrap();
    assert_eq!(retry.phase, Phase::Pending);
    assert_eq!(retry.attempts, 1);

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Completed);
    assert!(obj.status.retry.is_none());
}

#[tokio::test]
async fn exhausted_retry_budget_fails_the_object() {
    let h = Harness::prod_payment();
    let key = h.submit("doomed", crashloop_signal()).await;
    let max_retries = h.config.reconcile.max_retries;
    h.store.fail_next_transitions(max_retries + 1);

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Failed);
    let failure = obj.status.failure.as_ref().unwrap();
    assert_eq!(failure.reason, RETRY_BUDGET_EXHAUSTED);
    assert_eq!(failure.phase, Phase::Pending);
}

#[tokio::test(start_paused = true)]
async fn stalled_enrichment_hits_the_pass_deadline() {
    let mut config = fast_config();
    config.reconcile = config.reconcile.with_pass_timeout(Duration::from_millis(200));
    config.enrichment = config.enrichment.with_timeout(Duration::from_secs(60));
    let h = Harness::new(prod_payment_cluster(), config);
    h.cluster.set_latency(Duration::from_secs(30));
    let key = h.submit("stalled", crashloop_signal()).await;
    let cancel = CancellationToken::new();

    let first = h.reconciler.reconcile(&key, &cancel).await.unwrap();
    assert_eq!(first, ReconcileAction::Continue);

    let second = h.reconciler.reconcile(&key, &cancel).await.unwrap();
    let ReconcileAction::RequeueAfter(delay) = second else {
        panic!("expected a requeue, got {second:?}");
    };
    assert!(delay > Duration::ZERO);

    let obj = h.get(&key).await;
    assert_eq!(obj.phase(), Phase::Enriching);
    assert!(obj.status.enrichment.is_none());
    let retry = obj.status.retry.as_ref().unwrap();
    assert_eq!(retry.phase, Phase::Enriching);
    assert_eq!(retry.attempts, 1);
    assert!(retry.last_error.contains("deadline"), "{}", retry.last_error);

    // Every later attempt stalls too
    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Failed);
    let failure = obj.status.failure.as_ref().unwrap();
    assert_eq!(failure.reason, RETRY_BUDGET_EXHAUSTED);
    assert_eq!(failure.phase, Phase::Enriching);
}

#[tokio::test]
async fn cancelled_pass_persists_nothing() {
    let h = Harness::prod_payment();
    let key = h.submit("cancelled", crashloop_signal()).await;
    let before = h.get(&key).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.reconciler.reconcile(&key, &cancel).await.unwrap_err();
    assert!(matches!(err, sp_controller::ReconcileError::Cancelled));
    assert_eq!(h.get(&key).await, before);
}

#[tokio::test]
async fn deleted_object_is_done() {
    let h = Harness::prod_payment();
    let key = h.submit("gone", crashloop_signal()).await;
    sp_controller::SignalProcessingStore::delete(h.store.as_ref(), &key)
        .await
        .unwrap();

    let action = h
        .reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(action, ReconcileAction::Done);
}

const PRIORITY_RULES: &str = r"
rules:
  - name: checkout-always-p1
    when: {equals: {path: signal.labels.team, value: checkout}}
    then: {value: P1}
";

const CUSTOM_LABEL_RULES: &str = r"
mode: collect
rules:
  - name: team
    when: {exists: signal.labels.team}
    then: {key: team, from: signal.labels.team}
  - name: override-environment
    then: {key: environment, value: staging}
";

#[tokio::test]
async fn policies_drive_priority_and_custom_labels() {
    let h = Harness::prod_payment();
    let version = h.install_policies(&[
        (PolicyDomain::Priority, PRIORITY_RULES),
        (PolicyDomain::CustomLabels, CUSTOM_LABEL_RULES),
    ]);
    let key = h
        .submit("policy", crashloop_signal().with_label("team", "checkout"))
        .await;

    let obj = h.run(&key).await;
    assert_eq!(obj.phase(), Phase::Completed);
    assert_eq!(obj.status.policy_version, Some(version));

    let priority = obj.status.priority.as_ref().unwrap();
    assert_eq!(priority.value, Priority::P1);
    assert_eq!(priority.source, ClassificationSource::Policy);

    // Reserved keys are rejected; the environment keeps its own classification
    assert_eq!(
        obj.status.custom_labels.get("team"),
        Some(&vec!["checkout".to_string()])
    );
    assert!(!obj.status.custom_labels.contains_key("environment"));
    assert_eq!(obj.status.rejected_label_writes.len(), 1);
    assert_eq!(
        obj.status.rejected_label_writes[0].reason,
        LabelRejectionReason::ReservedKey
    );
    assert_eq!(
        obj.status.environment.as_ref().unwrap().value,
        Environment::Production
    );

    let events = h.audit_events().await;
    assert!(names(&events).contains(&"custom_label_rejected"));
}

#[tokio::test]
async fn long_signal_labels_are_truncated() {
    let h = Harness::prod_payment();
    let long = "x".repeat(200);
    let key = h
        .submit("long", crashloop_signal().with_label("description", long.clone()))
        .await;

    let obj = h.run(&key).await;
    let stored = obj.status.signal_labels.get("description").unwrap();
    assert_eq!(stored.chars().count(), 63);
    assert_eq!(obj.status.truncated_labels, vec!["description".to_string()]);
    // The request itself is never rewritten
    assert_eq!(obj.spec.labels.get("description"), Some(&long));
}
