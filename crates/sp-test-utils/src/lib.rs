//! Testing utilities for the signal processing workspace
//!
//! Shared fixtures, a reconciler harness over in-memory backends, and
//! policy directory helpers.

#![allow(missing_docs)]

use sp_audit::{AuditConfig, AuditEmitter, AuditEvent, MemorySink};
use sp_classifier::Classifiers;
use sp_controller::{ControllerConfig, InMemoryStore, Reconciler, SignalProcessingStore};
use sp_enrichment::{ClusterFixture, InMemoryCluster, K8sEnricher, LabelDetector};
use sp_policy::{PolicyBundle, PolicyDomain, PolicyEngine, PolicyStore};
use sp_types::{ObjectKey, ResourceRef, SignalProcessing, SignalRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Namespace the test objects live in
pub const CONTROL_NAMESPACE: &str = "kubernaut-system";

/// prod-payment: a Deployment-managed pod, a bare pod, a PDB and an HPA
pub const PROD_PAYMENT_CLUSTER: &str = r"
namespaces:
  - kind: Namespace
    name: prod-payment
    labels:
      kubernaut.ai/business-unit: payments
      kubernaut.ai/criticality: high
  - kind: Namespace
    name: dev-sandbox
objects:
  - kind: Pod
    namespace: prod-payment
    name: api-7d9f-x2
    labels: { app: api }
    ownerReferences: [{ kind: ReplicaSet, name: api-7d9f, controller: true }]
  - kind: ReplicaSet
    namespace: prod-payment
    name: api-7d9f
    ownerReferences: [{ kind: Deployment, name: api, controller: true }]
  - kind: Deployment
    namespace: prod-payment
    name: api
    labels:
      app: api
      kubernaut.ai/service-owner: team-checkout
  - kind: Pod
    namespace: prod-payment
    name: debug-shell
  - kind: Pod
    namespace: dev-sandbox
    name: scratch
disruptionBudgets:
  prod-payment: [{ name: api, matchLabels: { app: api } }]
autoscalers:
  prod-payment: [{ name: api, targetKind: Deployment, targetName: api }]
";

pub fn prod_payment_cluster() -> InMemoryCluster {
    InMemoryCluster::from_fixture(ClusterFixture::from_yaml(PROD_PAYMENT_CLUSTER).unwrap())
}

pub fn api_pod() -> ResourceRef {
    ResourceRef::new("prod-payment", "Pod", "api-7d9f-x2")
}

pub fn bare_pod() -> ResourceRef {
    ResourceRef::new("prod-payment", "Pod", "debug-shell")
}

pub fn signal(name: &str, severity: &str, target: ResourceRef) -> SignalRequest {
    SignalRequest::new(name, severity, target).with_fingerprint(format!("fp-{name}"))
}

pub fn crashloop_signal() -> SignalRequest {
    signal("KubePodCrashLooping", "critical", api_pod())
}

/// Short timeouts and millisecond backoff
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.reconcile = config
        .reconcile
        .with_pass_timeout(Duration::from_secs(5))
        .with_max_retries(3)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(10));
    config.enrichment = config
        .enrichment
        .with_timeout(Duration::from_millis(500))
        .with_cache(false);
    config.audit.emitter = AuditConfig::default().with_capacity(4096);
    config
}

/// Write `(file name, contents)` pairs into a fresh directory
pub fn write_policies(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        write_file(dir.path(), name, contents);
    }
    dir
}

/// Replace a file atomically so watchers never read it half-written
pub fn write_file(dir: &Path, name: &str, contents: &str) {
    let tmp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, contents).unwrap();
    std::fs::rename(&tmp, dir.join(name)).unwrap();
}

/// Reconciler over in-memory backends, with audit events captured
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cluster: Arc<InMemoryCluster>,
    pub policy_store: Arc<PolicyStore>,
    pub audit: AuditEmitter,
    pub sink: MemorySink,
    pub reconciler: Arc<Reconciler>,
    pub config: ControllerConfig,
}

impl Harness {
    pub fn new(cluster: InMemoryCluster, config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cluster = Arc::new(cluster);
        let policy_store = Arc::new(PolicyStore::new());
        let engine = Arc::new(PolicyEngine::new(Arc::clone(&policy_store)));
        let audit = AuditEmitter::new(config.audit.emitter);
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(K8sEnricher::new(cluster.clone(), config.enrichment.clone())),
            Classifiers::new(engine, &config.classification()),
            Arc::new(LabelDetector::new()),
            audit.clone(),
            config.reconcile,
        )
        .with_policy_store(Arc::clone(&policy_store));
        Self {
            store,
            cluster,
            policy_store,
            audit,
            sink: MemorySink::new(),
            reconciler: Arc::new(reconciler),
            config,
        }
    }

    /// Harness over the prod-payment fixture with [`fast_config`]
    pub fn prod_payment() -> Self {
        Self::new(prod_payment_cluster(), fast_config())
    }

    /// Install rule sets as the active bundle
    pub fn install_policies(&self, sources: &[(PolicyDomain, &str)]) -> u64 {
        self.policy_store
            .install(PolicyBundle::from_sources(sources.iter().copied()).unwrap())
    }

    pub async fn submit(&self, name: &str, spec: SignalRequest) -> ObjectKey {
        let key = ObjectKey::new(CONTROL_NAMESPACE, name);
        let obj = SignalProcessing::new(key.clone(), format!("uid-{name}"), spec);
        self.store.create(obj).await.unwrap();
        key
    }

    pub async fn get(&self, key: &ObjectKey) -> SignalProcessing {
        self.store.get(key).await.unwrap().unwrap()
    }

    /// Reconcile to a terminal phase
    pub async fn run(&self, key: &ObjectKey) -> SignalProcessing {
        self.reconciler
            .run_to_completion(key, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap()
    }

    /// Everything emitted so far, in order
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.flush(&self.sink).await;
        self.sink.events()
    }
}
