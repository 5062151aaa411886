//! In-memory cluster
//!
//! Serves metadata from a fixture for simulation and tests, with injectable
//! latency and per-operation failures. Fixtures are YAML:
//!
//! ```yaml
//! namespaces:
//!   - kind: Namespace
//!     name: prod-payment
//!     labels: { kubernaut.ai/environment: production }
//! objects:
//!   - kind: Pod
//!     namespace: prod-payment
//!     name: api-7d9f-x2
//!     ownerReferences: [{ kind: ReplicaSet, name: api-7d9f, controller: true }]
//! disruptionBudgets:
//!   prod-payment: [{ name: api, matchLabels: { app: api } }]
//! ```

use crate::cluster::{ClusterApi, ObjectMeta};
use crate::error::ClusterError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sp_types::{AutoscalerSummary, DisruptionBudgetSummary, ResourceRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Serializable cluster contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFixture {
    /// Namespaces
    #[serde(default)]
    pub namespaces: Vec<ObjectMeta>,
    /// Namespaced objects
    #[serde(default)]
    pub objects: Vec<ObjectMeta>,
    /// PodDisruptionBudgets per namespace
    #[serde(default)]
    pub disruption_budgets: BTreeMap<String, Vec<DisruptionBudgetSummary>>,
    /// HorizontalPodAutoscalers per namespace
    #[serde(default)]
    pub autoscalers: BTreeMap<String, Vec<AutoscalerSummary>>,
    /// NetworkPolicy names per namespace
    #[serde(default)]
    pub network_policies: BTreeMap<String, Vec<String>>,
    /// ResourceQuota names per namespace
    #[serde(default)]
    pub resource_quotas: BTreeMap<String, Vec<String>>,
}

impl ClusterFixture {
    /// Parse a YAML fixture
    ///
    /// # Errors
    /// YAML syntax or shape errors.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }
}

/// Cluster operations, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOperation {
    /// `get_namespace`
    GetNamespace,
    /// `get_object`
    GetObject,
    /// `list_disruption_budgets`
    ListDisruptionBudgets,
    /// `list_autoscalers`
    ListAutoscalers,
    /// `list_network_policies`
    ListNetworkPolicies,
    /// `list_resource_quotas`
    ListResourceQuotas,
}

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: HashMap<String, ObjectMeta>,
    objects: HashMap<ResourceRef, ObjectMeta>,
    fixture: ClusterFixture,
}

/// Fixture-backed [`ClusterApi`]
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    latency: RwLock<Duration>,
    failing: RwLock<HashSet<ClusterOperation>>,
    unavailable: RwLock<bool>,
    calls: AtomicU64,
}

impl InMemoryCluster {
    /// Empty cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster serving a fixture
    #[must_use]
    pub fn from_fixture(fixture: ClusterFixture) -> Self {
        let cluster = Self::new();
        cluster.load(fixture);
        cluster
    }

    /// Replace the cluster contents
    pub fn load(&self, fixture: ClusterFixture) {
        let namespaces = fixture
            .namespaces
            .iter()
            .map(|ns| (ns.name.clone(), ns.clone()))
            .collect();
        let objects = fixture
            .objects
            .iter()
            .map(|o| (o.reference(), o.clone()))
            .collect();
        *self.state.write() = ClusterState {
            namespaces,
            objects,
            fixture,
        };
    }

    /// Add or replace a namespace
    pub fn insert_namespace(&self, meta: ObjectMeta) {
        self.state.write().namespaces.insert(meta.name.clone(), meta);
    }

    /// Add or replace an object
    pub fn insert_object(&self, meta: ObjectMeta) {
        self.state.write().objects.insert(meta.reference(), meta);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Make every call fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    /// Make one operation fail with `Unavailable`
    pub fn fail_operation(&self, op: ClusterOperation) {
        self.failing.write().insert(op);
    }

    /// Number of calls served (including failed ones)
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn enter(&self, op: ClusterOperation) -> Result<(), ClusterError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if *self.unavailable.read() {
            return Err(ClusterError::Unavailable("connection refused".into()));
        }
        if self.failing.read().contains(&op) {
            return Err(ClusterError::Unavailable(format!("{op:?} failed")));
        }
        Ok(())
    }

    fn list<T: Clone>(
        &self,
        namespace: &str,
        pick: impl Fn(&ClusterFixture) -> &BTreeMap<String, Vec<T>>,
    ) -> Vec<T> {
        let state = self.state.read();
        pick(&state.fixture)
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get_namespace(&self, name: &str) -> Result<ObjectMeta, ClusterError> {
        self.enter(ClusterOperation::GetNamespace).await?;
        self.state
            .read()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(format!("Namespace/{name}")))
    }

    async fn get_object(&self, target: &ResourceRef) -> Result<ObjectMeta, ClusterError> {
        self.enter(ClusterOperation::GetObject).await?;
        self.state
            .read()
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(target))
    }

    async fn list_disruption_budgets(
        &self,
        namespace: &str,
    ) -> Result<Vec<DisruptionBudgetSummary>, ClusterError> {
        self.enter(ClusterOperation::ListDisruptionBudgets).await?;
        Ok(self.list(namespace, |f| &f.disruption_budgets))
    }

    async fn list_autoscalers(
        &self,
        namespace: &str,
    ) -> Result<Vec<AutoscalerSummary>, ClusterError> {
        self.enter(ClusterOperation::ListAutoscalers).await?;
        Ok(self.list(namespace, |f| &f.autoscalers))
    }

    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        self.enter(ClusterOperation::ListNetworkPolicies).await?;
        Ok(self.list(namespace, |f| &f.network_policies))
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        self.enter(ClusterOperation::ListResourceQuotas).await?;
        Ok(self.list(namespace, |f| &f.resource_quotas))
    }
}
