//! Cluster API seam
//!
//! Everything the enricher reads from the cluster goes through
//! [`ClusterApi`]. Implementations ship for an in-memory cluster
//! ([`InMemoryCluster`](crate::InMemoryCluster)) and, behind the `kube`
//! feature, a live API server.

use crate::error::ClusterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sp_types::{AutoscalerSummary, DisruptionBudgetSummary, ObjectContext, ResourceRef};
use std::collections::BTreeMap;

/// Owner reference on an object; the owner lives in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Owner kind
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Whether this is the managing controller
    #[serde(default)]
    pub controller: bool,
}

/// Metadata of a namespace or namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Kind
    pub kind: String,
    /// Namespace; empty for cluster-scoped objects
    #[serde(default)]
    pub namespace: String,
    /// Name
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Owner references
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata with no labels or owners
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference
    #[must_use]
    pub fn with_owner(mut self, kind: impl Into<String>, name: impl Into<String>, controller: bool) -> Self {
        self.owner_references.push(OwnerReference {
            kind: kind.into(),
            name: name.into(),
            controller,
        });
        self
    }

    /// Reference to this object
    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.namespace.clone(), self.kind.clone(), self.name.clone())
    }

    /// The controller owner, falling back to the first owner
    #[must_use]
    pub fn primary_owner(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|o| o.controller)
            .or_else(|| self.owner_references.first())
    }

    /// Labels and annotations as enrichment context
    #[must_use]
    pub fn to_context(&self) -> ObjectContext {
        ObjectContext {
            kind: self.kind.clone(),
            name: self.name.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// Read-only cluster queries used by enrichment
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace metadata
    async fn get_namespace(&self, name: &str) -> Result<ObjectMeta, ClusterError>;

    /// Object metadata including owner references
    async fn get_object(&self, target: &ResourceRef) -> Result<ObjectMeta, ClusterError>;

    /// PodDisruptionBudgets in a namespace
    async fn list_disruption_budgets(
        &self,
        namespace: &str,
    ) -> Result<Vec<DisruptionBudgetSummary>, ClusterError>;

    /// HorizontalPodAutoscalers in a namespace
    async fn list_autoscalers(&self, namespace: &str)
        -> Result<Vec<AutoscalerSummary>, ClusterError>;

    /// NetworkPolicy names in a namespace
    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;

    /// ResourceQuota names in a namespace
    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;
}
