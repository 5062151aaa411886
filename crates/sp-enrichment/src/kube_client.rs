//! Live cluster access through kube-rs
//!
//! Typed APIs serve the list calls; arbitrary target and owner kinds are
//! fetched as dynamic objects using a table of well-known kinds.

use crate::cluster::{ClusterApi, ObjectMeta, OwnerReference};
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{Api, Client, ResourceExt};
use sp_types::{AutoscalerSummary, DisruptionBudgetSummary, ResourceRef};

/// (group, version, kind, plural, namespaced)
const KNOWN_KINDS: &[(&str, &str, &str, &str, bool)] = &[
    ("", "v1", "Pod", "pods", true),
    ("", "v1", "Service", "services", true),
    ("", "v1", "ConfigMap", "configmaps", true),
    ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
    ("", "v1", "Node", "nodes", false),
    ("", "v1", "PersistentVolume", "persistentvolumes", false),
    ("apps", "v1", "ReplicaSet", "replicasets", true),
    ("apps", "v1", "Deployment", "deployments", true),
    ("apps", "v1", "StatefulSet", "statefulsets", true),
    ("apps", "v1", "DaemonSet", "daemonsets", true),
    ("batch", "v1", "Job", "jobs", true),
    ("batch", "v1", "CronJob", "cronjobs", true),
    ("argoproj.io", "v1alpha1", "Rollout", "rollouts", true),
];

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the ambient kubeconfig or in-cluster service account
    ///
    /// # Errors
    /// No usable configuration.
    pub async fn try_default() -> Result<Self, ClusterError> {
        Client::try_default()
            .await
            .map(Self::new)
            .map_err(|e| ClusterError::Unavailable(e.to_string()))
    }

    fn dynamic_api(&self, target: &ResourceRef) -> Result<Api<DynamicObject>, ClusterError> {
        let (group, version, kind, plural, namespaced) = KNOWN_KINDS
            .iter()
            .copied()
            .find(|(_, _, k, _, _)| *k == target.kind)
            .ok_or_else(|| ClusterError::UnsupportedKind(target.kind.clone()))?;
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        Ok(if namespaced {
            Api::namespaced_with(self.client.clone(), &target.namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        })
    }
}

fn map_error(err: kube::Error, what: &str) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::not_found(what),
        kube::Error::Api(resp) if resp.code == 403 => ClusterError::Forbidden(resp.message),
        other => ClusterError::Unavailable(other.to_string()),
    }
}

fn meta_from(
    kind: &str,
    namespace: &str,
    meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) -> ObjectMeta {
    ObjectMeta {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: meta.name.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        owner_references: meta
            .owner_references
            .iter()
            .flatten()
            .map(|o| OwnerReference {
                kind: o.kind.clone(),
                name: o.name.clone(),
                controller: o.controller.unwrap_or(false),
            })
            .collect(),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_namespace(&self, name: &str) -> Result<ObjectMeta, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get(name)
            .await
            .map_err(|e| map_error(e, &format!("Namespace/{name}")))?;
        Ok(meta_from("Namespace", "", &ns.metadata))
    }

    async fn get_object(&self, target: &ResourceRef) -> Result<ObjectMeta, ClusterError> {
        let api = self.dynamic_api(target)?;
        let obj = api
            .get(&target.name)
            .await
            .map_err(|e| map_error(e, &target.to_string()))?;
        Ok(meta_from(&target.kind, &target.namespace, &obj.metadata))
    }

    async fn list_disruption_budgets(
        &self,
        namespace: &str,
    ) -> Result<Vec<DisruptionBudgetSummary>, ClusterError> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, "PodDisruptionBudgets"))?;
        Ok(list
            .items
            .iter()
            .map(|pdb| DisruptionBudgetSummary {
                name: pdb.name_any(),
                match_labels: pdb
                    .spec
                    .as_ref()
                    .and_then(|s| s.selector.as_ref())
                    .and_then(|s| s.match_labels.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn list_autoscalers(
        &self,
        namespace: &str,
    ) -> Result<Vec<AutoscalerSummary>, ClusterError> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, "HorizontalPodAutoscalers"))?;
        Ok(list
            .items
            .iter()
            .filter_map(|hpa| {
                let target = &hpa.spec.as_ref()?.scale_target_ref;
                Some(AutoscalerSummary {
                    name: hpa.name_any(),
                    target_kind: target.kind.clone(),
                    target_name: target.name.clone(),
                })
            })
            .collect())
    }

    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, "NetworkPolicies"))?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, "ResourceQuotas"))?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }
}
