//! Enrichment context
//!
//! Cluster metadata gathered for one reconcile pass. Every cluster-backed
//! field is optional: `None` means the lookup failed or did not finish in
//! time, which is different from "looked and found nothing" (`Some` of an
//! empty collection). Detectors rely on that distinction.

use crate::resource::{OwnerChain, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Labels and annotations of one object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContext {
    /// Object kind
    pub kind: String,
    /// Object name
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectContext {
    /// Create context with no labels
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Label value
    #[inline]
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Annotation value
    #[inline]
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// PodDisruptionBudget reduced to what detection needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionBudgetSummary {
    /// Budget name
    pub name: String,
    /// `matchLabels` of the budget selector; empty selects nothing
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl DisruptionBudgetSummary {
    /// Whether the selector matches the given pod labels
    #[must_use]
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_labels.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// HorizontalPodAutoscaler reduced to its scale target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSummary {
    /// Autoscaler name
    pub name: String,
    /// Kind of the scale target
    pub target_kind: String,
    /// Name of the scale target
    pub target_name: String,
}

/// Cluster context for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentContext {
    /// Resource the signal targets
    pub target: ResourceRef,
    /// Namespace metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<ObjectContext>,
    /// Target object metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectContext>,
    /// Root-most owner metadata (the workload)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<ObjectContext>,
    /// Resolved owner chain
    #[serde(default)]
    pub owner_chain: OwnerChain,
    /// Disruption budgets in the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disruption_budgets: Option<Vec<DisruptionBudgetSummary>>,
    /// Autoscalers in the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscalers: Option<Vec<AutoscalerSummary>>,
    /// Network policy names in the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policies: Option<Vec<String>>,
    /// Resource quota names in the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quotas: Option<Vec<String>>,
    /// Some lookups failed or timed out
    #[serde(default)]
    pub degraded: bool,
    /// Why the context is degraded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_reasons: Vec<String>,
    /// When the context was assembled
    pub fetched_at: DateTime<Utc>,
}

impl EnrichmentContext {
    /// Empty context for a target; nothing fetched yet
    #[must_use]
    pub fn new(target: ResourceRef) -> Self {
        Self {
            target,
            namespace: None,
            object: None,
            workload: None,
            owner_chain: OwnerChain::empty(),
            disruption_budgets: None,
            autoscalers: None,
            network_policies: None,
            resource_quotas: None,
            degraded: false,
            degraded_reasons: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Fully degraded context carrying only the target
    #[must_use]
    pub fn degraded(target: ResourceRef, reason: impl Into<String>) -> Self {
        let mut ctx = Self::new(target);
        ctx.mark_degraded(reason);
        ctx
    }

    /// Record a degradation reason
    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        self.degraded = true;
        self.degraded_reasons.push(reason.into());
    }

    /// Namespace label lookup
    #[must_use]
    pub fn namespace_label(&self, key: &str) -> Option<&str> {
        self.namespace.as_ref().and_then(|ns| ns.label(key))
    }

    /// Workload label lookup, falling back to the target object
    #[must_use]
    pub fn workload_label(&self, key: &str) -> Option<&str> {
        self.workload
            .as_ref()
            .and_then(|w| w.label(key))
            .or_else(|| self.object.as_ref().and_then(|o| o.label(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_nothing() {
        let pdb = DisruptionBudgetSummary {
            name: "any".into(),
            match_labels: BTreeMap::new(),
        };
        let labels = BTreeMap::from([("app".to_string(), "api".to_string())]);
        assert!(!pdb.selects(&labels));
    }

    #[test]
    fn selector_requires_all_labels() {
        let pdb = DisruptionBudgetSummary {
            name: "api".into(),
            match_labels: BTreeMap::from([
                ("app".to_string(), "api".to_string()),
                ("tier".to_string(), "web".to_string()),
            ]),
        };
        let mut labels = BTreeMap::from([("app".to_string(), "api".to_string())]);
        assert!(!pdb.selects(&labels));
        labels.insert("tier".into(), "web".into());
        assert!(pdb.selects(&labels));
    }

    #[test]
    fn degraded_context_records_reason() {
        let ctx = EnrichmentContext::degraded(
            ResourceRef::new("ns", "Pod", "p"),
            "namespace lookup timed out",
        );
        assert!(ctx.degraded);
        assert_eq!(ctx.degraded_reasons.len(), 1);
        assert!(ctx.namespace.is_none());
    }

    #[test]
    fn workload_label_falls_back_to_object() {
        let mut ctx = EnrichmentContext::new(ResourceRef::new("ns", "Pod", "p"));
        let mut obj = ObjectContext::new("Pod", "p");
        obj.labels.insert("team".into(), "core".into());
        ctx.object = Some(obj);
        assert_eq!(ctx.workload_label("team"), Some("core"));
    }
}
