//! Test doubles for classifier unit tests

use async_trait::async_trait;
use serde_json::Value;
use sp_policy::{Decision, Evaluation, EvaluationBudget, PolicyDomain, PolicyError, PolicyEvaluator};
use sp_types::{EnrichmentContext, ObjectContext, ResourceRef};
use std::time::Duration;

/// Evaluator returning the same outcome for every domain
pub(crate) struct FixedEvaluator {
    outcome: Result<Vec<Decision>, fn(PolicyDomain) -> PolicyError>,
}

impl FixedEvaluator {
    pub(crate) fn decisions(decisions: Vec<Decision>) -> Self {
        Self {
            outcome: Ok(decisions),
        }
    }

    pub(crate) fn value(value: impl Into<Value>) -> Self {
        Self::decisions(vec![Decision {
            rule: "fixed".into(),
            key: None,
            value: value.into(),
            confidence: None,
        }])
    }

    pub(crate) fn keyed(pairs: &[(&str, Value)]) -> Self {
        Self::decisions(
            pairs
                .iter()
                .map(|(k, v)| Decision {
                    rule: format!("set-{k}"),
                    key: Some((*k).to_string()),
                    value: v.clone(),
                    confidence: None,
                })
                .collect(),
        )
    }

    pub(crate) fn not_loaded() -> Self {
        Self {
            outcome: Err(PolicyError::NotLoaded),
        }
    }

    pub(crate) fn timeout() -> Self {
        Self {
            outcome: Err(|_| PolicyError::Timeout(Duration::from_millis(1))),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for FixedEvaluator {
    async fn evaluate(
        &self,
        domain: PolicyDomain,
        _input: &Value,
        _budget: &EvaluationBudget,
    ) -> sp_policy::Result<Evaluation> {
        match &self.outcome {
            Ok(decisions) => Ok(Evaluation {
                decisions: decisions.clone(),
                bundle_version: 1,
                ..Evaluation::default()
            }),
            Err(make) => Err(make(domain)),
        }
    }
}

/// Context for a pod in `namespace` whose namespace carries `labels`
pub(crate) fn ctx_with_namespace_labels(namespace: &str, labels: &[(&str, &str)]) -> EnrichmentContext {
    let mut ctx = EnrichmentContext::new(ResourceRef::new(namespace, "Pod", "p"));
    let mut ns = ObjectContext::new("Namespace", namespace);
    for (k, v) in labels {
        ns.labels.insert((*k).to_string(), (*v).to_string());
    }
    ctx.namespace = Some(ns);
    ctx.object = Some(ObjectContext::new("Pod", "p"));
    ctx
}
