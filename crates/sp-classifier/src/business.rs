//! Business classification
//!
//! Four independent dimensions, each resolved on its own chain:
//!
//! | dimension       | policy key     | label                         | default   |
//! |-----------------|----------------|-------------------------------|-----------|
//! | business unit   | `businessUnit` | `kubernaut.ai/business-unit`  | `unknown` |
//! | service owner   | `serviceOwner` | `kubernaut.ai/service-owner`  | `unknown` |
//! | criticality     | `criticality`  | `kubernaut.ai/criticality`    | `medium`  |
//! | SLA requirement | `slaTier`      | `kubernaut.ai/sla-tier`       | `bronze`  |
//!
//! Labels are read from the workload (then the target object) before the
//! namespace. The aggregate confidence is [`aggregate_confidence`].

use crate::fallback::{adjust_for_context, record, FallbackChain};
use crate::input::PolicyInput;
use crate::policy::{consult, keyed_text};
use sp_policy::{Evaluation, EvaluationBudget, PolicyDomain, PolicyEvaluator};
use sp_types::{
    BusinessClassification, ClassificationResult, ClassificationSource, Criticality,
    EnrichmentContext, SignalRequest, SlaTier,
};
use std::str::FromStr;
use std::sync::Arc;

/// Value used for unresolved business unit and owner
pub const UNKNOWN: &str = "unknown";

const WORKLOAD_LABEL_CONFIDENCE: f64 = 0.8;
const NAMESPACE_LABEL_CONFIDENCE: f64 = 0.7;

/// Combine per-dimension confidences: the minimum
///
/// A classification is only as trustworthy as its weakest dimension, so
/// one defaulted dimension makes the aggregate zero. No dimensions → 0.
#[must_use]
pub fn aggregate_confidence(confidences: &[f64]) -> f64 {
    confidences
        .iter()
        .copied()
        .reduce(f64::min)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

/// Classifies business ownership and criticality
#[derive(Clone)]
pub struct BusinessClassifier {
    evaluator: Arc<dyn PolicyEvaluator>,
    budget: EvaluationBudget,
}

impl std::fmt::Debug for BusinessClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessClassifier")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl BusinessClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, budget: EvaluationBudget) -> Self {
        Self { evaluator, budget }
    }

    /// Classify all dimensions
    pub async fn classify(
        &self,
        signal: &SignalRequest,
        ctx: &EnrichmentContext,
    ) -> BusinessClassification {
        let input = PolicyInput::new(signal, ctx).into_value();
        let evaluation = consult(
            self.evaluator.as_ref(),
            PolicyDomain::Business,
            &input,
            &self.budget,
        )
        .await
        .ok();
        let evaluation = evaluation.as_ref();

        let business_unit = dimension(
            evaluation,
            ctx,
            "businessUnit",
            "kubernaut.ai/business-unit",
            UNKNOWN.to_string(),
        );
        let service_owner = dimension(
            evaluation,
            ctx,
            "serviceOwner",
            "kubernaut.ai/service-owner",
            UNKNOWN.to_string(),
        );
        let criticality = dimension(
            evaluation,
            ctx,
            "criticality",
            "kubernaut.ai/criticality",
            Criticality::Medium,
        );
        let sla_requirement = dimension(
            evaluation,
            ctx,
            "slaTier",
            "kubernaut.ai/sla-tier",
            SlaTier::Bronze,
        );

        let confidence = aggregate_confidence(&[
            business_unit.confidence,
            service_owner.confidence,
            criticality.confidence,
            sla_requirement.confidence,
        ]);
        tracing::debug!(
            business_unit = %business_unit.value,
            service_owner = %service_owner.value,
            confidence,
            "business classified"
        );
        BusinessClassification {
            business_unit,
            service_owner,
            criticality,
            sla_requirement,
            confidence,
        }
    }
}

fn dimension<T: FromStr + Send + 'static>(
    evaluation: Option<&Evaluation>,
    ctx: &EnrichmentContext,
    policy_key: &'static str,
    label: &'static str,
    default: T,
) -> ClassificationResult<T> {
    let parse = |raw: &str| raw.parse::<T>().ok().filter(|_| !raw.trim().is_empty());
    let from_policy = evaluation
        .and_then(|e| keyed_text(e, policy_key))
        .and_then(|(text, c)| parse(&text).map(|v| (v, c)));

    let resolution = FallbackChain::new()
        .then_value("policy", ClassificationSource::Policy, from_policy)
        .then("workload-label", ClassificationSource::Fallback, || {
            parse(ctx.workload_label(label)?).map(|v| (v, WORKLOAD_LABEL_CONFIDENCE))
        })
        .then("namespace-label", ClassificationSource::Fallback, || {
            parse(ctx.namespace_label(label)?).map(|v| (v, NAMESPACE_LABEL_CONFIDENCE))
        })
        .resolve(default);
    record("business", resolution.result.source);
    adjust_for_context(resolution.result, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ctx_with_namespace_labels, FixedEvaluator};
    use proptest::prelude::*;
    use serde_json::json;
    use sp_types::{ObjectContext, ResourceRef};

    fn classifier(evaluator: FixedEvaluator) -> BusinessClassifier {
        BusinessClassifier::new(Arc::new(evaluator), EvaluationBudget::default())
    }

    fn signal() -> SignalRequest {
        SignalRequest::new("HighLatency", "warning", ResourceRef::new("payments", "Pod", "p"))
    }

    #[test]
    fn aggregate_is_minimum() {
        assert_eq!(aggregate_confidence(&[0.9, 0.7, 0.8]), 0.7);
        assert_eq!(aggregate_confidence(&[]), 0.0);
    }

    proptest! {
        #[test]
        fn prop_aggregate_never_exceeds_any_dimension(cs in proptest::collection::vec(0.0f64..=1.0, 1..6)) {
            let agg = aggregate_confidence(&cs);
            prop_assert!(cs.iter().all(|c| agg <= *c));
            prop_assert!(cs.iter().any(|c| (agg - *c).abs() < f64::EPSILON));
        }
    }

    #[tokio::test]
    async fn dimensions_resolve_independently() {
        let c = classifier(FixedEvaluator::keyed(&[("businessUnit", json!("payments"))]));
        let mut ctx = ctx_with_namespace_labels("payments", &[("kubernaut.ai/sla-tier", "gold")]);
        let mut workload = ObjectContext::new("Deployment", "api");
        workload
            .labels
            .insert("kubernaut.ai/criticality".into(), "high".into());
        ctx.workload = Some(workload);

        let b = c.classify(&signal(), &ctx).await;
        assert_eq!(b.business_unit.value, "payments");
        assert_eq!(b.business_unit.source, ClassificationSource::Policy);
        assert_eq!(b.criticality.value, Criticality::High);
        assert_eq!(b.criticality.confidence, WORKLOAD_LABEL_CONFIDENCE);
        assert_eq!(b.sla_requirement.value, SlaTier::Gold);
        assert_eq!(b.sla_requirement.confidence, NAMESPACE_LABEL_CONFIDENCE);
        assert_eq!(b.service_owner.value, UNKNOWN);
        assert_eq!(b.service_owner.source, ClassificationSource::Default);
        assert_eq!(b.confidence, 0.0);
    }

    #[tokio::test]
    async fn workload_label_beats_namespace_label() {
        let c = classifier(FixedEvaluator::not_loaded());
        let mut ctx =
            ctx_with_namespace_labels("payments", &[("kubernaut.ai/business-unit", "platform")]);
        let mut workload = ObjectContext::new("Deployment", "api");
        workload
            .labels
            .insert("kubernaut.ai/business-unit".into(), "payments".into());
        ctx.workload = Some(workload);

        let b = c.classify(&signal(), &ctx).await;
        assert_eq!(b.business_unit.value, "payments");
    }

    #[tokio::test]
    async fn unparsable_policy_value_falls_through() {
        let c = classifier(FixedEvaluator::keyed(&[("criticality", json!("extreme"))]));
        let ctx = ctx_with_namespace_labels("payments", &[("kubernaut.ai/criticality", "low")]);
        let b = c.classify(&signal(), &ctx).await;
        assert_eq!(b.criticality.value, Criticality::Low);
        assert_eq!(b.criticality.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn fully_labelled_aggregate_is_the_weakest_dimension() {
        let c = classifier(FixedEvaluator::not_loaded());
        let ctx = ctx_with_namespace_labels(
            "payments",
            &[
                ("kubernaut.ai/business-unit", "payments"),
                ("kubernaut.ai/service-owner", "team-pay"),
                ("kubernaut.ai/criticality", "critical"),
                ("kubernaut.ai/sla-tier", "platinum"),
            ],
        );
        let b = c.classify(&signal(), &ctx).await;
        assert_eq!(b.confidence, NAMESPACE_LABEL_CONFIDENCE);
    }
}
