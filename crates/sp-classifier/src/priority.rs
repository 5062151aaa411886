//! Priority assignment
//!
//! Policy first (`priority.yaml`, which sees the classified environment),
//! then the static severity × environment matrix, then `P2`.
//!
//! ```text
//!              production  staging  development/test  unknown
//! critical         P0         P1           P2            P1
//! warning          P1         P2           P3            P2
//! info             P2         P3           P3            P3
//! unknown          P2         P3           P3            (default)
//! ```

use crate::fallback::{adjust_for_context, record, FallbackChain};
use crate::input::PolicyInput;
use crate::policy::{consult, first_parsed};
use sp_policy::{EvaluationBudget, PolicyDomain, PolicyEvaluator};
use sp_types::{
    ClassificationResult, ClassificationSource, EnrichmentContext, Environment, Priority,
    Severity, SignalRequest,
};
use std::sync::Arc;

/// Priority when nothing else applies
pub const DEFAULT_PRIORITY: Priority = Priority::P2;

/// Confidence of a matrix lookup with a known environment
const MATRIX_CONFIDENCE: f64 = 0.7;

/// Confidence of a matrix lookup with an unknown environment
const MATRIX_UNKNOWN_ENV_CONFIDENCE: f64 = 0.5;

/// Static severity × environment lookup
///
/// Returns `None` when neither severity nor environment is known.
#[must_use]
pub fn matrix_priority(severity: Severity, environment: Environment) -> Option<Priority> {
    use Environment as E;
    use Priority::{P0, P1, P2, P3};
    use Severity as S;
    Some(match (severity, environment) {
        (S::Critical, E::Production) => P0,
        (S::Critical, E::Staging | E::Unknown) => P1,
        (S::Critical, E::Development | E::Test) => P2,
        (S::Warning, E::Production) => P1,
        (S::Warning, E::Staging | E::Unknown) => P2,
        (S::Warning, E::Development | E::Test) => P3,
        (S::Info, E::Production) => P2,
        (S::Info, _) => P3,
        (S::Unknown, E::Production) => P2,
        (S::Unknown, E::Unknown) => return None,
        (S::Unknown, _) => P3,
    })
}

/// Assigns a priority from severity and environment
#[derive(Clone)]
pub struct PriorityEngine {
    evaluator: Arc<dyn PolicyEvaluator>,
    budget: EvaluationBudget,
}

impl std::fmt::Debug for PriorityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityEngine")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl PriorityEngine {
    /// Create an engine
    #[must_use]
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, budget: EvaluationBudget) -> Self {
        Self { evaluator, budget }
    }

    /// Assign; always produces a result
    pub async fn assign(
        &self,
        signal: &SignalRequest,
        environment: Environment,
        ctx: &EnrichmentContext,
    ) -> ClassificationResult<Priority> {
        let input = PolicyInput::new(signal, ctx)
            .with_environment(environment)
            .into_value();
        let from_policy = consult(
            self.evaluator.as_ref(),
            PolicyDomain::Priority,
            &input,
            &self.budget,
        )
        .await
        .ok()
        .and_then(|eval| first_parsed::<Priority>(&eval));

        let severity = signal.normalized_severity();
        let resolution = FallbackChain::new()
            .then_value("policy", ClassificationSource::Policy, from_policy)
            .then("severity-matrix", ClassificationSource::Fallback, || {
                let confidence = if environment == Environment::Unknown {
                    MATRIX_UNKNOWN_ENV_CONFIDENCE
                } else {
                    MATRIX_CONFIDENCE
                };
                matrix_priority(severity, environment).map(|p| (p, confidence))
            })
            .resolve(DEFAULT_PRIORITY);

        tracing::debug!(
            severity = severity.as_str(),
            environment = %environment,
            priority = %resolution.result.value,
            source = %resolution.result.source,
            "priority assigned"
        );
        record("priority", resolution.result.source);
        adjust_for_context(resolution.result, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ctx_with_namespace_labels, FixedEvaluator};
    use sp_types::ResourceRef;

    fn engine(evaluator: FixedEvaluator) -> PriorityEngine {
        PriorityEngine::new(Arc::new(evaluator), EvaluationBudget::default())
    }

    fn signal(severity: &str) -> SignalRequest {
        SignalRequest::new("HighMemory", severity, ResourceRef::new("prod-payment", "Pod", "p"))
    }

    #[test]
    fn matrix_corners() {
        assert_eq!(
            matrix_priority(Severity::Critical, Environment::Production),
            Some(Priority::P0)
        );
        assert_eq!(matrix_priority(Severity::Info, Environment::Test), Some(Priority::P3));
        assert_eq!(matrix_priority(Severity::Unknown, Environment::Unknown), None);
    }

    #[test]
    fn matrix_is_monotonic_in_environment() {
        for severity in [Severity::Critical, Severity::Warning, Severity::Info] {
            let prod = matrix_priority(severity, Environment::Production);
            let staging = matrix_priority(severity, Environment::Staging);
            let dev = matrix_priority(severity, Environment::Development);
            assert!(prod <= staging && staging <= dev, "{severity:?}");
        }
    }

    #[tokio::test]
    async fn critical_production_without_policy_is_p0() {
        let e = engine(FixedEvaluator::not_loaded());
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = e.assign(&signal("critical"), Environment::Production, &ctx).await;
        assert_eq!(r.value, Priority::P0);
        assert_eq!(r.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn raw_severity_is_normalized() {
        let e = engine(FixedEvaluator::not_loaded());
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = e.assign(&signal("sev1"), Environment::Production, &ctx).await;
        assert_eq!(r.value, Priority::P0);
    }

    #[tokio::test]
    async fn policy_overrides_matrix() {
        let e = engine(FixedEvaluator::value("P3"));
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = e.assign(&signal("critical"), Environment::Production, &ctx).await;
        assert_eq!(r.value, Priority::P3);
        assert_eq!(r.source, ClassificationSource::Policy);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_matrix() {
        let e = engine(FixedEvaluator::timeout());
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = e.assign(&signal("warning"), Environment::Staging, &ctx).await;
        assert_eq!(r.value, Priority::P2);
        assert_eq!(r.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn unknown_everything_defaults_to_p2() {
        let e = engine(FixedEvaluator::not_loaded());
        let ctx = ctx_with_namespace_labels("x", &[]);
        let r = e.assign(&signal("bogus"), Environment::Unknown, &ctx).await;
        assert_eq!(r.value, DEFAULT_PRIORITY);
        assert_eq!(r.source, ClassificationSource::Default);
    }
}
