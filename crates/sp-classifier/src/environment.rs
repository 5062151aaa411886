//! Environment classification
//!
//! ```text
//! policy (environment.yaml)                      source=policy    rule confidence / 0.95
//!   → namespace label kubernaut.ai/environment   source=fallback  0.9
//!   → exact namespace mapping                    source=fallback  0.8
//!   → namespace prefix (longest wins)            source=fallback  0.7
//!   → signal label `environment`                 source=fallback  0.6
//!   → unknown                                    source=default   0.0
//! ```
//!
//! Results computed from a degraded context are scaled down.

use crate::config::EnvironmentConfig;
use crate::fallback::{adjust_for_context, record, FallbackChain};
use crate::input::PolicyInput;
use crate::policy::{consult, first_parsed};
use sp_policy::{EvaluationBudget, PolicyDomain, PolicyEvaluator};
use sp_types::{
    ClassificationResult, ClassificationSource, EnrichmentContext, Environment, SignalRequest,
};
use std::sync::Arc;

const BUILTIN_PREFIXES: &[(&str, Environment)] = &[
    ("prod-", Environment::Production),
    ("production-", Environment::Production),
    ("staging-", Environment::Staging),
    ("stg-", Environment::Staging),
    ("dev-", Environment::Development),
    ("test-", Environment::Test),
    ("qa-", Environment::Test),
];

/// Classifies the deployment environment of a signal's target
#[derive(Clone)]
pub struct EnvironmentClassifier {
    evaluator: Arc<dyn PolicyEvaluator>,
    budget: EvaluationBudget,
    config: EnvironmentConfig,
}

impl std::fmt::Debug for EnvironmentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentClassifier")
            .field("budget", &self.budget)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EnvironmentClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new(
        evaluator: Arc<dyn PolicyEvaluator>,
        budget: EvaluationBudget,
        config: EnvironmentConfig,
    ) -> Self {
        Self {
            evaluator,
            budget,
            config,
        }
    }

    /// Classify; always produces a result
    pub async fn classify(
        &self,
        signal: &SignalRequest,
        ctx: &EnrichmentContext,
    ) -> ClassificationResult<Environment> {
        let input = PolicyInput::new(signal, ctx).into_value();
        let from_policy = consult(
            self.evaluator.as_ref(),
            PolicyDomain::Environment,
            &input,
            &self.budget,
        )
        .await
        .ok()
        .and_then(|eval| first_parsed::<Environment>(&eval))
        .filter(|(env, _)| *env != Environment::Unknown);

        let namespace = ctx.target.namespace.as_str();
        let resolution = FallbackChain::new()
            .then_value("policy", ClassificationSource::Policy, from_policy)
            .then("namespace-label", ClassificationSource::Fallback, || {
                parse_known(ctx.namespace_label(&self.config.namespace_label)?).map(|e| (e, 0.9))
            })
            .then("namespace-mapping", ClassificationSource::Fallback, || {
                self.config
                    .namespace_mapping
                    .get(namespace)
                    .map(|e| (*e, 0.8))
            })
            .then("namespace-prefix", ClassificationSource::Fallback, || {
                self.prefix_match(namespace).map(|e| (e, 0.7))
            })
            .then("signal-label", ClassificationSource::Fallback, || {
                parse_known(signal.labels.get(&self.config.signal_label)?).map(|e| (e, 0.6))
            })
            .resolve(Environment::Unknown);

        tracing::debug!(
            target_ref = %ctx.target,
            environment = %resolution.result.value,
            attempts = resolution.attempts.len(),
            "environment classified"
        );
        record("environment", resolution.result.source);
        adjust_for_context(resolution.result, ctx)
    }

    /// Longest configured or built-in prefix of `namespace`
    fn prefix_match(&self, namespace: &str) -> Option<Environment> {
        if namespace.is_empty() {
            return None;
        }
        let configured = self
            .config
            .namespace_prefixes
            .iter()
            .map(|(p, e)| (p.as_str(), *e));
        let builtin = BUILTIN_PREFIXES
            .iter()
            .filter(|_| self.config.builtin_prefixes)
            .map(|(p, e)| (*p, *e));
        configured
            .chain(builtin)
            .filter(|(p, _)| !p.is_empty() && namespace.starts_with(p))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, e)| e)
    }
}

fn parse_known(raw: &str) -> Option<Environment> {
    raw.parse::<Environment>()
        .ok()
        .filter(|e| *e != Environment::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ctx_with_namespace_labels, FixedEvaluator};
    use sp_types::ResourceRef;

    fn classifier(evaluator: FixedEvaluator, config: EnvironmentConfig) -> EnvironmentClassifier {
        EnvironmentClassifier::new(Arc::new(evaluator), EvaluationBudget::default(), config)
    }

    fn signal(ns: &str) -> SignalRequest {
        SignalRequest::new("HighMemory", "critical", ResourceRef::new(ns, "Pod", "p"))
    }

    #[tokio::test]
    async fn policy_answer_is_used() {
        let c = classifier(FixedEvaluator::value("staging"), EnvironmentConfig::default());
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = c.classify(&signal("prod-payment"), &ctx).await;
        assert_eq!(r.value, Environment::Staging);
        assert_eq!(r.source, ClassificationSource::Policy);
    }

    #[tokio::test]
    async fn namespace_label_beats_prefix() {
        let c = classifier(FixedEvaluator::not_loaded(), EnvironmentConfig::default());
        let ctx = ctx_with_namespace_labels("prod-payment", &[("kubernaut.ai/environment", "qa")]);
        let r = c.classify(&signal("prod-payment"), &ctx).await;
        assert_eq!(r.value, Environment::Test);
        assert_eq!(r.source, ClassificationSource::Fallback);
        assert!((r.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exact_mapping_beats_prefix() {
        let config = EnvironmentConfig::default().with_mapping("prod-sandbox", Environment::Development);
        let c = classifier(FixedEvaluator::not_loaded(), config);
        let ctx = ctx_with_namespace_labels("prod-sandbox", &[]);
        let r = c.classify(&signal("prod-sandbox"), &ctx).await;
        assert_eq!(r.value, Environment::Development);
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let config = EnvironmentConfig::default().with_prefix("prod-canary-", Environment::Staging);
        let c = classifier(FixedEvaluator::not_loaded(), config);
        let ctx = ctx_with_namespace_labels("prod-canary-1", &[]);
        let r = c.classify(&signal("prod-canary-1"), &ctx).await;
        assert_eq!(r.value, Environment::Staging);
    }

    #[tokio::test]
    async fn policy_failure_falls_back() {
        let c = classifier(FixedEvaluator::timeout(), EnvironmentConfig::default());
        let ctx = ctx_with_namespace_labels("prod-payment", &[]);
        let r = c.classify(&signal("prod-payment"), &ctx).await;
        assert_eq!(r.value, Environment::Production);
        assert_eq!(r.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn nothing_matches_gives_unknown() {
        let c = classifier(FixedEvaluator::not_loaded(), EnvironmentConfig::default());
        let ctx = ctx_with_namespace_labels("payments", &[]);
        let r = c.classify(&signal("payments"), &ctx).await;
        assert_eq!(r.value, Environment::Unknown);
        assert_eq!(r.source, ClassificationSource::Default);
        assert_eq!(r.confidence, 0.0);
    }

    #[tokio::test]
    async fn signal_label_is_last_resort() {
        let c = classifier(FixedEvaluator::not_loaded(), EnvironmentConfig::default());
        let ctx = ctx_with_namespace_labels("payments", &[]);
        let r = c
            .classify(&signal("payments").with_label("environment", "dev"), &ctx)
            .await;
        assert_eq!(r.value, Environment::Development);
        assert!((r.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn degraded_context_lowers_confidence() {
        let c = classifier(FixedEvaluator::not_loaded(), EnvironmentConfig::default());
        let ctx = EnrichmentContext::degraded(ResourceRef::new("prod-payment", "Pod", "p"), "timeout");
        let r = c.classify(&signal("prod-payment"), &ctx).await;
        assert_eq!(r.value, Environment::Production);
        assert!((r.confidence - 0.7 * 0.8).abs() < 1e-9);
    }
}
