//! Policy evaluation
//!
//! [`evaluate`] is a pure, budget-bounded interpreter over a compiled rule
//! set. [`PolicyEngine`] wraps it for async callers: it takes one snapshot of
//! the active bundle, runs the interpreter on the blocking pool under an
//! outer timeout and stamps the result with the bundle version it used.

use crate::bundle::PolicyDomain;
use crate::error::{PolicyError, Result};
use crate::rules::{value_size, CompiledRuleSet, MatchMode};
use crate::sandbox::{EvaluationBudget, Meter};
use crate::store::PolicyStore;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// One output produced by a rule (or the default)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Rule that produced it; `default` for the default output
    pub rule: String,
    /// Output key, for keyed domains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Output value
    pub value: Value,
    /// Confidence declared on the rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Decision {
    /// Value as a string, if it is a scalar
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
    /// Outputs in rule order
    pub decisions: Vec<Decision>,
    /// The default output was used because nothing matched
    pub defaulted: bool,
    /// Version of the bundle the rules came from
    pub bundle_version: u64,
    /// Notes about skipped rules
    pub diagnostics: Vec<String>,
    /// Steps charged
    pub steps: u64,
}

impl Evaluation {
    /// First decision, if any
    #[must_use]
    pub fn first(&self) -> Option<&Decision> {
        self.decisions.first()
    }

    /// First decision with `key`
    #[must_use]
    pub fn decision_for(&self, key: &str) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.key.as_deref() == Some(key))
    }

    /// Whether no rule or default produced output
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Evaluate a rule set against an input document
///
/// # Errors
/// Budget exhaustion; the partial result is discarded.
pub fn evaluate(rule_set: &CompiledRuleSet, input: &Value, meter: &mut Meter) -> Result<Evaluation> {
    meter.charge(value_size(input))?;
    let mut evaluation = Evaluation::default();

    for rule in &rule_set.rules {
        meter.step()?;
        if !rule.when.eval(input, meter)? {
            continue;
        }
        match rule.then.produce(input, meter)? {
            Some(value) => evaluation.decisions.push(Decision {
                rule: rule.name.clone(),
                key: rule.then.key.clone(),
                value,
                confidence: rule.confidence,
            }),
            None => {
                evaluation
                    .diagnostics
                    .push(format!("rule '{}' matched but its source path is absent", rule.name));
                continue;
            }
        }
        if rule_set.mode == MatchMode::FirstMatch {
            break;
        }
    }

    if evaluation.decisions.is_empty() {
        if let Some(default) = &rule_set.default {
            if let Some(value) = default.produce(input, meter)? {
                evaluation.decisions.push(Decision {
                    rule: "default".to_string(),
                    key: default.key.clone(),
                    value,
                    confidence: None,
                });
                evaluation.defaulted = true;
            }
        }
    }

    evaluation.steps = meter.steps();
    Ok(evaluation)
}

/// Sandboxed policy evaluation
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate the active rules of `domain` against `input` within `budget`
    async fn evaluate(
        &self,
        domain: PolicyDomain,
        input: &Value,
        budget: &EvaluationBudget,
    ) -> Result<Evaluation>;
}

/// Evaluator backed by the active bundle in a [`PolicyStore`]
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
}

impl PolicyEngine {
    /// Create an engine over a store
    #[inline]
    #[must_use]
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }
}

#[async_trait]
impl PolicyEvaluator for PolicyEngine {
    async fn evaluate(
        &self,
        domain: PolicyDomain,
        input: &Value,
        budget: &EvaluationBudget,
    ) -> Result<Evaluation> {
        let snapshot = self.store.snapshot();
        let rule_set = snapshot
            .rule_set(domain)
            .cloned()
            .ok_or(PolicyError::NotLoaded(domain))?;
        let version = snapshot.version();
        let input = input.clone();
        let budget = *budget;

        let task = tokio::task::spawn_blocking(move || {
            let mut meter = Meter::new(&budget);
            evaluate(&rule_set, &input, &mut meter)
        });

        let mut evaluation = match tokio::time::timeout(budget.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(PolicyError::Evaluation(format!("evaluator task failed: {join}")))
            }
            Err(_) => return Err(PolicyError::Timeout(budget.timeout)),
        };
        evaluation.bundle_version = version;
        tracing::debug!(
            domain = %domain,
            version,
            decisions = evaluation.decisions.len(),
            steps = evaluation.steps,
            "policy evaluated"
        );
        Ok(evaluation)
    }
}
