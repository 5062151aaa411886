//! Custom label extraction
//!
//! Operator rules in `custom_labels.yaml` run in `collect` mode under the
//! strict budget and write `key → values`. Every write is checked:
//!
//! - reserved keys (pipeline-owned dimensions, anything under
//!   `kubernaut.ai/`) are dropped
//! - keys must be valid label keys
//! - at most [`MAX_CUSTOM_LABEL_KEYS`] keys and
//!   [`MAX_CUSTOM_LABEL_VALUES`] values per key
//! - values are truncated to the label value limit and de-duplicated
//!
//! Dropped writes are returned as [`RejectedLabelWrite`]s. A failing or
//! over-budget policy yields no labels; it never fails the pass.

use crate::input::PolicyInput;
use crate::policy::consult;
use serde_json::Value;
use sp_policy::{Evaluation, EvaluationBudget, PolicyDomain, PolicyEvaluator};
use sp_types::{
    truncate_label_value, ClassificationSource, CustomLabels, DetectedLabels, EnrichmentContext,
    LabelRejectionReason, RejectedLabelWrite, SignalRequest,
};
use std::sync::Arc;

/// Maximum number of custom label keys
pub const MAX_CUSTOM_LABEL_KEYS: usize = 10;

/// Maximum number of values per custom label key
pub const MAX_CUSTOM_LABEL_VALUES: usize = 5;

/// Keys owned by the pipeline
pub const RESERVED_KEYS: &[&str] = &[
    "environment",
    "priority",
    "severity",
    "signal-type",
    "signal-mode",
    "business-unit",
    "service-owner",
    "criticality",
    "sla-tier",
];

/// Prefix reserved for pipeline-owned keys
pub const RESERVED_PREFIX: &str = "kubernaut.ai/";

/// Whether `key` is owned by the pipeline
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with(RESERVED_PREFIX) || RESERVED_KEYS.contains(&lower.as_str())
}

/// Whether `key` is a valid label key: optional DNS prefix, `/`, 1–63 char name
#[must_use]
pub fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        let prefix_ok = !prefix.is_empty()
            && prefix.len() <= 253
            && prefix.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                    && !part.starts_with('-')
                    && !part.ends_with('-')
            });
        if !prefix_ok {
            return false;
        }
    }
    !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && name.bytes().next().is_some_and(|b| b.is_ascii_alphanumeric())
        && name.bytes().last().is_some_and(|b| b.is_ascii_alphanumeric())
}

/// Labels written by operator rules plus the writes that were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomLabelOutcome {
    /// Accepted labels
    pub labels: CustomLabels,
    /// Dropped writes
    pub rejected: Vec<RejectedLabelWrite>,
    /// Policy when rules ran, default when none were loaded or they failed
    pub source: Option<ClassificationSource>,
    /// Evaluation failure, if any
    pub error: Option<String>,
}

/// Extracts custom labels under the strict budget
#[derive(Clone)]
pub struct CustomLabelExtractor {
    evaluator: Arc<dyn PolicyEvaluator>,
    budget: EvaluationBudget,
}

impl std::fmt::Debug for CustomLabelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomLabelExtractor")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl CustomLabelExtractor {
    /// Create an extractor
    #[must_use]
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, budget: EvaluationBudget) -> Self {
        Self { evaluator, budget }
    }

    /// Run the custom label rules
    pub async fn extract(
        &self,
        signal: &SignalRequest,
        ctx: &EnrichmentContext,
        detected: Option<&DetectedLabels>,
    ) -> CustomLabelOutcome {
        let mut input = PolicyInput::new(signal, ctx);
        if let Some(detected) = detected {
            input = input.with_detected_labels(detected);
        }
        let input = input.into_value();
        match consult(
            self.evaluator.as_ref(),
            PolicyDomain::CustomLabels,
            &input,
            &self.budget,
        )
        .await
        {
            Ok(evaluation) => {
                let outcome = apply_writes(&evaluation);
                for r in &outcome.rejected {
                    tracing::warn!(key = %r.key, value = %r.value, reason = ?r.reason, "custom label write rejected");
                }
                outcome
            }
            Err(err) => CustomLabelOutcome {
                source: Some(ClassificationSource::Default),
                error: (!matches!(err, sp_policy::PolicyError::NotLoaded(_)))
                    .then(|| err.to_string()),
                ..CustomLabelOutcome::default()
            },
        }
    }
}

/// Flatten decisions into `(key, value)` writes in rule order
fn writes(evaluation: &Evaluation) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for decision in &evaluation.decisions {
        match (&decision.key, &decision.value) {
            (Some(key), value) => push_values(&mut out, key, value),
            (None, Value::Object(map)) => {
                for (key, value) in map {
                    push_values(&mut out, key, value);
                }
            }
            (None, _) => {}
        }
    }
    out
}

fn push_values(out: &mut Vec<(String, String)>, key: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                push_values(out, key, item);
            }
        }
        Value::String(s) => out.push((key.to_string(), s.clone())),
        Value::Number(n) => out.push((key.to_string(), n.to_string())),
        Value::Bool(b) => out.push((key.to_string(), b.to_string())),
        Value::Null | Value::Object(_) => {}
    }
}

/// Apply the write rules to an evaluation's outputs
#[must_use]
pub fn apply_writes(evaluation: &Evaluation) -> CustomLabelOutcome {
    let mut outcome = CustomLabelOutcome {
        source: Some(ClassificationSource::Policy),
        ..CustomLabelOutcome::default()
    };
    for (key, value) in writes(evaluation) {
        let reject = |reason| RejectedLabelWrite {
            key: key.clone(),
            value: value.clone(),
            reason,
        };
        if is_reserved_key(&key) {
            outcome.rejected.push(reject(LabelRejectionReason::ReservedKey));
            continue;
        }
        if !is_valid_label_key(&key) {
            outcome.rejected.push(reject(LabelRejectionReason::InvalidKey));
            continue;
        }
        if !outcome.labels.contains_key(&key) && outcome.labels.len() >= MAX_CUSTOM_LABEL_KEYS {
            outcome.rejected.push(reject(LabelRejectionReason::TooManyKeys));
            continue;
        }
        let truncated = truncate_label_value(&value).into_owned();
        let values = outcome.labels.entry(key.clone()).or_default();
        if values.contains(&truncated) {
            continue;
        }
        if values.len() >= MAX_CUSTOM_LABEL_VALUES {
            outcome.rejected.push(reject(LabelRejectionReason::TooManyValues));
            continue;
        }
        values.push(truncated);
    }
    outcome
}
