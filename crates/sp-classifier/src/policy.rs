//! Policy consultation shared by all classifiers

use serde_json::Value;
use sp_policy::{Decision, Evaluation, EvaluationBudget, PolicyDomain, PolicyError, PolicyEvaluator};
use std::str::FromStr;

/// Confidence assumed for a policy decision without an explicit one
pub const POLICY_CONFIDENCE: f64 = 0.95;

/// Confidence of a rule set's `default` output
pub const POLICY_DEFAULT_CONFIDENCE: f64 = 0.5;

/// Evaluate `domain`, absorbing failures
///
/// Any error (no rules loaded, budget exceeded, evaluation failure) is
/// logged and counted, and the caller falls back.
pub(crate) async fn consult(
    evaluator: &dyn PolicyEvaluator,
    domain: PolicyDomain,
    input: &Value,
    budget: &EvaluationBudget,
) -> Result<Evaluation, PolicyError> {
    let result = evaluator.evaluate(domain, input, budget).await;
    if let Err(err) = &result {
        match err {
            PolicyError::NotLoaded(_) => {
                tracing::debug!(domain = %domain, "no policy loaded; using fallback");
            }
            other => {
                metrics::counter!("signalprocessing_errors_total", "kind" => other.kind())
                    .increment(1);
                tracing::warn!(domain = %domain, error = %other, "policy evaluation failed; using fallback");
            }
        }
    }
    result
}

/// Confidence of a decision, honoring the rule's own value
pub(crate) fn decision_confidence(evaluation: &Evaluation, decision: &Decision) -> f64 {
    if evaluation.defaulted {
        POLICY_DEFAULT_CONFIDENCE
    } else {
        decision.confidence.unwrap_or(POLICY_CONFIDENCE)
    }
}

/// Parse the first decision into `T`
///
/// A value that does not parse is treated as no answer.
pub(crate) fn first_parsed<T: FromStr>(evaluation: &Evaluation) -> Option<(T, f64)> {
    let decision = evaluation.first()?;
    let text = decision.as_text()?;
    match text.parse::<T>() {
        Ok(value) => Some((value, decision_confidence(evaluation, decision))),
        Err(_) => {
            tracing::debug!(rule = %decision.rule, value = %text, "policy output not recognized");
            None
        }
    }
}

/// Read a keyed output: a decision with `key`, or a field of an object-valued decision
pub(crate) fn keyed_text(evaluation: &Evaluation, key: &str) -> Option<(String, f64)> {
    if let Some(d) = evaluation.decision_for(key) {
        return d.as_text().map(|t| (t, decision_confidence(evaluation, d)));
    }
    evaluation.decisions.iter().find_map(|d| match &d.value {
        Value::Object(map) => match map.get(key)? {
            Value::String(s) => Some((s.clone(), decision_confidence(evaluation, d))),
            Value::Number(n) => Some((n.to_string(), decision_confidence(evaluation, d))),
            Value::Bool(b) => Some((b.to_string(), decision_confidence(evaluation, d))),
            _ => None,
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sp_types::Priority;

    fn decision(key: Option<&str>, value: Value, confidence: Option<f64>) -> Decision {
        Decision {
            rule: "r".into(),
            key: key.map(str::to_string),
            value,
            confidence,
        }
    }

    #[test]
    fn explicit_confidence_wins() {
        let eval = Evaluation {
            decisions: vec![decision(None, json!("P1"), Some(0.7))],
            ..Evaluation::default()
        };
        assert_eq!(first_parsed::<Priority>(&eval), Some((Priority::P1, 0.7)));
    }

    #[test]
    fn defaulted_output_is_low_confidence() {
        let eval = Evaluation {
            decisions: vec![decision(None, json!("P3"), None)],
            defaulted: true,
            ..Evaluation::default()
        };
        assert_eq!(
            first_parsed::<Priority>(&eval),
            Some((Priority::P3, POLICY_DEFAULT_CONFIDENCE))
        );
    }

    #[test]
    fn unparsable_output_is_no_answer() {
        let eval = Evaluation {
            decisions: vec![decision(None, json!("urgent"), None)],
            ..Evaluation::default()
        };
        assert_eq!(first_parsed::<Priority>(&eval), None);
    }

    #[test]
    fn keyed_text_reads_objects_too() {
        let eval = Evaluation {
            decisions: vec![decision(None, json!({"businessUnit": "payments"}), None)],
            ..Evaluation::default()
        };
        assert_eq!(
            keyed_text(&eval, "businessUnit"),
            Some(("payments".to_string(), POLICY_CONFIDENCE))
        );
        assert_eq!(keyed_text(&eval, "serviceOwner"), None);
    }
}
