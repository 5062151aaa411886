//! Policy input document
//!
//! Every policy domain sees the same document shape, so one rule file can
//! reference anything the pipeline knows at that point:
//!
//! ```text
//! signal:      { name, severity, rawSeverity, type, fingerprint, labels, annotations }
//! target:      { namespace, kind, name }
//! namespace:   { name, labels, annotations }     (absent when unknown)
//! object:      { kind, name, labels, annotations }
//! workload:    { kind, name, labels, annotations }
//! ownerChain:  [ { namespace, kind, name } ]
//! degraded:    bool
//! environment: "production" | ...                 (after environment classification)
//! priority:    "P0" | ...                         (after priority assignment)
//! detectedLabels: { gitOpsManaged: true, ... }    (after label detection)
//! ```

use serde_json::{json, Map, Value};
use sp_types::{DetectedLabels, EnrichmentContext, Environment, ObjectContext, Priority, SignalRequest};

/// Builder for the policy input document
#[derive(Debug, Clone)]
pub struct PolicyInput {
    doc: Map<String, Value>,
}

fn object_json(obj: &ObjectContext) -> Value {
    json!({
        "kind": obj.kind,
        "name": obj.name,
        "labels": obj.labels,
        "annotations": obj.annotations,
    })
}

impl PolicyInput {
    /// Document for a signal and its context
    #[must_use]
    pub fn new(signal: &SignalRequest, ctx: &EnrichmentContext) -> Self {
        let mut doc = Map::new();
        doc.insert(
            "signal".into(),
            json!({
                "name": signal.signal_name,
                "severity": signal.normalized_severity().as_str(),
                "rawSeverity": signal.severity,
                "type": signal.signal_type,
                "fingerprint": signal.fingerprint,
                "labels": signal.labels,
                "annotations": signal.annotations,
            }),
        );
        doc.insert(
            "target".into(),
            json!({
                "namespace": ctx.target.namespace,
                "kind": ctx.target.kind,
                "name": ctx.target.name,
            }),
        );
        if let Some(ns) = &ctx.namespace {
            doc.insert(
                "namespace".into(),
                json!({
                    "name": ns.name,
                    "labels": ns.labels,
                    "annotations": ns.annotations,
                }),
            );
        }
        if let Some(obj) = &ctx.object {
            doc.insert("object".into(), object_json(obj));
        }
        if let Some(w) = &ctx.workload {
            doc.insert("workload".into(), object_json(w));
        }
        doc.insert(
            "ownerChain".into(),
            Value::Array(
                ctx.owner_chain
                    .entries
                    .iter()
                    .map(|e| json!({"namespace": e.namespace, "kind": e.kind, "name": e.name}))
                    .collect(),
            ),
        );
        doc.insert("degraded".into(), Value::Bool(ctx.degraded));
        Self { doc }
    }

    /// Add the classified environment
    #[must_use]
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.doc.insert("environment".into(), Value::String(env.as_str().into()));
        self
    }

    /// Add the assigned priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.doc.insert("priority".into(), Value::String(priority.as_str().into()));
        self
    }

    /// Add detected labels as `category → detected`
    #[must_use]
    pub fn with_detected_labels(mut self, labels: &DetectedLabels) -> Self {
        let map: Map<String, Value> = labels
            .labels
            .iter()
            .map(|l| (l.category.as_str().to_string(), Value::Bool(l.detected)))
            .collect();
        self.doc.insert("detectedLabels".into(), Value::Object(map));
        self
    }

    /// Finished document
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.doc)
    }
}
