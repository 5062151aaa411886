//! Upstream signal request
//!
//! The gateway hands the controller a [`SignalRequest`]: which signal fired,
//! how severe it is, which resource it points at, and the pass-through
//! labels and annotations it extracted.

use crate::resource::ResourceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Signal as produced by the ingestion gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    /// Signal name, e.g. `KubePodCrashLooping`
    pub signal_name: String,
    /// Deduplication fingerprint assigned by the gateway
    pub fingerprint: String,
    /// Raw severity string as received
    pub severity: String,
    /// Signal source type, e.g. `prometheus-alert`, `kubernetes-event`
    #[serde(default)]
    pub signal_type: String,
    /// Resource the signal refers to
    pub target: ResourceRef,
    /// Pass-through labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pass-through annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// When the gateway received the signal
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl SignalRequest {
    /// Create a request with empty labels
    #[must_use]
    pub fn new(
        signal_name: impl Into<String>,
        severity: impl Into<String>,
        target: ResourceRef,
    ) -> Self {
        let signal_name = signal_name.into();
        Self {
            fingerprint: signal_name.clone(),
            signal_name,
            severity: severity.into(),
            signal_type: "prometheus-alert".to_string(),
            target,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    /// With fingerprint
    #[inline]
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// With a pass-through label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// With a pass-through annotation
    #[inline]
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Normalized severity
    #[inline]
    #[must_use]
    pub fn normalized_severity(&self) -> Severity {
        Severity::normalize(&self.severity)
    }
}

/// Normalized signal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Service-impacting, needs immediate action
    Critical,
    /// Degradation that needs attention
    Warning,
    /// Informational
    Info,
    /// Unrecognized severity string
    Unknown,
}

impl Severity {
    /// Map the many severity spellings used by alerting sources onto the
    /// normalized set. Matching is case-insensitive.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" | "fatal" | "emergency" | "alert" | "page" | "sev1" | "sev0"
            | "p0" | "p1" | "high" => Self::Critical,
            "warning" | "warn" | "error" | "err" | "major" | "medium" | "sev2" | "sev3" | "p2" => {
                Self::Warning
            }
            "info" | "informational" | "notice" | "low" | "minor" | "debug" | "none" | "sev4"
            | "p3" | "p4" => Self::Info,
            _ => Self::Unknown,
        }
    }

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
