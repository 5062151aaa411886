//! Labels: value truncation, detection outcomes, custom labels
//!
//! # Truncation policy
//!
//! Label values are capped at [`MAX_LABEL_VALUE_LEN`] characters. A longer
//! value keeps its first 54 characters, followed by `-` and the first 8 hex
//! digits of the BLAKE3 hash of the full value. The result is exactly 63
//! characters, so distinct long values stay distinguishable and truncating
//! twice is the same as truncating once.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Platform cap on label value length
pub const MAX_LABEL_VALUE_LEN: usize = 63;

const TRUNCATION_HASH_LEN: usize = 8;
const TRUNCATION_PREFIX_LEN: usize = MAX_LABEL_VALUE_LEN - TRUNCATION_HASH_LEN - 1;

/// Truncate a label value to the platform cap
///
/// Returns the input unchanged when it already fits.
#[must_use]
pub fn truncate_label_value(value: &str) -> Cow<'_, str> {
    if value.chars().count() <= MAX_LABEL_VALUE_LEN {
        return Cow::Borrowed(value);
    }
    let digest = blake3::hash(value.as_bytes()).to_hex();
    let prefix: String = value.chars().take(TRUNCATION_PREFIX_LEN).collect();
    Cow::Owned(format!("{prefix}-{}", &digest.as_str()[..TRUNCATION_HASH_LEN]))
}

/// Fixed label detection categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionCategory {
    /// Managed by Argo CD or Flux
    GitOpsManaged,
    /// Covered by a PodDisruptionBudget
    PdbProtected,
    /// Scaled by a HorizontalPodAutoscaler
    HpaEnabled,
    /// Owned by a StatefulSet
    Stateful,
    /// Installed by Helm
    HelmManaged,
    /// Namespace has NetworkPolicies
    NetworkIsolated,
    /// Pod is part of a service mesh
    ServiceMesh,
    /// Namespace has ResourceQuotas
    ResourceQuotaConstrained,
}

impl DetectionCategory {
    /// All categories, always evaluated in this order
    pub const ALL: [DetectionCategory; 8] = [
        DetectionCategory::GitOpsManaged,
        DetectionCategory::PdbProtected,
        DetectionCategory::HpaEnabled,
        DetectionCategory::Stateful,
        DetectionCategory::HelmManaged,
        DetectionCategory::NetworkIsolated,
        DetectionCategory::ServiceMesh,
        DetectionCategory::ResourceQuotaConstrained,
    ];

    /// camelCase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitOpsManaged => "gitOpsManaged",
            Self::PdbProtected => "pdbProtected",
            Self::HpaEnabled => "hpaEnabled",
            Self::Stateful => "stateful",
            Self::HelmManaged => "helmManaged",
            Self::NetworkIsolated => "networkIsolated",
            Self::ServiceMesh => "serviceMesh",
            Self::ResourceQuotaConstrained => "resourceQuotaConstrained",
        }
    }
}

impl fmt::Display for DetectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a detector could not decide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionFailureReason {
    /// The cluster query backing this detector failed during enrichment
    QueryFailed,
    /// Context needed by the detector is absent
    MissingContext,
    /// The detector panicked; contained
    DetectorPanicked,
}

impl DetectionFailureReason {
    /// Reason code
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryFailed => "QueryFailed",
            Self::MissingContext => "MissingContext",
            Self::DetectorPanicked => "DetectorPanicked",
        }
    }
}

/// Outcome of one detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLabel {
    /// Category
    pub category: DetectionCategory,
    /// Whether the property holds
    pub detected: bool,
    /// Detail such as the GitOps tool or mesh name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Set when the detector failed; `detected` is then `false`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<DetectionFailureReason>,
}

impl DetectedLabel {
    /// Property holds
    #[inline]
    #[must_use]
    pub fn detected(category: DetectionCategory, value: Option<String>) -> Self {
        Self {
            category,
            detected: true,
            value,
            failure_reason: None,
        }
    }

    /// Property does not hold
    #[inline]
    #[must_use]
    pub fn not_detected(category: DetectionCategory) -> Self {
        Self {
            category,
            detected: false,
            value: None,
            failure_reason: None,
        }
    }

    /// Detector failed
    #[inline]
    #[must_use]
    pub fn failed(category: DetectionCategory, reason: DetectionFailureReason) -> Self {
        Self {
            category,
            detected: false,
            value: None,
            failure_reason: Some(reason),
        }
    }
}

/// A detector failure, recorded without aborting the others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDetection {
    /// Category whose detector failed
    pub category: DetectionCategory,
    /// Reason code
    pub reason: DetectionFailureReason,
    /// Human readable detail
    pub message: String,
}

/// Results of all detectors in category order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLabels {
    /// One entry per category
    pub labels: Vec<DetectedLabel>,
    /// Failures, also reflected in `labels`
    pub failed_detections: Vec<FailedDetection>,
}

impl DetectedLabels {
    /// Look up a category
    #[must_use]
    pub fn get(&self, category: DetectionCategory) -> Option<&DetectedLabel> {
        self.labels.iter().find(|l| l.category == category)
    }

    /// Whether a category was detected
    #[must_use]
    pub fn is_detected(&self, category: DetectionCategory) -> bool {
        self.get(category).is_some_and(|l| l.detected)
    }
}

/// Custom labels produced by operator-authored rules: key → values
pub type CustomLabels = BTreeMap<String, Vec<String>>;

/// Why a custom label write was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelRejectionReason {
    /// Key is reserved for pipeline-owned labels
    ReservedKey,
    /// Key is not a valid label key
    InvalidKey,
    /// Key limit reached
    TooManyKeys,
    /// Value limit for the key reached
    TooManyValues,
}

/// A dropped custom label write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLabelWrite {
    /// Key the rule tried to write
    pub key: String,
    /// Value the rule tried to write
    pub value: String,
    /// Why it was dropped
    pub reason: LabelRejectionReason,
}
