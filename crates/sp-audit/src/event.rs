//! Audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_types::{LabelRejectionReason, ObjectKey, Phase};
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A resource moved to a new phase
    PhaseTransition {
        /// Previous phase
        from: Phase,
        /// New phase
        to: Phase,
    },
    /// Enrichment finished with missing data
    EnrichmentDegraded {
        /// Why
        reasons: Vec<String>,
    },
    /// Environment and priority were decided
    Classified {
        /// Environment value
        environment: String,
        /// Environment source
        environment_source: String,
        /// Priority value
        priority: String,
        /// Priority source
        priority_source: String,
        /// Policy bundle version used, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        policy_version: Option<u64>,
    },
    /// A custom label write was dropped
    CustomLabelRejected {
        /// Key written
        key: String,
        /// Value written
        value: String,
        /// Why it was dropped
        reason: LabelRejectionReason,
    },
    /// A resource reached `Failed`
    ProcessingFailed {
        /// Phase the failure happened in
        phase: Phase,
        /// Short reason code
        reason: String,
        /// Detail
        message: String,
    },
    /// A new policy bundle became active
    PolicyReloaded {
        /// Bundle version
        version: u64,
        /// Content digest
        digest: String,
    },
    /// A policy update was rejected; the previous bundle stays active
    PolicyRejected {
        /// Digest of the rejected content, if it could be read
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        /// Compile or read error
        error: String,
    },
}

impl AuditEventKind {
    /// Snake-case name of the variant
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseTransition { .. } => "phase_transition",
            Self::EnrichmentDegraded { .. } => "enrichment_degraded",
            Self::Classified { .. } => "classified",
            Self::CustomLabelRejected { .. } => "custom_label_rejected",
            Self::ProcessingFailed { .. } => "processing_failed",
            Self::PolicyReloaded { .. } => "policy_reloaded",
            Self::PolicyRejected { .. } => "policy_rejected",
        }
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique id
    pub id: Uuid,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
    /// Resource the event is about; absent for process-wide events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ObjectKey>,
    /// Signal fingerprint for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Payload
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

impl AuditEvent {
    /// Event about a resource
    #[must_use]
    pub fn for_resource(resource: ObjectKey, kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            resource: Some(resource),
            fingerprint: None,
            kind,
        }
    }

    /// Process-wide event
    #[must_use]
    pub fn global(kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            resource: None,
            fingerprint: None,
            kind,
        }
    }

    /// With correlation fingerprint
    #[inline]
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}
