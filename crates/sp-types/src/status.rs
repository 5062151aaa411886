//! The persisted signal processing object and its status

use crate::classification::{
    BusinessClassification, ClassificationResult, Environment, Priority, SignalModeClassification,
};
use crate::enrichment::EnrichmentContext;
use crate::labels::{CustomLabels, DetectedLabels, RejectedLabelWrite};
use crate::phase::{validate_transition, Phase, TransitionError};
use crate::resource::{ObjectKey, OwnerChain};
use crate::signal::SignalRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unit of work: one signal moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalProcessing {
    /// Namespace and name
    pub key: ObjectKey,
    /// Unique identifier assigned at creation
    pub uid: String,
    /// Optimistic concurrency token, bumped on every write
    #[serde(default)]
    pub resource_version: u64,
    /// Request from the gateway
    pub spec: SignalRequest,
    /// Pipeline state
    #[serde(default)]
    pub status: SignalProcessingStatus,
}

impl SignalProcessing {
    /// New object at `Pending`
    #[must_use]
    pub fn new(key: ObjectKey, uid: impl Into<String>, spec: SignalRequest) -> Self {
        Self {
            key,
            uid: uid.into(),
            resource_version: 0,
            spec,
            status: SignalProcessingStatus::default(),
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.status.phase
    }
}

/// Entry in the phase history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    /// Phase entered
    pub phase: Phase,
    /// When it was entered
    pub entered_at: DateTime<Utc>,
}

/// Retry bookkeeping for the current phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Phase being retried
    pub phase: Phase,
    /// Failed attempts so far in this phase
    pub attempts: u32,
    /// Last transient error
    pub last_error: String,
    /// Earliest time for the next attempt
    pub next_attempt_at: DateTime<Utc>,
}

/// Why processing failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    /// Phase in which the failure occurred
    pub phase: Phase,
    /// Machine-readable reason
    pub reason: String,
    /// Detail
    pub message: String,
}

/// Condition types maintained by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Enrichment finished (possibly degraded)
    EnrichmentComplete,
    /// Environment, priority and signal mode assigned
    ClassificationComplete,
    /// Business, labels and custom labels assigned
    CategorizationComplete,
    /// Reached a terminal phase
    ProcessingComplete,
}

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Holds
    True,
    /// Does not hold
    False,
    /// Not yet known
    Unknown,
}

/// Kubernetes-style status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Status
    pub status: ConditionStatus,
    /// CamelCase reason
    pub reason: String,
    /// Detail
    pub message: String,
    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,
}

/// Pipeline state of a signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalProcessingStatus {
    /// Current phase
    pub phase: Phase,
    /// Entry time of every phase visited
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    /// Cluster context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentContext>,
    /// Owner chain (also inside the context, kept here for consumers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_chain: Option<OwnerChain>,
    /// Signal labels after truncation
    #[serde(default)]
    pub signal_labels: BTreeMap<String, String>,
    /// Keys whose values were truncated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated_labels: Vec<String>,
    /// Environment classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<ClassificationResult<Environment>>,
    /// Priority assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<ClassificationResult<Priority>>,
    /// Signal mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_mode: Option<SignalModeClassification>,
    /// Business classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<BusinessClassification>,
    /// Detected labels and failed detections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_labels: Option<DetectedLabels>,
    /// Custom labels from operator rules
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_labels: CustomLabels,
    /// Dropped custom label writes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_label_writes: Vec<RejectedLabelWrite>,
    /// Policy bundle version used for classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<u64>,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Retry bookkeeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryState>,
    /// Failure detail when phase is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    /// When a terminal phase was reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SignalProcessingStatus {
    /// Move to `to`, recording the entry time and clearing retry state
    ///
    /// # Errors
    /// `TransitionError` if the move is not a legal one-step transition.
    pub fn enter_phase(&mut self, to: Phase, now: DateTime<Utc>) -> Result<(), TransitionError> {
        validate_transition(self.phase, to)?;
        self.phase = to;
        self.phase_history.push(PhaseTransition {
            phase: to,
            entered_at: now,
        });
        self.retry = None;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Record entry into the current phase when the history is empty
    ///
    /// Returns whether an entry was added.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        if !self.phase_history.is_empty() {
            return false;
        }
        self.phase_history.push(PhaseTransition {
            phase: self.phase,
            entered_at: now,
        });
        true
    }

    /// When `phase` was entered, if it was
    #[must_use]
    pub fn phase_entered_at(&self, phase: Phase) -> Option<DateTime<Utc>> {
        self.phase_history
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.entered_at)
    }

    /// Insert or update a condition; the transition time only moves when
    /// the status changes.
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                type_,
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }

    /// Look up a condition
    #[must_use]
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn enter_phase_records_history() {
        let mut status = SignalProcessingStatus::default();
        let t0 = Utc::now();
        status.enter_phase(Phase::Enriching, t0).unwrap();
        status
            .enter_phase(Phase::Classifying, t0 + Duration::seconds(1))
            .unwrap();

        assert_eq!(status.phase, Phase::Classifying);
        assert_eq!(status.phase_entered_at(Phase::Enriching), Some(t0));
        assert!(status.completed_at.is_none());
    }

    #[test]
    fn observe_records_pending_once() {
        let mut status = SignalProcessingStatus::default();
        let t0 = Utc::now();
        assert!(status.observe(t0));
        assert!(!status.observe(t0 + Duration::seconds(3)));
        status
            .enter_phase(Phase::Enriching, t0 + Duration::seconds(5))
            .unwrap();

        assert_eq!(status.phase_entered_at(Phase::Pending), Some(t0));
        let phases: Vec<Phase> = status.phase_history.iter().map(|t| t.phase).collect();
        assert_eq!(phases, vec![Phase::Pending, Phase::Enriching]);
    }

    #[test]
    fn enter_phase_rejects_regression() {
        let mut status = SignalProcessingStatus::default();
        let now = Utc::now();
        status.enter_phase(Phase::Enriching, now).unwrap();
        assert!(status.enter_phase(Phase::Pending, now).is_err());
        assert_eq!(status.phase, Phase::Enriching);
    }

    #[test]
    fn terminal_phase_sets_completed_at() {
        let mut status = SignalProcessingStatus::default();
        let now = Utc::now();
        status.enter_phase(Phase::Failed, now).unwrap();
        assert_eq!(status.completed_at, Some(now));
    }

    #[test]
    fn condition_transition_time_moves_only_on_status_change() {
        let mut status = SignalProcessingStatus::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        status.set_condition(
            ConditionType::EnrichmentComplete,
            ConditionStatus::True,
            "Enriched",
            "",
            t0,
        );
        status.set_condition(
            ConditionType::EnrichmentComplete,
            ConditionStatus::True,
            "EnrichedDegraded",
            "timeout",
            t1,
        );
        let c = status.condition(ConditionType::EnrichmentComplete).unwrap();
        assert_eq!(c.last_transition_time, t0);
        assert_eq!(c.reason, "EnrichedDegraded");
    }
}
