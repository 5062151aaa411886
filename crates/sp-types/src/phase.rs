//! Phase machine
//!
//! Phases only move forward. `Failed` is reachable from every non-terminal
//! phase; `Completed` and `Failed` have no outgoing transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing phase of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Phase {
    /// Created by the gateway, not yet observed
    #[default]
    Pending,
    /// Fetching cluster context
    Enriching,
    /// Environment, priority and signal mode
    Classifying,
    /// Business classification, label detection, custom labels
    Categorizing,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl Phase {
    /// All phases in pipeline order
    pub const ALL: [Phase; 6] = [
        Phase::Pending,
        Phase::Enriching,
        Phase::Classifying,
        Phase::Categorizing,
        Phase::Completed,
        Phase::Failed,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// The next phase on the success path
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Enriching),
            Phase::Enriching => Some(Phase::Classifying),
            Phase::Classifying => Some(Phase::Categorizing),
            Phase::Categorizing => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    /// Name as persisted in status
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Enriching => "Enriching",
            Phase::Classifying => "Classifying",
            Phase::Categorizing => "Categorizing",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal phase transition: {from} -> {to}")]
pub struct TransitionError {
    /// Current phase
    pub from: Phase,
    /// Requested phase
    pub to: Phase,
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> Vec<Phase> {
    use Phase::*;
    match from {
        Pending => vec![Enriching, Failed],
        Enriching => vec![Classifying, Failed],
        Classifying => vec![Categorizing, Failed],
        Categorizing => vec![Completed, Failed],
        Completed | Failed => vec![],
    }
}

/// Validate a phase transition
///
/// # Errors
/// `TransitionError` when `to` is not reachable from `from` in one step.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
