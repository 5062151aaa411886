//! Signal Processing Types
//!
//! The shared data model of the signal processing pipeline:
//! - [`SignalProcessing`]: the unit of work persisted by the controller
//! - [`Phase`]: the monotonic phase machine and its legal transitions
//! - [`ClassificationResult`]: value + confidence + provenance
//! - [`EnrichmentContext`]: cluster metadata gathered for one pass
//! - [`DetectedLabel`] / [`FailedDetection`]: label detection outcomes
//!
//! # Phase Machine
//!
//! ```text
//! Pending → Enriching → Classifying → Categorizing → Completed
//!    ↓          ↓            ↓              ↓
//!    └──────────┴────────────┴──────────────┴──────→ Failed
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod classification;
pub mod enrichment;
pub mod labels;
pub mod phase;
pub mod resource;
pub mod signal;
pub mod status;

pub use classification::{
    BusinessClassification, ClassificationResult, ClassificationSource, Criticality, Environment,
    Priority, SignalMode, SignalModeClassification, SlaTier,
};
pub use enrichment::{
    AutoscalerSummary, DisruptionBudgetSummary, EnrichmentContext, ObjectContext,
};
pub use labels::{
    truncate_label_value, CustomLabels, DetectedLabel, DetectedLabels, DetectionCategory,
    DetectionFailureReason, FailedDetection, LabelRejectionReason, RejectedLabelWrite,
    MAX_LABEL_VALUE_LEN,
};
pub use phase::{allowed_transitions, validate_transition, Phase, TransitionError};
pub use resource::{ObjectKey, OwnerChain, OwnerChainEntry, ResourceRef, MAX_OWNER_CHAIN_DEPTH};
pub use signal::{Severity, SignalRequest};
pub use status::{
    Condition, ConditionStatus, ConditionType, FailureInfo, PhaseTransition, RetryState,
    SignalProcessing, SignalProcessingStatus,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
