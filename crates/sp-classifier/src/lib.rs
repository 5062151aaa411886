//! Signal Processing Classifiers
//!
//! Every classifier follows the same shape: a policy evaluation first, then
//! deterministic fallbacks, then a fixed default. Results always carry a
//! confidence and the [`ClassificationSource`](sp_types::ClassificationSource)
//! that produced them.
//!
//! - [`EnvironmentClassifier`]: production / staging / development / test
//! - [`PriorityEngine`]: P0–P3 from severity and environment
//! - [`BusinessClassifier`]: four independent business dimensions
//! - [`SignalModeClassifier`]: reactive vs. proactive signals
//! - [`CustomLabelExtractor`]: operator labels under the strict budget
//!
//! # Flow
//!
//! ```text
//!                  ┌──────────────┐
//! PolicyInput ───→ │ PolicyEngine │──ok──→ policy result
//!                  └──────┬───────┘
//!                         │ not loaded / timeout / budget
//!                         ↓
//!                  FallbackChain ──→ fallback result ──→ default
//! ```
//!
//! Classifiers never fail. Policy errors are logged and counted, then the
//! chain moves on.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod business;
pub mod config;
pub mod custom_labels;
pub mod environment;
pub mod fallback;
pub mod input;
mod policy;
pub mod priority;
pub mod signal_mode;
#[cfg(test)]
mod testing;

pub use business::{aggregate_confidence, BusinessClassifier};
pub use config::{ClassificationConfig, EnvironmentConfig, SignalModeConfig, ENVIRONMENT_LABEL};
pub use custom_labels::{
    apply_writes, is_reserved_key, is_valid_label_key, CustomLabelExtractor, CustomLabelOutcome,
    MAX_CUSTOM_LABEL_KEYS, MAX_CUSTOM_LABEL_VALUES,
};
pub use environment::EnvironmentClassifier;
pub use fallback::{adjust_for_context, Attempt, FallbackChain, Resolution, DEGRADED_CONFIDENCE_FACTOR};
pub use input::PolicyInput;
pub use policy::{POLICY_CONFIDENCE, POLICY_DEFAULT_CONFIDENCE};
pub use priority::{matrix_priority, PriorityEngine, DEFAULT_PRIORITY};
pub use signal_mode::SignalModeClassifier;

use sp_policy::PolicyEvaluator;
use std::sync::Arc;

/// All classifiers over one policy evaluator
#[derive(Debug, Clone)]
pub struct Classifiers {
    /// Environment
    pub environment: EnvironmentClassifier,
    /// Priority
    pub priority: PriorityEngine,
    /// Business dimensions
    pub business: BusinessClassifier,
    /// Signal mode
    pub signal_mode: SignalModeClassifier,
    /// Custom labels
    pub custom_labels: CustomLabelExtractor,
}

impl Classifiers {
    /// Build every classifier from one configuration
    #[must_use]
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, config: &ClassificationConfig) -> Self {
        Self {
            environment: EnvironmentClassifier::new(
                Arc::clone(&evaluator),
                config.policy_budget,
                config.environment.clone(),
            ),
            priority: PriorityEngine::new(Arc::clone(&evaluator), config.policy_budget),
            business: BusinessClassifier::new(Arc::clone(&evaluator), config.policy_budget),
            signal_mode: SignalModeClassifier::new(
                Arc::clone(&evaluator),
                config.policy_budget,
                config.signal_mode.clone(),
            ),
            custom_labels: CustomLabelExtractor::new(evaluator, config.custom_label_budget),
        }
    }
}
