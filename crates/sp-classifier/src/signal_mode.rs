//! Signal mode classification
//!
//! Proactive signals forecast a condition (`PredictedOOMKill`); downstream
//! consumers match on the reactive name (`OOMKilled`). Rules in
//! `signal_mode.yaml` may set `mode` and `signalName`; otherwise the
//! configured proactive mappings decide, and anything unmapped is reactive.

use crate::config::SignalModeConfig;
use crate::input::PolicyInput;
use crate::policy::{consult, keyed_text};
use sp_policy::{EvaluationBudget, PolicyDomain, PolicyEvaluator};
use sp_types::{
    ClassificationSource, EnrichmentContext, SignalMode, SignalModeClassification, SignalRequest,
};
use std::sync::Arc;

/// Classifies signals as reactive or proactive
#[derive(Clone)]
pub struct SignalModeClassifier {
    evaluator: Arc<dyn PolicyEvaluator>,
    budget: EvaluationBudget,
    config: SignalModeConfig,
}

impl std::fmt::Debug for SignalModeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalModeClassifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn parse_mode(raw: &str) -> Option<SignalMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "reactive" => Some(SignalMode::Reactive),
        "proactive" | "predictive" => Some(SignalMode::Proactive),
        _ => None,
    }
}

impl SignalModeClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new(
        evaluator: Arc<dyn PolicyEvaluator>,
        budget: EvaluationBudget,
        config: SignalModeConfig,
    ) -> Self {
        Self {
            evaluator,
            budget,
            config,
        }
    }

    /// Mode from the configured mappings alone
    #[must_use]
    pub fn classify_static(&self, signal_name: &str) -> SignalModeClassification {
        match self.config.proactive_mappings.get(signal_name) {
            Some(reactive) => SignalModeClassification {
                mode: SignalMode::Proactive,
                signal_name: reactive.clone(),
                original_signal_name: signal_name.to_string(),
                source: ClassificationSource::Fallback,
            },
            None => SignalModeClassification {
                mode: SignalMode::Reactive,
                signal_name: signal_name.to_string(),
                original_signal_name: signal_name.to_string(),
                source: ClassificationSource::Default,
            },
        }
    }

    /// Classify, consulting rules first
    pub async fn classify(
        &self,
        signal: &SignalRequest,
        ctx: &EnrichmentContext,
    ) -> SignalModeClassification {
        let input = PolicyInput::new(signal, ctx).into_value();
        let from_policy = consult(
            self.evaluator.as_ref(),
            PolicyDomain::SignalMode,
            &input,
            &self.budget,
        )
        .await
        .ok()
        .and_then(|eval| {
            let (mode, _) = keyed_text(&eval, "mode")?;
            let mode = parse_mode(&mode)?;
            let name = keyed_text(&eval, "signalName").map(|(n, _)| n);
            Some((mode, name))
        });

        let original = signal.signal_name.as_str();
        let classification = match from_policy {
            Some((mode, name)) => {
                let signal_name = name.unwrap_or_else(|| match mode {
                    SignalMode::Proactive => self
                        .config
                        .proactive_mappings
                        .get(original)
                        .cloned()
                        .unwrap_or_else(|| original.to_string()),
                    SignalMode::Reactive => original.to_string(),
                });
                SignalModeClassification {
                    mode,
                    signal_name,
                    original_signal_name: original.to_string(),
                    source: ClassificationSource::Policy,
                }
            }
            None => self.classify_static(original),
        };
        crate::fallback::record("signal_mode", classification.source);
        tracing::debug!(
            signal = original,
            mode = ?classification.mode,
            normalized = %classification.signal_name,
            "signal mode classified"
        );
        classification
    }
}
