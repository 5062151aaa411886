//! Classifier configuration

use serde::{Deserialize, Serialize};
use sp_policy::EvaluationBudget;
use sp_types::Environment;
use std::collections::BTreeMap;

/// Namespace label carrying the environment by convention
pub const ENVIRONMENT_LABEL: &str = "kubernaut.ai/environment";

/// Fallback settings for environment classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EnvironmentConfig {
    /// Namespace label read before any mapping
    pub namespace_label: String,
    /// Exact namespace name → environment
    pub namespace_mapping: BTreeMap<String, Environment>,
    /// Namespace name prefix → environment; the longest match wins
    pub namespace_prefixes: BTreeMap<String, Environment>,
    /// Also apply the built-in `prod-`, `staging-`, `dev-`, ... prefixes
    pub builtin_prefixes: bool,
    /// Signal label read as the last fallback
    pub signal_label: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            namespace_label: ENVIRONMENT_LABEL.to_string(),
            namespace_mapping: BTreeMap::new(),
            namespace_prefixes: BTreeMap::new(),
            builtin_prefixes: true,
            signal_label: "environment".to_string(),
        }
    }
}

impl EnvironmentConfig {
    /// With an exact namespace mapping
    #[must_use]
    pub fn with_mapping(mut self, namespace: impl Into<String>, env: Environment) -> Self {
        self.namespace_mapping.insert(namespace.into(), env);
        self
    }

    /// With a namespace prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>, env: Environment) -> Self {
        self.namespace_prefixes.insert(prefix.into(), env);
        self
    }
}

/// Proactive signal names and their reactive equivalents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SignalModeConfig {
    /// Proactive signal name → reactive signal name
    pub proactive_mappings: BTreeMap<String, String>,
}

impl Default for SignalModeConfig {
    fn default() -> Self {
        let proactive_mappings = [
            ("PredictedOOMKill", "OOMKilled"),
            ("PredictedCPUThrottling", "CPUThrottling"),
            ("PredictedDiskPressure", "DiskPressure"),
            ("PredictedNodeNotReady", "NodeNotReady"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { proactive_mappings }
    }
}

/// Everything the classifiers need besides the policy evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClassificationConfig {
    /// Budget for environment, priority, business and signal mode rules
    pub policy_budget: EvaluationBudget,
    /// Budget for custom label rules
    pub custom_label_budget: EvaluationBudget,
    /// Environment fallbacks
    pub environment: EnvironmentConfig,
    /// Signal mode mappings
    pub signal_mode: SignalModeConfig,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            policy_budget: EvaluationBudget::default(),
            custom_label_budget: EvaluationBudget::strict(),
            environment: EnvironmentConfig::default(),
            signal_mode: SignalModeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_labels_get_the_strict_budget() {
        let cfg = ClassificationConfig::default();
        assert!(cfg.custom_label_budget.timeout < cfg.policy_budget.timeout);
        assert!(cfg.custom_label_budget.max_memory_bytes < cfg.policy_budget.max_memory_bytes);
    }

    #[test]
    fn default_proactive_mappings() {
        let cfg = SignalModeConfig::default();
        assert_eq!(
            cfg.proactive_mappings.get("PredictedOOMKill").map(String::as_str),
            Some("OOMKilled")
        );
    }
}
