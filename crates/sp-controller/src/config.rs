//! Controller configuration
//!
//! Loaded from TOML or YAML, chosen by file extension. Every section has
//! defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [reconcile]
//! max_concurrent = 8
//! pass_timeout = 30000        # milliseconds
//! max_retries = 5
//!
//! [policy]
//! directory = "/etc/signal-processing/policies"
//! poll_interval = 10000
//!
//! [environment.namespace_prefixes]
//! "shop-prod-" = "production"
//! ```

use crate::error::ConfigError;
use crate::retry::Backoff;
use serde::{Deserialize, Serialize};
use sp_audit::AuditConfig;
use sp_classifier::{ClassificationConfig, EnvironmentConfig, SignalModeConfig};
use sp_enrichment::EnricherConfig;
use sp_policy::EvaluationBudget;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Passes running at once
    pub max_concurrent: usize,
    /// Deadline for one pass
    #[serde(with = "duration_millis")]
    pub pass_timeout: Duration,
    /// Transient failures tolerated per phase
    pub max_retries: u32,
    /// First retry delay
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    /// Longest retry delay
    #[serde(with = "duration_millis")]
    pub backoff_cap: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            pass_timeout: Duration::from_secs(30),
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl ReconcileConfig {
    /// Set the concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Set the pass deadline
    #[inline]
    #[must_use]
    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Set the retry budget
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set base and cap of the backoff schedule
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Backoff schedule
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap)
    }
}

/// Policy source and budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Watched directory; none means fallbacks only
    pub directory: Option<PathBuf>,
    /// Rescan interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Budget for environment, priority, business and signal mode rules
    pub evaluation_budget: EvaluationBudget,
    /// Budget for custom label rules
    pub custom_label_budget: EvaluationBudget,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            directory: None,
            poll_interval: Duration::from_secs(10),
            evaluation_budget: EvaluationBudget::default(),
            custom_label_budget: EvaluationBudget::strict(),
        }
    }
}

/// Where audit events go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditSinkConfig {
    /// Structured log records
    #[default]
    Tracing,
    /// JSON lines appended to a file
    JsonLines {
        /// Target file
        path: PathBuf,
    },
}

/// Audit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditSettings {
    /// Buffer and batching
    #[serde(flatten)]
    pub emitter: AuditConfig,
    /// Destination
    pub sink: AuditSinkConfig,
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Reconciliation
    pub reconcile: ReconcileConfig,
    /// Cluster context enrichment
    pub enrichment: EnricherConfig,
    /// Policy source and budgets
    pub policy: PolicyConfig,
    /// Audit trail
    pub audit: AuditSettings,
    /// Environment fallbacks
    pub environment: EnvironmentConfig,
    /// Proactive signal mappings
    pub signal_mode: SignalModeConfig,
}

impl ControllerConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file and validate
    ///
    /// # Errors
    /// Unreadable file, unknown extension, parse failure or invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let config: Self = match ext.as_deref() {
            Some("toml") => toml::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            Some("yaml" | "yml") => {
                if text.trim().is_empty() {
                    Self::default()
                } else {
                    serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?
                }
            }
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.reconcile.max_concurrent == 0 {
            return invalid("reconcile.max_concurrent must be at least 1");
        }
        if self.reconcile.pass_timeout <= self.enrichment.timeout {
            return invalid("reconcile.pass_timeout must exceed enrichment.timeout");
        }
        if self.reconcile.backoff_base.is_zero() {
            return invalid("reconcile.backoff_base must be positive");
        }
        if self.reconcile.backoff_cap < self.reconcile.backoff_base {
            return invalid("reconcile.backoff_cap must be at least backoff_base");
        }
        if self.enrichment.timeout.is_zero() {
            return invalid("enrichment.timeout must be positive");
        }
        if self.policy.poll_interval.is_zero() {
            return invalid("policy.poll_interval must be positive");
        }
        for (name, budget) in [
            ("policy.evaluation_budget", &self.policy.evaluation_budget),
            ("policy.custom_label_budget", &self.policy.custom_label_budget),
        ] {
            if budget.timeout.is_zero() || budget.max_steps == 0 || budget.max_memory_bytes == 0 {
                return Err(ConfigError::Invalid(format!("{name} limits must be positive")));
            }
        }
        if self.audit.emitter.capacity == 0 || self.audit.emitter.batch_size == 0 {
            return invalid("audit.capacity and audit.batch_size must be positive");
        }
        Ok(())
    }

    /// Classifier settings derived from this configuration
    #[must_use]
    pub fn classification(&self) -> ClassificationConfig {
        ClassificationConfig {
            policy_budget: self.policy.evaluation_budget,
            custom_label_budget: self.policy.custom_label_budget,
            environment: self.environment.clone(),
            signal_mode: self.signal_mode.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_types::Environment;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        ControllerConfig::default().validate().unwrap();
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.toml",
            r#"
[reconcile]
max_concurrent = 2
max_retries = 3

[policy]
directory = "/tmp/policies"

[environment.namespace_mapping]
payments = "production"

[audit]
capacity = 10
sink = { kind = "json_lines", path = "/tmp/audit.jsonl" }
"#,
        );
        let cfg = ControllerConfig::load(&path).unwrap();
        assert_eq!(cfg.reconcile.max_concurrent, 2);
        assert_eq!(cfg.reconcile.max_retries, 3);
        assert_eq!(cfg.policy.directory, Some(PathBuf::from("/tmp/policies")));
        assert_eq!(
            cfg.environment.namespace_mapping.get("payments"),
            Some(&Environment::Production)
        );
        assert_eq!(cfg.audit.emitter.capacity, 10);
        assert!(matches!(cfg.audit.sink, AuditSinkConfig::JsonLines { .. }));
        assert_eq!(cfg.reconcile.pass_timeout, Duration::from_secs(30));
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.yaml",
            "enrichment:\n  timeout: 500\n  cache_enabled: false\nsignal_mode:\n  proactive_mappings:\n    PredictedFoo: Foo\n",
        );
        let cfg = ControllerConfig::load(&path).unwrap();
        assert_eq!(cfg.enrichment.timeout, Duration::from_millis(500));
        assert!(!cfg.enrichment.cache_enabled);
        assert_eq!(cfg.classification().signal_mode.proactive_mappings.len(), 1);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "config.ini", "");
        assert!(matches!(
            ControllerConfig::load(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn pass_timeout_must_exceed_enrichment_timeout() {
        let mut cfg = ControllerConfig::default();
        cfg.reconcile.pass_timeout = Duration::from_secs(1);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
