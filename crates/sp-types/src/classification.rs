//! Classification results
//!
//! Every classifier output carries the value, a confidence in `[0, 1]`, and
//! the strategy that produced it. Operators diagnose degraded runs from the
//! source tags, so the tag is never optional.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which strategy produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    /// Declarative policy bundle
    Policy,
    /// Deterministic fallback (labels, static mapping, matrix)
    Fallback,
    /// Fixed default value
    Default,
}

impl ClassificationSource {
    /// Lowercase name, used as a metric label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Fallback => "fallback",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified value with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult<T> {
    /// Classified value
    pub value: T,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Strategy that produced the value
    pub source: ClassificationSource,
}

impl<T> ClassificationResult<T> {
    /// Create a result; confidence is clamped to `[0, 1]`
    #[inline]
    #[must_use]
    pub fn new(value: T, confidence: f64, source: ClassificationSource) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            value,
            confidence,
            source,
        }
    }

    /// Result produced by a policy
    #[inline]
    #[must_use]
    pub fn policy(value: T, confidence: f64) -> Self {
        Self::new(value, confidence, ClassificationSource::Policy)
    }

    /// Result produced by a fallback
    #[inline]
    #[must_use]
    pub fn fallback(value: T, confidence: f64) -> Self {
        Self::new(value, confidence, ClassificationSource::Fallback)
    }

    /// Default value with zero confidence
    #[inline]
    #[must_use]
    pub fn default_value(value: T) -> Self {
        Self::new(value, 0.0, ClassificationSource::Default)
    }

    /// Scale confidence, keeping value and source
    #[inline]
    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        self.confidence = (self.confidence * factor).clamp(0.0, 1.0);
        self
    }

    /// Map the value, keeping confidence and source
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ClassificationResult<U> {
        ClassificationResult {
            value: f(self.value),
            confidence: self.confidence,
            source: self.source,
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production
    Production,
    /// Staging / pre-production
    Staging,
    /// Development
    Development,
    /// Test / QA
    Test,
    /// Could not be determined
    Unknown,
}

impl Environment {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
            Self::Test => "test",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    /// Accepts the canonical names and their common abbreviations
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "prd" | "live" => Ok(Self::Production),
            "staging" | "stage" | "stg" | "preprod" | "pre-production" | "uat" => Ok(Self::Staging),
            "development" | "dev" | "develop" | "sandbox" => Ok(Self::Development),
            "test" | "testing" | "qa" | "ci" => Ok(Self::Test),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unrecognized environment: '{other}'")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tier, `P0` highest
///
/// The derived ordering sorts `P0` first, so `P0 < P3` means "more urgent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Immediate response
    P0,
    /// Urgent
    P1,
    /// Normal
    P2,
    /// Low
    P3,
}

impl Priority {
    /// Tier name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            other => Err(format!("unrecognized priority: '{other}'")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business criticality of the affected service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Revenue or safety critical
    Critical,
    /// Important
    High,
    /// Standard
    Medium,
    /// Best effort
    Low,
}

impl FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "tier-0" | "tier0" => Ok(Self::Critical),
            "high" | "tier-1" | "tier1" => Ok(Self::High),
            "medium" | "tier-2" | "tier2" => Ok(Self::Medium),
            "low" | "tier-3" | "tier3" => Ok(Self::Low),
            other => Err(format!("unrecognized criticality: '{other}'")),
        }
    }
}

/// Service level tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaTier {
    /// 99.99%
    Platinum,
    /// 99.9%
    Gold,
    /// 99.5%
    Silver,
    /// Best effort
    Bronze,
}

impl FromStr for SlaTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platinum" => Ok(Self::Platinum),
            "gold" => Ok(Self::Gold),
            "silver" => Ok(Self::Silver),
            "bronze" => Ok(Self::Bronze),
            other => Err(format!("unrecognized sla tier: '{other}'")),
        }
    }
}

/// Multi-dimensional business classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessClassification {
    /// Owning business unit
    pub business_unit: ClassificationResult<String>,
    /// Owning team
    pub service_owner: ClassificationResult<String>,
    /// Business criticality
    pub criticality: ClassificationResult<Criticality>,
    /// SLA requirement
    pub sla_requirement: ClassificationResult<SlaTier>,
    /// Combined confidence over all dimensions
    pub confidence: f64,
}

/// Whether a signal reports a problem that happened or one that is predicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// The condition has occurred
    Reactive,
    /// The condition is forecast
    Proactive,
}

/// Signal mode with the normalized signal name used downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalModeClassification {
    /// Reactive or proactive
    pub mode: SignalMode,
    /// Signal name to use downstream (the reactive equivalent for proactive signals)
    pub signal_name: String,
    /// Name as received
    pub original_signal_name: String,
    /// Strategy that produced the mode
    pub source: ClassificationSource,
}
