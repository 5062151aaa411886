//! Evaluation budgets
//!
//! Rules are evaluated by an interpreter that charges every expression node
//! against a [`Meter`]. The meter enforces three ceilings:
//!
//! - **Wall clock**: checked on every step against a fixed deadline
//! - **Steps**: one per expression node and per rule visited
//! - **Memory**: bytes of input resolved, regex haystacks scanned and
//!   output produced
//!
//! Exceeding any ceiling aborts that evaluation only. The async engine adds
//! an outer `tokio::time::timeout` so a caller is never held past the
//! wall-clock budget even if the interpreter is starved of CPU.

use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Resource limits for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationBudget {
    /// Wall-clock limit
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Memory ceiling in bytes
    pub max_memory_bytes: u64,
    /// Step ceiling
    pub max_steps: u64,
}

impl Default for EvaluationBudget {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_memory_bytes: 128 * 1024 * 1024,
            max_steps: 100_000,
        }
    }
}

impl EvaluationBudget {
    /// Budget for operator-authored custom label rules
    #[must_use]
    pub fn strict() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_memory_bytes: 16 * 1024 * 1024,
            max_steps: 10_000,
        }
    }

    /// Set the wall-clock limit
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the memory ceiling
    #[inline]
    #[must_use]
    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the step ceiling
    #[inline]
    #[must_use]
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }
}

/// Running account of one evaluation
#[derive(Debug)]
pub struct Meter {
    deadline: Instant,
    timeout: Duration,
    max_steps: u64,
    max_bytes: u64,
    steps: u64,
    bytes: u64,
}

impl Meter {
    /// Start metering now
    #[must_use]
    pub fn new(budget: &EvaluationBudget) -> Self {
        Self {
            deadline: Instant::now() + budget.timeout,
            timeout: budget.timeout,
            max_steps: budget.max_steps,
            max_bytes: budget.max_memory_bytes,
            steps: 0,
            bytes: 0,
        }
    }

    /// Charge one step
    ///
    /// # Errors
    /// Step or wall-clock budget exhausted.
    pub fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(PolicyError::StepLimitExceeded(self.max_steps));
        }
        if Instant::now() >= self.deadline {
            return Err(PolicyError::Timeout(self.timeout));
        }
        Ok(())
    }

    /// Charge bytes
    ///
    /// # Errors
    /// Memory budget exhausted.
    pub fn charge(&mut self, bytes: usize) -> Result<()> {
        self.bytes = self.bytes.saturating_add(bytes as u64);
        if self.bytes > self.max_bytes {
            return Err(PolicyError::MemoryExceeded {
                used: self.bytes,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Steps used so far
    #[inline]
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Bytes charged so far
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_budget_is_tighter_than_default() {
        let strict = EvaluationBudget::strict();
        let default = EvaluationBudget::default();
        assert!(strict.timeout < default.timeout);
        assert!(strict.max_memory_bytes < default.max_memory_bytes);
        assert!(strict.max_steps < default.max_steps);
    }

    #[test]
    fn step_limit_aborts() {
        let mut meter = Meter::new(&EvaluationBudget::default().with_max_steps(3));
        for _ in 0..3 {
            meter.step().unwrap();
        }
        assert!(matches!(meter.step(), Err(PolicyError::StepLimitExceeded(3))));
    }

    #[test]
    fn memory_limit_aborts() {
        let mut meter = Meter::new(&EvaluationBudget::default().with_max_memory_bytes(100));
        meter.charge(60).unwrap();
        let err = meter.charge(60).unwrap_err();
        assert!(matches!(err, PolicyError::MemoryExceeded { used: 120, limit: 100 }));
    }

    #[test]
    fn zero_timeout_aborts_on_first_step() {
        let mut meter = Meter::new(&EvaluationBudget::default().with_timeout(Duration::ZERO));
        assert!(matches!(meter.step(), Err(PolicyError::Timeout(_))));
    }

    #[test]
    fn budget_deserializes_millis() {
        let budget: EvaluationBudget =
            serde_json::from_str(r#"{"timeout": 250, "max_steps": 42}"#).unwrap();
        assert_eq!(budget.timeout, Duration::from_millis(250));
        assert_eq!(budget.max_steps, 42);
        assert_eq!(budget.max_memory_bytes, 128 * 1024 * 1024);
    }
}
