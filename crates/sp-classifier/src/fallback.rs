//! Fallback chains
//!
//! A classifier is an ordered list of strategies, each tagged with the
//! [`ClassificationSource`] it reports. Strategies run lazily in order and
//! the first answer wins; when none answers, the default value is used
//! with zero confidence. Every attempt is recorded for diagnostics.

use sp_types::{ClassificationResult, ClassificationSource, EnrichmentContext};

/// Confidence multiplier applied when enrichment was degraded
pub const DEGRADED_CONFIDENCE_FACTOR: f64 = 0.8;

/// One strategy that was tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Strategy name
    pub strategy: &'static str,
    /// Source the strategy reports
    pub source: ClassificationSource,
    /// Whether it produced the answer
    pub answered: bool,
}

/// Final result plus the attempts that led to it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    /// Winning classification
    pub result: ClassificationResult<T>,
    /// Strategies in the order tried
    pub attempts: Vec<Attempt>,
}

type Run<'a, T> = Box<dyn FnOnce() -> Option<(T, f64)> + Send + 'a>;

struct Step<'a, T> {
    name: &'static str,
    source: ClassificationSource,
    run: Run<'a, T>,
}

/// Ordered strategies with a default
pub struct FallbackChain<'a, T> {
    steps: Vec<Step<'a, T>>,
}

impl<T> Default for FallbackChain<'_, T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, T> FallbackChain<'a, T> {
    /// Empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy
    #[must_use]
    pub fn then(
        mut self,
        name: &'static str,
        source: ClassificationSource,
        run: impl FnOnce() -> Option<(T, f64)> + Send + 'a,
    ) -> Self {
        self.steps.push(Step {
            name,
            source,
            run: Box::new(run),
        });
        self
    }

    /// Append an answer computed ahead of time (typically the policy result)
    #[must_use]
    pub fn then_value(
        self,
        name: &'static str,
        source: ClassificationSource,
        value: Option<(T, f64)>,
    ) -> Self
    where
        T: Send + 'a,
    {
        self.then(name, source, move || value)
    }

    /// Run strategies in order; fall back to `default` at zero confidence
    pub fn resolve(self, default: T) -> Resolution<T> {
        let mut attempts = Vec::with_capacity(self.steps.len() + 1);
        for step in self.steps {
            let answer = (step.run)();
            attempts.push(Attempt {
                strategy: step.name,
                source: step.source,
                answered: answer.is_some(),
            });
            if let Some((value, confidence)) = answer {
                return Resolution {
                    result: ClassificationResult::new(value, confidence, step.source),
                    attempts,
                };
            }
        }
        attempts.push(Attempt {
            strategy: "default",
            source: ClassificationSource::Default,
            answered: true,
        });
        Resolution {
            result: ClassificationResult::default_value(default),
            attempts,
        }
    }
}

/// Lower confidence for results computed from a degraded context
#[must_use]
pub fn adjust_for_context<T>(
    result: ClassificationResult<T>,
    ctx: &EnrichmentContext,
) -> ClassificationResult<T> {
    if ctx.degraded {
        result.scaled(DEGRADED_CONFIDENCE_FACTOR)
    } else {
        result
    }
}

/// Record a classification outcome
pub(crate) fn record(classifier: &'static str, source: ClassificationSource) {
    metrics::counter!(
        "signalprocessing_classification_total",
        "classifier" => classifier,
        "source" => source.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_types::ResourceRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_answer_wins() {
        let res = FallbackChain::new()
            .then_value("policy", ClassificationSource::Policy, None)
            .then("label", ClassificationSource::Fallback, || Some(("a", 0.9)))
            .then("other", ClassificationSource::Fallback, || Some(("b", 0.5)))
            .resolve("z");
        assert_eq!(res.result.value, "a");
        assert_eq!(res.result.source, ClassificationSource::Fallback);
        assert_eq!(res.attempts.len(), 2);
        assert!(!res.attempts[0].answered);
    }

    #[test]
    fn later_strategies_are_not_run() {
        let calls = AtomicUsize::new(0);
        let res = FallbackChain::new()
            .then_value("policy", ClassificationSource::Policy, Some((1, 0.95)))
            .then("label", ClassificationSource::Fallback, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Some((2, 0.5))
            })
            .resolve(0);
        assert_eq!(res.result.value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_has_zero_confidence() {
        let res = FallbackChain::<&str>::new()
            .then("label", ClassificationSource::Fallback, || None)
            .resolve("unknown");
        assert_eq!(res.result.source, ClassificationSource::Default);
        assert_eq!(res.result.confidence, 0.0);
        assert_eq!(res.attempts.last().unwrap().strategy, "default");
    }

    #[test]
    fn degraded_context_lowers_confidence() {
        let ctx = sp_types::EnrichmentContext::degraded(ResourceRef::new("n", "Pod", "p"), "x");
        let r = adjust_for_context(ClassificationResult::fallback("v", 0.5), &ctx);
        assert!((r.confidence - 0.4).abs() < 1e-9);
    }
}
