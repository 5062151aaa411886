//! Controller metrics
//!
//! Recorded through the `metrics` facade; installing a recorder and
//! exporting is left to the embedding process.

use sp_types::Phase;
use std::time::Duration;

/// Reconcile passes by the phase they started in and their result
pub const RECONCILIATIONS_TOTAL: &str = "signalprocessing_reconciliations_total";
/// Duration of one reconcile pass
pub const RECONCILE_DURATION_SECONDS: &str = "signalprocessing_reconcile_duration_seconds";
/// Time spent in a phase before leaving it
pub const PHASE_DURATION_SECONDS: &str = "signalprocessing_phase_duration_seconds";
/// Errors by kind
pub const ERRORS_TOTAL: &str = "signalprocessing_errors_total";

/// Record the outcome of one pass
pub(crate) fn record_pass(phase: Phase, result: &'static str, elapsed: Duration) {
    metrics::counter!(RECONCILIATIONS_TOTAL, "phase" => phase.as_str(), "result" => result)
        .increment(1);
    metrics::histogram!(RECONCILE_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

/// Record how long a resource stayed in `phase`
pub(crate) fn record_phase_duration(phase: Phase, seconds: f64) {
    metrics::histogram!(PHASE_DURATION_SECONDS, "phase" => phase.as_str()).record(seconds);
}

/// Count an error
pub(crate) fn record_error(kind: &'static str) {
    metrics::counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
}
