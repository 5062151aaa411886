//! Readiness and liveness
//!
//! Ready once the controller loop runs and the first policy load attempt
//! has finished, whatever its outcome. Live while the controller loop and
//! the audit drain are both running.

use serde::Serialize;
use sp_audit::AuditEmitter;
use std::sync::atomic::{AtomicBool, Ordering};

/// Snapshot of the probe state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    /// Ready to process
    pub ready: bool,
    /// Background tasks alive
    pub live: bool,
    /// Controller loop running
    pub controller_running: bool,
    /// First policy load finished
    pub policy_attempted: bool,
    /// Audit drain running
    pub audit_running: bool,
}

/// Probe state shared by the controller components
#[derive(Debug)]
pub struct Readiness {
    controller_running: AtomicBool,
    policy_attempted: AtomicBool,
    audit: Option<AuditEmitter>,
}

impl Readiness {
    /// Fresh state; `audit` is consulted for liveness when given
    #[must_use]
    pub fn new(audit: Option<AuditEmitter>) -> Self {
        Self {
            controller_running: AtomicBool::new(false),
            policy_attempted: AtomicBool::new(false),
            audit,
        }
    }

    /// Controller loop started or stopped
    pub fn set_controller_running(&self, running: bool) {
        self.controller_running.store(running, Ordering::Release);
    }

    /// First policy load attempt finished
    pub fn mark_policy_attempted(&self) {
        self.policy_attempted.store(true, Ordering::Release);
    }

    /// Current state
    #[must_use]
    pub fn report(&self) -> ReadinessReport {
        let controller_running = self.controller_running.load(Ordering::Acquire);
        let policy_attempted = self.policy_attempted.load(Ordering::Acquire);
        let audit_running = self.audit.as_ref().map_or(true, AuditEmitter::is_running);
        ReadinessReport {
            ready: controller_running && policy_attempted,
            live: controller_running && audit_running,
            controller_running,
            policy_attempted,
            audit_running,
        }
    }

    /// Whether the controller is ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.report().ready
    }

    /// Whether background tasks are alive
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.report().live
    }
}
