//! Label detection
//!
//! Eight independent detectors read the [`EnrichmentContext`] and report
//! whether a property holds. Each runs isolated: a detector that cannot
//! decide, or panics, yields a [`FailedDetection`] and the rest carry on.
//! "Not detected" (looked, absent) is never confused with "failed" (could
//! not look).
//!
//! | Category | Evidence |
//! |----------|----------|
//! | gitOpsManaged | Argo CD / Flux labels or annotations |
//! | pdbProtected | a PodDisruptionBudget selecting the target |
//! | hpaEnabled | an autoscaler targeting the object or an owner |
//! | stateful | a StatefulSet in the target or its owner chain |
//! | helmManaged | `managed-by: Helm` or Helm release annotations |
//! | networkIsolated | any NetworkPolicy in the namespace |
//! | serviceMesh | Istio or Linkerd sidecar / injection markers |
//! | resourceQuotaConstrained | any ResourceQuota in the namespace |

use sp_types::{
    DetectedLabel, DetectedLabels, DetectionCategory, DetectionFailureReason, EnrichmentContext,
    FailedDetection, ObjectContext,
};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Why a detector could not decide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionFailure {
    /// Reason code
    pub reason: DetectionFailureReason,
    /// Detail
    pub message: String,
}

impl DetectionFailure {
    /// Backing query failed during enrichment
    #[must_use]
    pub fn query_failed(what: &str) -> Self {
        Self {
            reason: DetectionFailureReason::QueryFailed,
            message: format!("{what} could not be listed"),
        }
    }

    /// Needed context is absent
    #[must_use]
    pub fn missing(what: &str) -> Self {
        Self {
            reason: DetectionFailureReason::MissingContext,
            message: format!("{what} unavailable"),
        }
    }
}

/// One detection rule
pub trait Detector: Send + Sync {
    /// Category this detector decides
    fn category(&self) -> DetectionCategory;

    /// Decide from the context
    ///
    /// # Errors
    /// `DetectionFailure` when the context does not allow a decision.
    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure>;
}

/// Workload, target object and namespace, nearest first
fn scopes(ctx: &EnrichmentContext) -> impl Iterator<Item = &ObjectContext> {
    [ctx.workload.as_ref(), ctx.object.as_ref(), ctx.namespace.as_ref()]
        .into_iter()
        .flatten()
}

fn require_some_scope(ctx: &EnrichmentContext) -> Result<(), DetectionFailure> {
    if ctx.workload.is_none() && ctx.object.is_none() && ctx.namespace.is_none() {
        Err(DetectionFailure::missing("object and namespace metadata"))
    } else {
        Ok(())
    }
}

struct GitOpsDetector;

impl Detector for GitOpsDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::GitOpsManaged
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        require_some_scope(ctx)?;
        for scope in scopes(ctx) {
            if scope.label("argocd.argoproj.io/instance").is_some()
                || scope.annotation("argocd.argoproj.io/tracking-id").is_some()
                || scope.annotation("argocd.argoproj.io/managed-by").is_some()
            {
                return Ok(DetectedLabel::detected(self.category(), Some("argocd".into())));
            }
            if scope.label("kustomize.toolkit.fluxcd.io/name").is_some()
                || scope.label("helm.toolkit.fluxcd.io/name").is_some()
                || scope.annotation("fluxcd.io/sync-checksum").is_some()
            {
                return Ok(DetectedLabel::detected(self.category(), Some("flux".into())));
            }
        }
        Ok(DetectedLabel::not_detected(self.category()))
    }
}

struct PdbDetector;

impl Detector for PdbDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::PdbProtected
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        let budgets = ctx
            .disruption_budgets
            .as_ref()
            .ok_or_else(|| DetectionFailure::query_failed("PodDisruptionBudgets"))?;
        let object = ctx
            .object
            .as_ref()
            .ok_or_else(|| DetectionFailure::missing("target labels"))?;
        let hit = budgets.iter().find(|pdb| {
            pdb.selects(&object.labels) || ctx.workload.as_ref().is_some_and(|w| pdb.selects(&w.labels))
        });
        Ok(match hit {
            Some(pdb) => DetectedLabel::detected(self.category(), Some(pdb.name.clone())),
            None => DetectedLabel::not_detected(self.category()),
        })
    }
}

struct HpaDetector;

impl Detector for HpaDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::HpaEnabled
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        let autoscalers = ctx
            .autoscalers
            .as_ref()
            .ok_or_else(|| DetectionFailure::query_failed("HorizontalPodAutoscalers"))?;
        let targets = std::iter::once(&ctx.target).chain(ctx.owner_chain.entries.iter());
        for target in targets {
            if let Some(hpa) = autoscalers
                .iter()
                .find(|h| h.target_kind == target.kind && h.target_name == target.name)
            {
                return Ok(DetectedLabel::detected(self.category(), Some(hpa.name.clone())));
            }
        }
        Ok(DetectedLabel::not_detected(self.category()))
    }
}

struct StatefulDetector;

impl Detector for StatefulDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::Stateful
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        if ctx.target.kind == "StatefulSet" || ctx.owner_chain.contains_kind("StatefulSet") {
            return Ok(DetectedLabel::detected(self.category(), None));
        }
        // Without the object the owner chain was never walked
        if ctx.object.is_none() {
            return Err(DetectionFailure::missing("owner chain"));
        }
        Ok(DetectedLabel::not_detected(self.category()))
    }
}

struct HelmDetector;

impl Detector for HelmDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::HelmManaged
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        if ctx.workload.is_none() && ctx.object.is_none() {
            return Err(DetectionFailure::missing("object metadata"));
        }
        for scope in [ctx.workload.as_ref(), ctx.object.as_ref()].into_iter().flatten() {
            let managed = scope
                .label("app.kubernetes.io/managed-by")
                .is_some_and(|v| v.eq_ignore_ascii_case("helm"));
            let release = scope.annotation("meta.helm.sh/release-name");
            if managed || release.is_some() || scope.label("helm.sh/chart").is_some() {
                return Ok(DetectedLabel::detected(
                    self.category(),
                    release.map(str::to_string),
                ));
            }
        }
        Ok(DetectedLabel::not_detected(self.category()))
    }
}

struct NetworkIsolationDetector;

impl Detector for NetworkIsolationDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::NetworkIsolated
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        let policies = ctx
            .network_policies
            .as_ref()
            .ok_or_else(|| DetectionFailure::query_failed("NetworkPolicies"))?;
        Ok(if policies.is_empty() {
            DetectedLabel::not_detected(self.category())
        } else {
            DetectedLabel::detected(self.category(), None)
        })
    }
}

struct ServiceMeshDetector;

impl Detector for ServiceMeshDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::ServiceMesh
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        require_some_scope(ctx)?;
        let istio = scopes(ctx).any(|s| {
            s.annotation("sidecar.istio.io/status").is_some()
                || s.label("security.istio.io/tlsMode").is_some()
                || s.label("istio.io/rev").is_some()
                || s.label("istio-injection") == Some("enabled")
        });
        if istio {
            return Ok(DetectedLabel::detected(self.category(), Some("istio".into())));
        }
        let linkerd = scopes(ctx).any(|s| {
            s.annotation("linkerd.io/proxy-version").is_some()
                || s.annotation("linkerd.io/inject") == Some("enabled")
        });
        if linkerd {
            return Ok(DetectedLabel::detected(self.category(), Some("linkerd".into())));
        }
        Ok(DetectedLabel::not_detected(self.category()))
    }
}

struct ResourceQuotaDetector;

impl Detector for ResourceQuotaDetector {
    fn category(&self) -> DetectionCategory {
        DetectionCategory::ResourceQuotaConstrained
    }

    fn detect(&self, ctx: &EnrichmentContext) -> Result<DetectedLabel, DetectionFailure> {
        let quotas = ctx
            .resource_quotas
            .as_ref()
            .ok_or_else(|| DetectionFailure::query_failed("ResourceQuotas"))?;
        Ok(if quotas.is_empty() {
            DetectedLabel::not_detected(self.category())
        } else {
            DetectedLabel::detected(self.category(), None)
        })
    }
}

/// Runs every detector, one per category
pub struct LabelDetector {
    detectors: Vec<Box<dyn Detector>>,
}

impl Default for LabelDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LabelDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelDetector")
            .field("detectors", &self.detectors.len())
            .finish()
    }
}

impl LabelDetector {
    /// The standard eight detectors
    #[must_use]
    pub fn new() -> Self {
        Self {
            detectors: vec![
                Box::new(GitOpsDetector),
                Box::new(PdbDetector),
                Box::new(HpaDetector),
                Box::new(StatefulDetector),
                Box::new(HelmDetector),
                Box::new(NetworkIsolationDetector),
                Box::new(ServiceMeshDetector),
                Box::new(ResourceQuotaDetector),
            ],
        }
    }

    /// Replace the detector for a category
    #[must_use]
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        let category = detector.category();
        self.detectors.retain(|d| d.category() != category);
        self.detectors.push(detector);
        self
    }

    /// Run all detectors; results come back in category order
    #[must_use]
    pub fn detect(&self, ctx: &EnrichmentContext) -> DetectedLabels {
        let mut result = DetectedLabels::default();

        for category in DetectionCategory::ALL {
            let Some(detector) = self.detectors.iter().find(|d| d.category() == category) else {
                continue;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| detector.detect(ctx)))
                .unwrap_or_else(|payload| {
                    Err(DetectionFailure {
                        reason: DetectionFailureReason::DetectorPanicked,
                        message: panic_message(payload.as_ref()),
                    })
                });

            match outcome {
                Ok(label) => result.labels.push(label),
                Err(failure) => {
                    tracing::warn!(
                        resource = %ctx.target,
                        category = %category,
                        reason = failure.reason.as_str(),
                        message = %failure.message,
                        "label detection failed"
                    );
                    result.labels.push(DetectedLabel::failed(category, failure.reason));
                    result.failed_detections.push(FailedDetection {
                        category,
                        reason: failure.reason,
                        message: failure.message,
                    });
                }
            }
        }
        result
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("detector panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("detector panicked: {s}")
    } else {
        "detector panicked".to_string()
    }
}
