//! Kubernetes context enricher
//!
//! Assembles an [`EnrichmentContext`] for a target under a single deadline:
//!
//! ```text
//! cache? ─hit─→ return
//!   │miss
//!   ↓
//! namespace ─→ object ─→ ┬─ owner chain + workload
//!                        ├─ disruption budgets
//!                        ├─ autoscalers          (concurrent)
//!                        ├─ network policies
//!                        └─ resource quotas
//! ```
//!
//! Every call is bounded by the same deadline, so a slow cluster yields a
//! degraded context shortly after the timeout instead of one timeout per
//! call. Failed or timed-out lookups leave their field `None` and add a
//! degradation reason. Only a namespace or object that definitively does
//! not exist is an error. Complete contexts are cached by target for the
//! configured TTL; degraded ones never are.

use crate::cluster::ClusterApi;
use crate::error::{ClusterError, EnrichError};
use crate::owner_chain::{OwnerChainBuilder, OwnerResolution};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sp_types::{EnrichmentContext, OwnerChain, ResourceRef};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Enricher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    /// Deadline for assembling one context
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Cache complete contexts
    pub cache_enabled: bool,
    /// Cache entry lifetime
    #[serde(with = "millis")]
    pub cache_ttl: Duration,
    /// Maximum cached targets
    pub cache_capacity: u64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
        }
    }
}

impl EnricherConfig {
    /// Set the deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable caching
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the cache TTL
    #[inline]
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Cluster context enricher with an optional TTL cache
pub struct K8sEnricher {
    api: Arc<dyn ClusterApi>,
    config: EnricherConfig,
    owners: OwnerChainBuilder,
    cache: Option<Cache<ResourceRef, Arc<EnrichmentContext>>>,
}

impl std::fmt::Debug for K8sEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sEnricher")
            .field("config", &self.config)
            .field("cached", &self.cache.as_ref().map(Cache::entry_count))
            .finish_non_exhaustive()
    }
}

impl K8sEnricher {
    /// Create an enricher
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: EnricherConfig) -> Self {
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl)
                .build()
        });
        Self {
            api,
            config,
            owners: OwnerChainBuilder::new(),
            cache,
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    /// Enrich a target
    ///
    /// # Errors
    /// The target reference is incomplete, or its namespace or object does
    /// not exist.
    pub async fn enrich(&self, target: &ResourceRef) -> Result<Arc<EnrichmentContext>, EnrichError> {
        if !target.is_complete() {
            return Err(EnrichError::InvalidTarget(target.clone()));
        }
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(target).await {
                metrics::counter!("signalprocessing_enrichment_cache_hits_total").increment(1);
                tracing::debug!(resource = %target, "enrichment cache hit");
                return Ok(hit);
            }
        }

        let deadline = Instant::now() + self.config.timeout;
        let ctx = Arc::new(self.assemble(target, deadline).await?);

        if ctx.degraded {
            metrics::counter!("signalprocessing_enrichment_degraded_total").increment(1);
            tracing::warn!(
                resource = %target,
                reasons = ?ctx.degraded_reasons,
                "enrichment degraded"
            );
        } else if let Some(cache) = &self.cache {
            cache.insert(target.clone(), Arc::clone(&ctx)).await;
        }
        Ok(ctx)
    }

    async fn assemble(&self, target: &ResourceRef, deadline: Instant) -> Result<EnrichmentContext, EnrichError> {
        let mut ctx = EnrichmentContext::new(target.clone());
        let api = self.api.as_ref();

        if !target.is_cluster_scoped() {
            match bounded(deadline, api.get_namespace(&target.namespace)).await {
                Ok(meta) => ctx.namespace = Some(meta.to_context()),
                Err(ClusterError::NotFound(_)) => {
                    return Err(EnrichError::NamespaceNotFound(target.namespace.clone()))
                }
                Err(e) => ctx.mark_degraded(format!("namespace: {e}")),
            }
        }

        let object = match bounded(deadline, api.get_object(target)).await {
            Ok(meta) => Some(meta),
            Err(ClusterError::NotFound(_)) => return Err(EnrichError::TargetNotFound(target.clone())),
            Err(e) => {
                ctx.mark_degraded(format!("object: {e}"));
                None
            }
        };
        ctx.object = object.as_ref().map(crate::cluster::ObjectMeta::to_context);

        let ns = target.namespace.as_str();
        let owners = async {
            match &object {
                Some(meta) => Some(self.owners.build(api, meta, deadline).await),
                None => None,
            }
        };
        let (owners, pdbs, hpas, netpols, quotas) = tokio::join!(
            owners,
            bounded(deadline, api.list_disruption_budgets(ns)),
            bounded(deadline, api.list_autoscalers(ns)),
            bounded(deadline, api.list_network_policies(ns)),
            bounded(deadline, api.list_resource_quotas(ns)),
        );

        match owners {
            Some(OwnerResolution { chain, root }) => {
                if let Some(reason) = &chain.incomplete_reason {
                    ctx.mark_degraded(format!("owner chain: {reason}"));
                }
                ctx.workload = root.map(|m| m.to_context());
                ctx.owner_chain = chain;
            }
            None => {
                ctx.owner_chain = OwnerChain {
                    incomplete_reason: Some("target object unavailable".into()),
                    ..OwnerChain::empty()
                };
            }
        }
        ctx.disruption_budgets = keep(&mut ctx, "disruption budgets", pdbs);
        ctx.autoscalers = keep(&mut ctx, "autoscalers", hpas);
        ctx.network_policies = keep(&mut ctx, "network policies", netpols);
        ctx.resource_quotas = keep(&mut ctx, "resource quotas", quotas);

        Ok(ctx)
    }
}

/// Run a cluster call against the shared deadline
async fn bounded<T>(
    deadline: Instant,
    call: impl Future<Output = Result<T, ClusterError>>,
) -> Result<T, ClusterError> {
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(ClusterError::Timeout))
}

fn keep<T>(ctx: &mut EnrichmentContext, what: &str, result: Result<T, ClusterError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            ctx.mark_degraded(format!("{what}: {e}"));
            None
        }
    }
}

mod millis {
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
    use crate::cluster::ObjectMeta;
    use crate::memory::{ClusterOperation, InMemoryCluster};

    fn cluster() -> Arc<InMemoryCluster> {
        let cluster = InMemoryCluster::new();
        cluster.insert_namespace(
            ObjectMeta::new("", "Namespace", "prod-payment").with_label("team", "payments"),
        );
        cluster.insert_object(
            ObjectMeta::new("prod-payment", "Pod", "api-1").with_owner("ReplicaSet", "api-rs", true),
        );
        cluster.insert_object(
            ObjectMeta::new("prod-payment", "ReplicaSet", "api-rs").with_owner("Deployment", "api", true),
        );
        cluster.insert_object(ObjectMeta::new("prod-payment", "Deployment", "api").with_label("tier", "web"));
        Arc::new(cluster)
    }

    fn pod() -> ResourceRef {
        ResourceRef::new("prod-payment", "Pod", "api-1")
    }

    #[tokio::test]
    async fn complete_context() {
        let enricher = K8sEnricher::new(cluster(), EnricherConfig::default());
        let ctx = enricher.enrich(&pod()).await.unwrap();
        assert!(!ctx.degraded, "{:?}", ctx.degraded_reasons);
        assert_eq!(ctx.namespace_label("team"), Some("payments"));
        assert_eq!(ctx.owner_chain.len(), 2);
        assert_eq!(ctx.workload.as_ref().unwrap().kind, "Deployment");
        assert_eq!(ctx.workload_label("tier"), Some("web"));
        assert_eq!(ctx.network_policies.as_deref(), Some(&[][..]));
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let cluster = cluster();
        let enricher = K8sEnricher::new(cluster.clone(), EnricherConfig::default());
        enricher.enrich(&pod()).await.unwrap();
        let calls = cluster.calls();
        enricher.enrich(&pod()).await.unwrap();
        assert_eq!(cluster.calls(), calls);
    }

    #[tokio::test]
    async fn cached_context_expires_with_ttl() {
        let cluster = cluster();
        let config = EnricherConfig::default().with_cache_ttl(Duration::from_millis(50));
        let enricher = K8sEnricher::new(cluster.clone(), config);
        enricher.enrich(&pod()).await.unwrap();
        let calls = cluster.calls();

        tokio::time::sleep(Duration::from_millis(150)).await;
        enricher.enrich(&pod()).await.unwrap();
        assert!(cluster.calls() > calls);
    }

    #[tokio::test]
    async fn degraded_contexts_are_not_cached() {
        let cluster = cluster();
        cluster.fail_operation(ClusterOperation::ListAutoscalers);
        let enricher = K8sEnricher::new(cluster.clone(), EnricherConfig::default());
        let first = enricher.enrich(&pod()).await.unwrap();
        assert!(first.degraded);
        assert!(first.autoscalers.is_none());
        let calls = cluster.calls();
        enricher.enrich(&pod()).await.unwrap();
        assert!(cluster.calls() > calls);
    }

    #[tokio::test]
    async fn missing_target_is_an_error() {
        let enricher = K8sEnricher::new(cluster(), EnricherConfig::default());
        let err = enricher
            .enrich(&ResourceRef::new("prod-payment", "Pod", "ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "TargetNotFound");

        let err = enricher
            .enrich(&ResourceRef::new("nowhere", "Pod", "api-1"))
            .await
            .unwrap_err();
        assert_eq!(err, EnrichError::NamespaceNotFound("nowhere".into()));
    }

    #[tokio::test]
    async fn incomplete_target_is_rejected() {
        let enricher = K8sEnricher::new(cluster(), EnricherConfig::default());
        let err = enricher.enrich(&ResourceRef::new("ns", "", "x")).await.unwrap_err();
        assert!(matches!(err, EnrichError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn unreachable_cluster_degrades() {
        let cluster = cluster();
        cluster.set_unavailable(true);
        let enricher = K8sEnricher::new(cluster, EnricherConfig::default());
        let ctx = enricher.enrich(&pod()).await.unwrap();
        assert!(ctx.degraded);
        assert!(ctx.namespace.is_none());
        assert!(ctx.object.is_none());
        assert!(ctx.owner_chain.is_empty());
        assert!(ctx.owner_chain.incomplete_reason.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cluster_degrades_at_deadline() {
        let cluster = cluster();
        cluster.set_latency(Duration::from_secs(10));
        let enricher = K8sEnricher::new(
            cluster,
            EnricherConfig::default().with_timeout(Duration::from_millis(200)),
        );
        let started = Instant::now();
        let ctx = enricher.enrich(&pod()).await.unwrap();
        let elapsed = started.elapsed();
        assert!(ctx.degraded);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn cluster_scoped_target_skips_namespace() {
        let cluster = InMemoryCluster::new();
        cluster.insert_object(ObjectMeta::new("", "Node", "worker-1"));
        let enricher = K8sEnricher::new(Arc::new(cluster), EnricherConfig::default());
        let ctx = enricher
            .enrich(&ResourceRef::cluster_scoped("Node", "worker-1"))
            .await
            .unwrap();
        assert!(ctx.namespace.is_none());
        assert!(!ctx.degraded);
    }
}
