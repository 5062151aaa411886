//! Signal Processing Enrichment
//!
//! Cluster context for a signal's target resource:
//! - [`ClusterApi`]: the read-only cluster seam, with an in-memory
//!   implementation and (feature `kube`) a live one
//! - [`K8sEnricher`]: deadline-bounded, TTL-cached context assembly that
//!   degrades instead of failing
//! - [`OwnerChainBuilder`]: bounded, cycle-safe owner reference walk
//! - [`LabelDetector`]: eight isolated detection rules
//!
//! Only a target that definitively does not exist is an error; every other
//! failure shows up as a degraded context and is carried as provenance.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cluster;
pub mod detector;
pub mod enricher;
pub mod error;
#[cfg(feature = "kube")]
pub mod kube_client;
pub mod memory;
pub mod owner_chain;

pub use cluster::{ClusterApi, ObjectMeta, OwnerReference};
pub use detector::{DetectionFailure, Detector, LabelDetector};
pub use enricher::{EnricherConfig, K8sEnricher};
pub use error::{ClusterError, EnrichError};
#[cfg(feature = "kube")]
pub use kube_client::KubeCluster;
pub use memory::{ClusterFixture, ClusterOperation, InMemoryCluster};
pub use owner_chain::{OwnerChainBuilder, OwnerResolution};
