//! Request manifests
//!
//! Signal processing objects submitted from files, in the shape the
//! gateway would create them:
//!
//! ```yaml
//! metadata:
//!   name: sp-crashloop-1
//!   namespace: kubernaut-system
//! spec:
//!   signalName: KubePodCrashLooping
//!   fingerprint: 3f1c9a
//!   severity: critical
//!   target: { namespace: prod-payment, kind: Pod, name: api-7d9f-x2 }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sp_types::{ObjectKey, SignalProcessing, SignalRequest};
use std::path::Path;

/// Object metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Object name
    pub name: String,
    /// Object namespace; defaults to the target's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Unique id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A signal processing request read from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestManifest {
    /// Metadata
    pub metadata: ManifestMetadata,
    /// Request
    pub spec: SignalRequest,
}

impl RequestManifest {
    /// Parse YAML (JSON is accepted too)
    ///
    /// # Errors
    /// Malformed document; `origin` names it in the error.
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read one manifest
    ///
    /// # Errors
    /// Unreadable or malformed file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Read every `.yaml`, `.yml` and `.json` file of a directory, in name order
    ///
    /// # Errors
    /// Unreadable directory or the first malformed file.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_manifest = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml" | "json"));
            if is_manifest && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|p| Self::load(p)).collect()
    }

    /// Key the object is stored under
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        let namespace = self
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| Some(self.spec.target.namespace.clone()).filter(|ns| !ns.is_empty()))
            .unwrap_or_else(|| "default".to_string());
        ObjectKey::new(namespace, self.metadata.name.clone())
    }

    /// Fresh object at `Pending`
    #[must_use]
    pub fn into_object(self) -> SignalProcessing {
        let key = self.key();
        let uid = self
            .metadata
            .uid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        SignalProcessing::new(key, uid, self.spec)
    }
}
