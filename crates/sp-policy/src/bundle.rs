//! Policy bundles
//!
//! A bundle is the full set of compiled rule sets, one per domain, loaded
//! from a directory with one file per domain:
//!
//! ```text
//! policies/
//! ├── environment.yaml
//! ├── priority.yaml
//! ├── business.yaml
//! ├── custom_labels.yaml
//! └── signal_mode.yaml
//! ```
//!
//! Every file is optional. A bundle is built completely before it is
//! installed; if any present file fails to compile, the whole bundle is
//! rejected.

use crate::error::{PolicyError, Result};
use crate::rules::CompiledRuleSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Classification domain served by a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDomain {
    /// Environment classification
    Environment,
    /// Priority assignment
    Priority,
    /// Business classification
    Business,
    /// Operator custom labels
    CustomLabels,
    /// Signal mode override
    SignalMode,
}

impl PolicyDomain {
    /// All domains
    pub const ALL: [PolicyDomain; 5] = [
        PolicyDomain::Environment,
        PolicyDomain::Priority,
        PolicyDomain::Business,
        PolicyDomain::CustomLabels,
        PolicyDomain::SignalMode,
    ];

    /// snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Priority => "priority",
            Self::Business => "business",
            Self::CustomLabels => "custom_labels",
            Self::SignalMode => "signal_mode",
        }
    }

    /// File name inside the policy directory
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl fmt::Display for PolicyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of compiled rule sets
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    version: u64,
    digest: String,
    loaded_at: DateTime<Utc>,
    rule_sets: HashMap<PolicyDomain, Arc<CompiledRuleSet>>,
}

impl PolicyBundle {
    /// Bundle with no rule sets; every classifier falls back
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            digest: String::new(),
            loaded_at: Utc::now(),
            rule_sets: HashMap::new(),
        }
    }

    /// Compile a bundle from in-memory sources
    ///
    /// # Errors
    /// The first compile error; nothing is returned partially.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = (PolicyDomain, &'a str)>,
    ) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut rule_sets = HashMap::new();
        let mut sources: Vec<_> = sources.into_iter().collect();
        sources.sort_by_key(|(domain, _)| *domain);

        for (domain, text) in sources {
            hash_source(&mut hasher, domain, text);
            let compiled = CompiledRuleSet::from_yaml(domain, text)?;
            rule_sets.insert(domain, Arc::new(compiled));
        }

        Ok(Self {
            version: 0,
            digest: hasher.finalize().to_hex().to_string(),
            loaded_at: Utc::now(),
            rule_sets,
        })
    }

    /// Read and compile every domain file present in `dir`
    ///
    /// # Errors
    /// IO failure reading the directory or a file, or any compile error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let sources = read_sources(dir)?;
        Self::from_sources(sources.iter().map(|(d, s)| (*d, s.as_str())))
    }

    /// Monotonic version assigned at install; 0 before install
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// BLAKE3 digest of the sources
    #[inline]
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// When the bundle was compiled
    #[inline]
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Rule set for a domain
    #[must_use]
    pub fn rule_set(&self, domain: PolicyDomain) -> Option<&Arc<CompiledRuleSet>> {
        self.rule_sets.get(&domain)
    }

    /// Domains present, in order
    #[must_use]
    pub fn domains(&self) -> Vec<PolicyDomain> {
        let mut domains: Vec<_> = self.rule_sets.keys().copied().collect();
        domains.sort();
        domains
    }

    /// Whether no domain has rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }
}

/// Read the raw domain files present in `dir`
pub(crate) fn read_sources(dir: &Path) -> Result<Vec<(PolicyDomain, String)>> {
    if !dir.is_dir() {
        return Err(PolicyError::io_error(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "policy directory not found"),
        ));
    }
    let mut sources = Vec::new();
    for domain in PolicyDomain::ALL {
        let path = dir.join(domain.file_name());
        match std::fs::read_to_string(&path) {
            Ok(text) => sources.push((domain, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PolicyError::io_error(path, e)),
        }
    }
    Ok(sources)
}

/// Digest of the domain files present in `dir`, without compiling
///
/// # Errors
/// IO failure reading the directory or a file.
pub fn digest_dir(dir: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for (domain, text) in read_sources(dir)? {
        hash_source(&mut hasher, domain, &text);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Length-prefix each field so different splits never hash alike
fn hash_source(hasher: &mut blake3::Hasher, domain: PolicyDomain, text: &str) {
    for field in [domain.as_str(), text] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
}
