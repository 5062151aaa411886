//! Signal Processing Policy Engine
//!
//! Declarative, operator-authored classification rules with:
//! - A small YAML rule language compiled once at load ([`rules`])
//! - Budget-bounded evaluation: wall clock, steps and memory ([`sandbox`])
//! - Immutable bundles swapped atomically ([`PolicyStore`])
//! - Directory watching with whole-bundle rejection of bad updates
//!   ([`PolicyWatcher`])
//!
//! # Architecture
//!
//! ```text
//! policies/*.yaml ──→ PolicyWatcher ──compile──→ PolicyBundle
//!                                                    │ install
//!                                                    ↓
//! classifier ──→ PolicyEngine ──snapshot──→ PolicyStore (ArcSwap)
//!                     │
//!                     └──→ spawn_blocking(evaluate + Meter) under timeout
//! ```
//!
//! Evaluation failures of any kind are reported as [`PolicyError`] and are
//! never fatal to callers; classifiers fall back to deterministic rules.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bundle;
pub mod error;
pub mod evaluator;
pub mod rules;
pub mod sandbox;
pub mod store;
pub mod watcher;

pub use bundle::{digest_dir, PolicyBundle, PolicyDomain};
pub use error::{PolicyError, Result};
pub use evaluator::{evaluate, Decision, Evaluation, PolicyEngine, PolicyEvaluator};
pub use rules::{CompiledRuleSet, FieldPath, MatchMode};
pub use sandbox::{EvaluationBudget, Meter};
pub use store::PolicyStore;
pub use watcher::{PolicyWatcher, ReloadEvent};
