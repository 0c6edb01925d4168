//! # RuleKit Rule Engine
//!
//! A declarative rule engine: composable boolean predicate trees over an
//! opaque context type, compiled per evaluation mode into specialised
//! evaluators and served through long-lived, atomically hot-swappable
//! handles.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Rule definitions (producers)           Manifest JSON
//!     ↓                                      ↓
//! [Registry / RegistryManager]         [RuleSetManifest]
//!     ↓                                      ↓ (validation + cycle check)
//!     └──────────────┬───────────────────────┘
//!                    ↓
//!             [RuleEngine.update_manifests]
//!                    ↓
//!             Predicate IR (leaf / and / or / not)
//!                    ↓ (per evaluation mode, cached)
//!             [Compiler] → bool evaluator | trace evaluator
//!                    ↓
//!             [PredicateHandle]  ← atomic hot swap on reload
//!                    ↓
//!             handle.eval(ctx) / handle.trace(ctx)
//! ```
//!
//! ## Usage
//!
//! ### Programmatic composition
//! ```rust,ignore
//! use rulekit::predicate;
//!
//! struct User { age: i64, active: bool }
//!
//! let adult = predicate(|u: &User| u.age >= 18, "is_adult");
//! let active = predicate(|u: &User| u.active, "is_active");
//! let rule = adult & active;
//!
//! assert!(rule.eval(&User { age: 25, active: true })?);
//! ```
//!
//! ### Declarative manifests with hot reload
//! ```rust,ignore
//! use rulekit::{Registry, RegistryManager, RuleEngine, RuleSetManifest};
//!
//! let manager = RegistryManager::new();
//! let registry = Registry::new("user_registry", &manager)?;
//! // ... register rule definitions ...
//!
//! let engine = RuleEngine::new(manager);
//! let manifest = RuleSetManifest::from_json(r#"{
//!     "registry": "user_registry",
//!     "rules": {
//!         "gate": {"node_type": "leaf", "rule": {"rule_def_name": "is_active"}}
//!     }
//! }"#)?;
//! engine.update_manifests(&[manifest])?;
//!
//! let handle = engine.get_predicate_handle("user_registry", "gate");
//! // A later update_manifests re-points this same handle atomically.
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `predicate` | Immutable IR, operators, mode-keyed evaluator cache |
//! | `trace` | Trace values, algebraic combinators, render styles |
//! | `registry` | Rule definitions, producers, registries, manager |
//! | `manifest` | JSON manifest model, validation, cycle detection |
//! | `schema` | JSON Schema generation, schema-level validation |
//! | `engine` | Manifest compilation, handles, atomic hot reload |
//! | `config` | Figment-backed configuration, logging init |

pub mod config;
pub mod engine;
pub mod manifest;
pub mod predicate;
pub mod registry;
pub mod schema;
pub mod trace;

pub use crate::config::{Config, EngineConfig, LoggingConfig};
pub use crate::engine::{EngineError, PredicateHandle, RuleEngine};
pub use crate::manifest::{LogicNode, ManifestError, RuleConfig, RuleSetManifest};
pub use crate::predicate::{
    all_of, any_of, fallible, predicate, EvalError, EvalOptions, FailKind, NodeKind, Predicate,
    PredicateError,
};
pub use crate::registry::{
    ParamSpec, ParamType, Params, Registry, RegistryError, RegistryManager, RuleDef,
};
pub use crate::schema::{SchemaError, SchemaGenerator};
pub use crate::trace::{DefaultTraceStyle, Trace, TraceOp, TraceStyle};
