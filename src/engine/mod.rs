//! Rule engine: manifest compilation, handle caching, atomic hot reload.
//!
//! The engine owns four maps, all keyed first by registry name: the last
//! manifest applied, the compiled predicates, and the issued handles, plus
//! the write lock guarding them. Its lifecycle contract:
//!
//! - **Handles are singletons.** [`RuleEngine::get_predicate_handle`] returns
//!   the same cell for a given `(registry, rule)` key for the engine's
//!   lifetime. Unknown keys get a *tombstone* predicate that fails with
//!   [`EvalError::RuleRevoked`] until a later manifest defines them.
//! - **Reloads are atomic.** [`RuleEngine::update_manifests`] compiles every
//!   rule of every manifest outside the lock, then publishes under it:
//!   either every rule in the call is applied or none is. Issued handles are
//!   re-pointed in the same critical section, so a consumer holding an old
//!   handle sees the new predicate on its next call.
//! - **Rules are retained.** A rule missing from a newer manifest keeps its
//!   last-known-good predicate; [`RuleEngine::purge_stale`] is the opt-in
//!   way to drop it and re-tombstone its handle.
//!
//! `ref` nodes compile to leaves that delegate through the target's handle,
//! so forward references and cross-update chains resolve at call time.

mod handle;

pub use handle::PredicateHandle;

use crate::config::Config;
use crate::manifest::{LogicNode, RuleSetManifest};
use crate::predicate::{
    all_of, any_of, fallible, EvalError, EvalOptions, Predicate, PredicateError,
};
use crate::registry::{Registry, RegistryError, RegistryManager};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Engine-level compilation errors. Manifest validation failures surface
/// earlier, at manifest construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

struct EngineState<C> {
    manifests: HashMap<String, RuleSetManifest>,
    compiled: HashMap<String, HashMap<String, Predicate<C>>>,
    handles: HashMap<String, HashMap<String, PredicateHandle<C>>>,
}

impl<C> Default for EngineState<C> {
    fn default() -> Self {
        EngineState {
            manifests: HashMap::new(),
            compiled: HashMap::new(),
            handles: HashMap::new(),
        }
    }
}

/// Compiles manifests against a [`RegistryManager`] and serves the results
/// through hot-swappable handles.
pub struct RuleEngine<C> {
    manager: RegistryManager<C>,
    defaults: EvalOptions,
    state: RwLock<EngineState<C>>,
}

impl<C: 'static> RuleEngine<C> {
    pub fn new(manager: RegistryManager<C>) -> Self {
        RuleEngine {
            manager,
            defaults: EvalOptions::default(),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Engine whose bare handle calls use the configured evaluation
    /// defaults.
    pub fn with_config(manager: RegistryManager<C>, config: &Config) -> Self {
        RuleEngine {
            manager,
            defaults: EvalOptions::from(&config.engine),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// The manager this engine resolves registries against.
    pub fn registry_manager(&self) -> &RegistryManager<C> {
        &self.manager
    }

    /// The handle for `(registry_name, rule_name)`; the same cell for the
    /// engine's lifetime. If the rule has no compiled predicate yet, the
    /// handle starts tombstoned.
    pub fn get_predicate_handle(&self, registry_name: &str, rule_name: &str) -> PredicateHandle<C> {
        {
            let state = self.state.read();
            if let Some(handle) = state
                .handles
                .get(registry_name)
                .and_then(|handles| handles.get(rule_name))
            {
                return handle.clone();
            }
        }

        let mut state = self.state.write();
        if let Some(handle) = state
            .handles
            .get(registry_name)
            .and_then(|handles| handles.get(rule_name))
        {
            return handle.clone();
        }
        let predicate = state
            .compiled
            .get(registry_name)
            .and_then(|rules| rules.get(rule_name))
            .cloned()
            .unwrap_or_else(|| {
                debug!(registry = %registry_name, rule = %rule_name, "handle_tombstoned");
                tombstone(registry_name, rule_name)
            });
        let handle = PredicateHandle::new(
            registry_name,
            rule_name,
            predicate,
            self.defaults.clone(),
        );
        state
            .handles
            .entry(registry_name.to_string())
            .or_default()
            .insert(rule_name.to_string(), handle.clone());
        debug!(registry = %registry_name, rule = %rule_name, "handle_created");
        handle
    }

    /// Compile and publish manifests.
    ///
    /// Compilation happens outside the engine lock; the publish step swaps
    /// every affected handle and records the manifest in one critical
    /// section. On error nothing is published.
    pub fn update_manifests(&self, manifests: &[RuleSetManifest]) -> Result<(), EngineError> {
        let mut updates = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let registry = self
                .manager
                .get(manifest.registry())
                .ok_or_else(|| RegistryError::RegistryNotFound(manifest.registry().to_string()))?;
            let mut compiled = HashMap::new();
            for (rule_id, node) in manifest.rules() {
                let predicate = self.compile_node(&registry, manifest.registry(), node)?;
                compiled.insert(rule_id.clone(), predicate);
            }
            updates.push((manifest.registry().to_string(), compiled, manifest.clone()));
        }

        let mut state = self.state.write();
        let EngineState {
            manifests: applied,
            compiled: cache,
            handles,
        } = &mut *state;
        for (registry_name, new_rules, manifest) in updates {
            let rule_count = new_rules.len();
            let registry_cache = cache.entry(registry_name.clone()).or_default();
            let registry_handles = handles.get(&registry_name);
            for (rule_name, predicate) in new_rules {
                if let Some(handle) =
                    registry_handles.and_then(|handles| handles.get(&rule_name))
                {
                    handle.swap(predicate.clone());
                }
                registry_cache.insert(rule_name, predicate);
            }
            applied.insert(registry_name.clone(), manifest);
            info!(registry = %registry_name, rules = rule_count, "manifests_updated");
        }
        Ok(())
    }

    /// Drop compiled rules absent from the registry's latest manifest and
    /// re-tombstone their handles. Returns the purged rule names.
    pub fn purge_stale(&self, registry_name: &str) -> Vec<String> {
        let mut state = self.state.write();
        let EngineState {
            manifests,
            compiled,
            handles,
        } = &mut *state;
        let Some(registry_cache) = compiled.get_mut(registry_name) else {
            return Vec::new();
        };
        let keep: Vec<&String> = manifests
            .get(registry_name)
            .map(|manifest| manifest.rules().keys().collect())
            .unwrap_or_default();
        let mut stale: Vec<String> = registry_cache
            .keys()
            .filter(|rule| !keep.contains(rule))
            .cloned()
            .collect();
        stale.sort();
        for rule_name in &stale {
            registry_cache.remove(rule_name);
            if let Some(handle) = handles
                .get(registry_name)
                .and_then(|handles| handles.get(rule_name))
            {
                handle.swap(tombstone(registry_name, rule_name));
            }
            debug!(registry = %registry_name, rule = %rule_name, "rule_purged");
        }
        stale
    }

    /// The last manifest applied for a registry.
    pub fn manifest(&self, registry_name: &str) -> Option<RuleSetManifest> {
        self.state.read().manifests.get(registry_name).cloned()
    }

    /// Names of the compiled rules for a registry, sorted.
    pub fn rule_names(&self, registry_name: &str) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .compiled
            .get(registry_name)
            .map(|rules| rules.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Lower one manifest node into a predicate. Leaves invoke producers,
    /// `ref` nodes delegate through the target's handle (the sole mechanism
    /// for forward references), connectives fold with `all_of`/`any_of`.
    /// Explicit work stack; never recurses.
    fn compile_node(
        &self,
        registry: &Registry<C>,
        registry_name: &str,
        root: &LogicNode,
    ) -> Result<Predicate<C>, EngineError> {
        enum Step<'a> {
            Enter(&'a LogicNode),
            CombineAll(usize),
            CombineAny(usize),
            Negate,
        }

        let mut stack = vec![Step::Enter(root)];
        let mut results: Vec<Predicate<C>> = Vec::new();

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => match node {
                    LogicNode::Leaf { rule } => {
                        let def = registry.get(&rule.rule_def_name).ok_or_else(|| {
                            RegistryError::RuleDefNotFound(rule.rule_def_name.clone())
                        })?;
                        results.push(def.produce(&rule.params)?);
                    }
                    LogicNode::And { rules } => {
                        stack.push(Step::CombineAll(rules.len()));
                        for child in rules.iter().rev() {
                            stack.push(Step::Enter(child));
                        }
                    }
                    LogicNode::Or { rules } => {
                        stack.push(Step::CombineAny(rules.len()));
                        for child in rules.iter().rev() {
                            stack.push(Step::Enter(child));
                        }
                    }
                    LogicNode::Not { rule } => {
                        stack.push(Step::Negate);
                        stack.push(Step::Enter(rule));
                    }
                    LogicNode::Ref { ref_id } => {
                        let handle = self.get_predicate_handle(registry_name, ref_id);
                        let leaf = fallible(move |ctx: &C| handle.eval(ctx), ref_id.clone())
                            .with_desc(format!("ref -> {registry_name}::{ref_id}"));
                        results.push(leaf);
                    }
                },
                Step::CombineAll(count) => {
                    let children = results.split_off(results.len() - count);
                    results.push(all_of(children)?);
                }
                Step::CombineAny(count) => {
                    let children = results.split_off(results.len() - count);
                    results.push(any_of(children)?);
                }
                Step::Negate => {
                    let child = results.pop().expect("negate marker follows its operand");
                    results.push(!child);
                }
            }
        }

        Ok(results.pop().expect("lowering leaves exactly one predicate"))
    }
}

/// Placeholder predicate for a rule that is revoked or not yet defined.
fn tombstone<C: 'static>(registry_name: &str, rule_name: &str) -> Predicate<C> {
    let registry = registry_name.to_string();
    let rule = rule_name.to_string();
    fallible(
        move |_ctx: &C| {
            Err(EvalError::RuleRevoked {
                registry: registry.clone(),
                rule: rule.clone(),
            })
        },
        rule_name,
    )
    .with_desc(format!(
        "revoked or missing rule '{rule_name}' in registry '{registry_name}'"
    ))
}
