//! Stable indirection to a compiled predicate.
//!
//! A handle is the long-lived face of a rule: the engine issues exactly one
//! per `(registry, rule)` key and re-points it on every hot reload. Readers
//! never lock; the inner predicate lives behind an [`ArcSwap`] and each
//! invocation loads it exactly once, so a swap racing a call can never tear
//! a single evaluation between old and new rule versions.

use crate::predicate::{EvalError, EvalOptions, NodeKind, Predicate};
use crate::trace::Trace;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

struct HandleInner<C> {
    registry: String,
    rule: String,
    current: ArcSwap<Predicate<C>>,
    defaults: EvalOptions,
}

/// Atomic indirection cell over a predicate. Clones share the cell: a swap
/// through the engine is visible to every clone on its next invocation.
pub struct PredicateHandle<C> {
    inner: Arc<HandleInner<C>>,
}

impl<C> Clone for PredicateHandle<C> {
    fn clone(&self) -> Self {
        PredicateHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: 'static> PredicateHandle<C> {
    pub(crate) fn new(
        registry: impl Into<String>,
        rule: impl Into<String>,
        predicate: Predicate<C>,
        defaults: EvalOptions,
    ) -> Self {
        PredicateHandle {
            inner: Arc::new(HandleInner {
                registry: registry.into(),
                rule: rule.into(),
                current: ArcSwap::from_pointee(predicate),
                defaults,
            }),
        }
    }

    /// Re-point the handle. A single pointer store; in-flight evaluations
    /// keep the predicate they already loaded.
    pub(crate) fn swap(&self, predicate: Predicate<C>) {
        self.inner.current.store(Arc::new(predicate));
    }

    fn load(&self) -> Arc<Predicate<C>> {
        self.inner.current.load_full()
    }

    /// Registry this handle was issued for.
    pub fn registry(&self) -> &str {
        &self.inner.registry
    }

    /// Rule this handle was issued for.
    pub fn rule(&self) -> &str {
        &self.inner.rule
    }

    /// Kind tag of the current inner predicate.
    pub fn node_type(&self) -> NodeKind {
        self.load().node_type()
    }

    /// Name of the current inner predicate, if any.
    pub fn name(&self) -> Option<String> {
        self.load().name().map(str::to_string)
    }

    /// Description of the current inner predicate, if any.
    pub fn desc(&self) -> Option<String> {
        self.load().desc().map(str::to_string)
    }

    /// Evaluate with the engine's default options.
    pub fn eval(&self, ctx: &C) -> Result<bool, EvalError> {
        self.load().eval_with(ctx, &self.inner.defaults)
    }

    /// Evaluate with explicit options.
    pub fn eval_with(&self, ctx: &C, opts: &EvalOptions) -> Result<bool, EvalError> {
        self.load().eval_with(ctx, opts)
    }

    /// Trace-evaluate with the engine's default options.
    pub fn trace(&self, ctx: &C) -> Result<Trace, EvalError> {
        self.load().trace_with(ctx, &self.inner.defaults)
    }

    /// Trace-evaluate with explicit options.
    pub fn trace_with(&self, ctx: &C, opts: &EvalOptions) -> Result<Trace, EvalError> {
        self.load().trace_with(ctx, opts)
    }

    /// Whether two handles are the same engine-issued cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C: 'static> fmt::Debug for PredicateHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateHandle")
            .field("registry", &self.inner.registry)
            .field("rule", &self.inner.rule)
            .field("node_type", &self.node_type().as_str())
            .finish()
    }
}
