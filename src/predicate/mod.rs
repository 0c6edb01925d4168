//! Predicate trees and their evaluation surface.
//!
//! A [`Predicate`] is an immutable algebraic tree of boolean expressions over
//! an opaque context type `C`: leaves wrap host callables, interior nodes are
//! `and` / `or` / `not`. Trees are built with [`predicate`] / [`fallible`] and
//! composed with `&`, `|` and `!` (or [`all_of`] / [`any_of`] for long
//! chains, which skip the intermediate node allocations).
//!
//! Nodes share structure freely: cloning a predicate clones an `Arc`.
//!
//! ## Evaluation
//!
//! Each call is parameterised by [`EvalOptions`] (trace dialect is chosen by
//! the entry point: [`Predicate::eval`] vs [`Predicate::trace`]). The first
//! call for a mode lowers the tree into a specialised evaluator; the result
//! is cached on the node for its lifetime, so steady-state evaluation is a
//! single map lookup plus the compiled closure chain.
//!
//! ```rust,ignore
//! use rulekit::{predicate, EvalOptions};
//!
//! struct User { age: i64, active: bool }
//!
//! let adult = predicate(|u: &User| u.age >= 18, "is_adult");
//! let active = predicate(|u: &User| u.active, "is_active");
//! let rule = adult & active;
//!
//! assert!(rule.eval(&User { age: 25, active: true })?);
//! let trace = rule.trace(&User { age: 16, active: true })?;
//! assert!(!trace.success);
//! ```

mod compiler;
pub mod error;

pub use error::{EvalError, FailKind, PredicateError};

use crate::trace::Trace;
use compiler::Compiler;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

/// A leaf callable: borrows the context, returns an outcome or a failure.
pub type LeafFn<C> = Arc<dyn Fn(&C) -> Result<bool, EvalError> + Send + Sync>;

/// Compiled plain-bool evaluator.
pub(crate) type BoolEval<C> = Arc<dyn Fn(&C) -> Result<bool, EvalError> + Send + Sync>;

/// Compiled trace-producing evaluator.
pub(crate) type TraceEval<C> = Arc<dyn Fn(&C) -> Result<Trace, EvalError> + Send + Sync>;

/// Kind tag of a predicate tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Leaf,
    And,
    Or,
    Not,
}

impl NodeKind {
    /// Wire/display tag of the node kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Leaf => "leaf",
            NodeKind::And => "and",
            NodeKind::Or => "or",
            NodeKind::Not => "not",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum Node<C> {
    Leaf(LeafFn<C>),
    And(Vec<Predicate<C>>),
    Or(Vec<Predicate<C>>),
    Not(Predicate<C>),
}

impl<C> Clone for Node<C> {
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(f) => Node::Leaf(Arc::clone(f)),
            Node::And(children) => Node::And(children.clone()),
            Node::Or(children) => Node::Or(children.clone()),
            Node::Not(child) => Node::Not(child.clone()),
        }
    }
}

/// Per-call evaluation flags.
///
/// `short_circuit` stops `and` at the first false operand and `or` at the
/// first true one. `fail_skip` names the failure kinds that are caught at
/// leaves and replaced by the leaf's fallback. `root_fallback` seeds the
/// fallback propagated from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOptions {
    pub short_circuit: bool,
    pub fail_skip: BTreeSet<FailKind>,
    pub root_fallback: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            short_circuit: true,
            fail_skip: BTreeSet::new(),
            root_fallback: false,
        }
    }
}

impl EvalOptions {
    pub fn new() -> Self {
        EvalOptions::default()
    }

    pub fn with_short_circuit(mut self, short_circuit: bool) -> Self {
        self.short_circuit = short_circuit;
        self
    }

    pub fn with_fail_skip(mut self, kinds: impl IntoIterator<Item = FailKind>) -> Self {
        self.fail_skip.extend(kinds);
        self
    }

    pub fn with_root_fallback(mut self, root_fallback: bool) -> Self {
        self.root_fallback = root_fallback;
        self
    }

    fn mode_key(&self) -> ModeKey {
        ModeKey {
            short_circuit: self.short_circuit,
            fail_skip: self.fail_skip.iter().copied().collect(),
            root_fallback: self.root_fallback,
        }
    }
}

/// Cache key for one evaluation mode. `fail_skip` is sorted (it comes from a
/// `BTreeSet`), so equal sets always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModeKey {
    short_circuit: bool,
    fail_skip: Vec<FailKind>,
    root_fallback: bool,
}

struct EvalCache<C> {
    bools: HashMap<ModeKey, BoolEval<C>>,
    traces: HashMap<ModeKey, TraceEval<C>>,
}

impl<C> Default for EvalCache<C> {
    fn default() -> Self {
        EvalCache {
            bools: HashMap::new(),
            traces: HashMap::new(),
        }
    }
}

pub(crate) struct Inner<C> {
    pub(crate) node: Node<C>,
    pub(crate) name: Option<String>,
    pub(crate) desc: Option<String>,
    cache: RwLock<EvalCache<C>>,
}

/// An immutable boolean expression tree over contexts of type `C`.
pub struct Predicate<C> {
    pub(crate) inner: Arc<Inner<C>>,
}

impl<C> Clone for Predicate<C> {
    fn clone(&self) -> Self {
        Predicate {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: 'static> Predicate<C> {
    fn from_node(node: Node<C>, name: Option<String>, desc: Option<String>) -> Self {
        Predicate {
            inner: Arc::new(Inner {
                node,
                name,
                desc,
                cache: RwLock::new(EvalCache::default()),
            }),
        }
    }

    /// Raw n-ary conjunction. The IR permits a single child; the manifest
    /// layer is where arity >= 2 is enforced.
    ///
    /// # Panics
    /// Panics if `children` is empty.
    pub fn and_of(children: Vec<Predicate<C>>) -> Self {
        assert!(!children.is_empty(), "and_of requires at least one child");
        Predicate::from_node(Node::And(children), None, None)
    }

    /// Raw n-ary disjunction. See [`Predicate::and_of`] for arity notes.
    ///
    /// # Panics
    /// Panics if `children` is empty.
    pub fn or_of(children: Vec<Predicate<C>>) -> Self {
        assert!(!children.is_empty(), "or_of requires at least one child");
        Predicate::from_node(Node::Or(children), None, None)
    }

    /// Negation node.
    pub fn not_of(child: Predicate<C>) -> Self {
        Predicate::from_node(Node::Not(child), None, None)
    }

    /// Kind tag of the root node.
    pub fn node_type(&self) -> NodeKind {
        match &self.inner.node {
            Node::Leaf(_) => NodeKind::Leaf,
            Node::And(_) => NodeKind::And,
            Node::Or(_) => NodeKind::Or,
            Node::Not(_) => NodeKind::Not,
        }
    }

    /// Name of this node, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Description of this node, if any.
    pub fn desc(&self) -> Option<&str> {
        self.inner.desc.as_deref()
    }

    /// Rebuild this node with a name. The evaluator cache starts fresh;
    /// metadata does not participate in compilation identity.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Predicate::from_node(
            self.inner.node.clone(),
            Some(name.into()),
            self.inner.desc.clone(),
        )
    }

    /// Rebuild this node with a description.
    pub fn with_desc(self, desc: impl Into<String>) -> Self {
        Predicate::from_node(
            self.inner.node.clone(),
            self.inner.name.clone(),
            Some(desc.into()),
        )
    }

    fn and_children(&self) -> Option<&[Predicate<C>]> {
        match &self.inner.node {
            Node::And(children) => Some(children),
            _ => None,
        }
    }

    fn or_children(&self) -> Option<&[Predicate<C>]> {
        match &self.inner.node {
            Node::Or(children) => Some(children),
            _ => None,
        }
    }

    /// Evaluate with default options, returning a plain boolean.
    pub fn eval(&self, ctx: &C) -> Result<bool, EvalError> {
        self.eval_with(ctx, &EvalOptions::default())
    }

    /// Evaluate with explicit options, returning a plain boolean.
    pub fn eval_with(&self, ctx: &C, opts: &EvalOptions) -> Result<bool, EvalError> {
        let key = opts.mode_key();
        let compiled = {
            let cache = self.inner.cache.read();
            cache.bools.get(&key).cloned()
        };
        let compiled = match compiled {
            Some(compiled) => compiled,
            None => {
                let mut cache = self.inner.cache.write();
                match cache.bools.get(&key) {
                    Some(compiled) => compiled.clone(),
                    None => {
                        let compiled = Compiler::new(opts).compile_bool(self);
                        cache.bools.insert(key, compiled.clone());
                        compiled
                    }
                }
            }
        };
        compiled(ctx)
    }

    /// Evaluate with default options, returning a [`Trace`].
    pub fn trace(&self, ctx: &C) -> Result<Trace, EvalError> {
        self.trace_with(ctx, &EvalOptions::default())
    }

    /// Evaluate with explicit options, returning a [`Trace`].
    pub fn trace_with(&self, ctx: &C, opts: &EvalOptions) -> Result<Trace, EvalError> {
        let key = opts.mode_key();
        let compiled = {
            let cache = self.inner.cache.read();
            cache.traces.get(&key).cloned()
        };
        let compiled = match compiled {
            Some(compiled) => compiled,
            None => {
                let mut cache = self.inner.cache.write();
                match cache.traces.get(&key) {
                    Some(compiled) => compiled.clone(),
                    None => {
                        let compiled = Compiler::new(opts).compile_trace(self);
                        cache.traces.insert(key, compiled.clone());
                        compiled
                    }
                }
            }
        };
        compiled(ctx)
    }
}

fn same_leaf_fn<C>(a: &LeafFn<C>, b: &LeafFn<C>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

impl<C> PartialEq for Predicate<C> {
    /// Value equality: leaves by callable identity plus metadata, interior
    /// nodes pairwise over their children.
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        if self.inner.name != other.inner.name || self.inner.desc != other.inner.desc {
            return false;
        }
        match (&self.inner.node, &other.inner.node) {
            (Node::Leaf(a), Node::Leaf(b)) => same_leaf_fn(a, b),
            (Node::And(a), Node::And(b)) | (Node::Or(a), Node::Or(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Node::Not(a), Node::Not(b)) => a == b,
            _ => false,
        }
    }
}

impl<C> Eq for Predicate<C> {}

impl<C: 'static> fmt::Debug for Predicate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("node_type", &self.node_type().as_str())
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<C: 'static> BitAnd for Predicate<C> {
    type Output = Predicate<C>;

    /// Conjunction. Two `and` operands flatten into one n-ary node; mixed
    /// kinds nest.
    fn bitand(self, rhs: Self) -> Predicate<C> {
        if let (Some(left), Some(right)) = (self.and_children(), rhs.and_children()) {
            let children = left.iter().chain(right.iter()).cloned().collect();
            return Predicate::and_of(children);
        }
        Predicate::and_of(vec![self, rhs])
    }
}

impl<C: 'static> BitOr for Predicate<C> {
    type Output = Predicate<C>;

    /// Disjunction. Two `or` operands flatten into one n-ary node; mixed
    /// kinds nest.
    fn bitor(self, rhs: Self) -> Predicate<C> {
        if let (Some(left), Some(right)) = (self.or_children(), rhs.or_children()) {
            let children = left.iter().chain(right.iter()).cloned().collect();
            return Predicate::or_of(children);
        }
        Predicate::or_of(vec![self, rhs])
    }
}

impl<C: 'static> Not for Predicate<C> {
    type Output = Predicate<C>;

    fn not(self) -> Predicate<C> {
        Predicate::not_of(self)
    }
}

/// Wrap an infallible callable into a named leaf predicate.
pub fn predicate<C: 'static, F>(f: F, name: impl Into<String>) -> Predicate<C>
where
    F: Fn(&C) -> bool + Send + Sync + 'static,
{
    let f: LeafFn<C> = Arc::new(move |ctx: &C| Ok(f(ctx)));
    Predicate::from_node(Node::Leaf(f), Some(name.into()), None)
}

/// Wrap a fallible callable into a named leaf predicate. Failures propagate
/// out of evaluation unless their kind is in the call's fail-skip set.
pub fn fallible<C: 'static, F>(f: F, name: impl Into<String>) -> Predicate<C>
where
    F: Fn(&C) -> Result<bool, EvalError> + Send + Sync + 'static,
{
    let f: LeafFn<C> = Arc::new(f);
    Predicate::from_node(Node::Leaf(f), Some(name.into()), None)
}

/// Combine predicates with `and`, without the per-pair node allocations of
/// chained `&`. A singleton input is returned unchanged.
pub fn all_of<C: 'static>(predicates: Vec<Predicate<C>>) -> Result<Predicate<C>, PredicateError> {
    let mut predicates = predicates;
    match predicates.len() {
        0 => Err(PredicateError::InvalidArgument(
            "expected at least one predicate".to_string(),
        )),
        1 => Ok(predicates.remove(0)),
        _ => Ok(Predicate::and_of(predicates)),
    }
}

/// Combine predicates with `or`. See [`all_of`].
pub fn any_of<C: 'static>(predicates: Vec<Predicate<C>>) -> Result<Predicate<C>, PredicateError> {
    let mut predicates = predicates;
    match predicates.len() {
        0 => Err(PredicateError::InvalidArgument(
            "expected at least one predicate".to_string(),
        )),
        1 => Ok(predicates.remove(0)),
        _ => Ok(Predicate::or_of(predicates)),
    }
}
