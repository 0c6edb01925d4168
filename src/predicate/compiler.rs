//! Lowers a predicate tree into a specialised evaluator for one mode.
//!
//! One compiler instance serves one `(short_circuit, fail_skip,
//! root_fallback)` mode and emits one of two dialects: plain-bool or
//! trace-producing. Lowering walks the tree with an explicit work stack, so
//! chains hundreds or thousands of nodes deep never touch the host call
//! stack. Along the way it
//!
//! - collects contiguous same-kind `and`/`or` chains into a single n-ary
//!   operand list, preserving the original left-to-right evaluation order;
//! - propagates each leaf's *fallback*: the value a skipped leaf must yield
//!   so the enclosing connective is undisturbed (root seeds it, `not` flips
//!   it, `and` hands its children `true`, `or` hands them `false`);
//! - memoises compiled leaves keyed on `(callable identity, fallback)`, so a
//!   leaf appearing under both polarities gets exactly two wrappers.

use super::{BoolEval, EvalOptions, FailKind, LeafFn, Node, Predicate, TraceEval};
use crate::trace::{Trace, TraceOp};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
}

/// Work-stack entry. `Combine`/`Negate` markers fire after their operands
/// have been lowered onto the results stack.
enum Step<C> {
    Enter { node: Predicate<C>, fallback: bool },
    Combine { op: BinOp, count: usize },
    Negate,
}

pub(crate) struct Compiler<C> {
    short_circuit: bool,
    fail_skip: Vec<FailKind>,
    root_fallback: bool,
    bool_leaves: HashMap<(usize, bool), BoolEval<C>>,
    trace_leaves: HashMap<(usize, bool), TraceEval<C>>,
}

fn leaf_identity<C>(f: &LeafFn<C>) -> usize {
    Arc::as_ptr(f).cast::<()>() as usize
}

/// Collect the contiguous same-kind chain rooted at `root` into one operand
/// list, in the original left-to-right evaluation order.
fn collect_chain<C>(root: &Predicate<C>, op: BinOp) -> Vec<Predicate<C>> {
    let mut chain = Vec::new();
    let mut work = vec![root.clone()];
    while let Some(node) = work.pop() {
        let same_kind = matches!(
            (&node.inner.node, op),
            (Node::And(_), BinOp::And) | (Node::Or(_), BinOp::Or)
        );
        if !same_kind {
            chain.push(node);
            continue;
        }
        if let Node::And(children) | Node::Or(children) = &node.inner.node {
            for child in children.iter().rev() {
                work.push(child.clone());
            }
        }
    }
    chain
}

impl<C: 'static> Compiler<C> {
    pub(crate) fn new(opts: &EvalOptions) -> Self {
        Compiler {
            short_circuit: opts.short_circuit,
            fail_skip: opts.fail_skip.iter().copied().collect(),
            root_fallback: opts.root_fallback,
            bool_leaves: HashMap::new(),
            trace_leaves: HashMap::new(),
        }
    }

    fn push_chain(stack: &mut Vec<Step<C>>, node: &Predicate<C>) {
        let op = match &node.inner.node {
            Node::Or(_) => BinOp::Or,
            _ => BinOp::And,
        };
        let chain = collect_chain(node, op);
        // Absence evidence must not reject under `and`, nor accept under `or`.
        let child_fallback = op == BinOp::And;
        stack.push(Step::Combine {
            op,
            count: chain.len(),
        });
        for child in chain.into_iter().rev() {
            stack.push(Step::Enter {
                node: child,
                fallback: child_fallback,
            });
        }
    }

    pub(crate) fn compile_bool(mut self, root: &Predicate<C>) -> BoolEval<C> {
        let mut stack = vec![Step::Enter {
            node: root.clone(),
            fallback: self.root_fallback,
        }];
        let mut results: Vec<BoolEval<C>> = Vec::new();

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter { node, fallback } => match &node.inner.node {
                    Node::Leaf(f) => {
                        let compiled = self.bool_leaf(f, fallback);
                        results.push(compiled);
                    }
                    Node::And(_) | Node::Or(_) => Self::push_chain(&mut stack, &node),
                    Node::Not(child) => {
                        stack.push(Step::Negate);
                        stack.push(Step::Enter {
                            node: child.clone(),
                            fallback: !fallback,
                        });
                    }
                },
                Step::Combine { op, count } => {
                    let operands = results.split_off(results.len() - count);
                    results.push(self.combine_bool(op, operands));
                }
                Step::Negate => {
                    let child = results.pop().expect("negate marker follows its operand");
                    results.push(Arc::new(move |ctx: &C| Ok(!child(ctx)?)));
                }
            }
        }

        results.pop().expect("lowering leaves exactly one evaluator")
    }

    pub(crate) fn compile_trace(mut self, root: &Predicate<C>) -> TraceEval<C> {
        let mut stack = vec![Step::Enter {
            node: root.clone(),
            fallback: self.root_fallback,
        }];
        let mut results: Vec<TraceEval<C>> = Vec::new();

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter { node, fallback } => match &node.inner.node {
                    Node::Leaf(f) => {
                        let compiled = self.trace_leaf(&node, f, fallback);
                        results.push(compiled);
                    }
                    Node::And(_) | Node::Or(_) => Self::push_chain(&mut stack, &node),
                    Node::Not(child) => {
                        stack.push(Step::Negate);
                        stack.push(Step::Enter {
                            node: child.clone(),
                            fallback: !fallback,
                        });
                    }
                },
                Step::Combine { op, count } => {
                    let operands = results.split_off(results.len() - count);
                    results.push(self.combine_trace(op, operands));
                }
                Step::Negate => {
                    let child = results.pop().expect("negate marker follows its operand");
                    results.push(Arc::new(move |ctx: &C| Ok(!child(ctx)?)));
                }
            }
        }

        results.pop().expect("lowering leaves exactly one evaluator")
    }

    /// Compiled plain-bool leaf. Without fail-skip the callable is used
    /// unwrapped; otherwise the wrapper rewrites matching failures to the
    /// leaf's fallback.
    fn bool_leaf(&mut self, f: &LeafFn<C>, fallback: bool) -> BoolEval<C> {
        let key = (leaf_identity(f), fallback);
        if let Some(compiled) = self.bool_leaves.get(&key) {
            return compiled.clone();
        }
        let compiled: BoolEval<C> = if self.fail_skip.is_empty() {
            Arc::clone(f)
        } else {
            let f = Arc::clone(f);
            let skip = self.fail_skip.clone();
            Arc::new(move |ctx: &C| match f(ctx) {
                Err(e) if skip.contains(&e.kind()) => Ok(fallback),
                other => other,
            })
        };
        self.bool_leaves.insert(key, compiled.clone());
        compiled
    }

    /// Compiled trace-mode leaf: raw booleans are always lifted into a leaf
    /// trace; skipped failures become a `SKIP` trace carrying the error.
    fn trace_leaf(&mut self, node: &Predicate<C>, f: &LeafFn<C>, fallback: bool) -> TraceEval<C> {
        let key = (leaf_identity(f), fallback);
        if let Some(compiled) = self.trace_leaves.get(&key) {
            return compiled.clone();
        }
        let name = node.inner.name.clone();
        let desc = node.inner.desc.clone();
        let f = Arc::clone(f);
        let compiled: TraceEval<C> = if self.fail_skip.is_empty() {
            Arc::new(move |ctx: &C| {
                let started = Instant::now();
                let success = f(ctx)?;
                Ok(Trace::new(success, TraceOp::Leaf)
                    .with_meta(name.clone(), desc.clone())
                    .with_elapsed(started.elapsed().as_secs_f64()))
            })
        } else {
            let skip = self.fail_skip.clone();
            Arc::new(move |ctx: &C| {
                let started = Instant::now();
                match f(ctx) {
                    Ok(success) => Ok(Trace::new(success, TraceOp::Leaf)
                        .with_meta(name.clone(), desc.clone())
                        .with_elapsed(started.elapsed().as_secs_f64())),
                    Err(e) if skip.contains(&e.kind()) => {
                        Ok(Trace::new(fallback, TraceOp::Skip)
                            .with_meta(name.clone(), desc.clone())
                            .with_error(e)
                            .with_elapsed(started.elapsed().as_secs_f64()))
                    }
                    Err(e) => Err(e),
                }
            })
        };
        self.trace_leaves.insert(key, compiled.clone());
        compiled
    }

    fn combine_bool(&self, op: BinOp, operands: Vec<BoolEval<C>>) -> BoolEval<C> {
        let compiled: BoolEval<C> = match (op, self.short_circuit) {
            (BinOp::And, true) => Arc::new(move |ctx: &C| {
                for operand in &operands {
                    if !operand(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }),
            (BinOp::And, false) => Arc::new(move |ctx: &C| {
                let mut acc = true;
                for operand in &operands {
                    acc &= operand(ctx)?;
                }
                Ok(acc)
            }),
            (BinOp::Or, true) => Arc::new(move |ctx: &C| {
                for operand in &operands {
                    if operand(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }),
            (BinOp::Or, false) => Arc::new(move |ctx: &C| {
                let mut acc = false;
                for operand in &operands {
                    acc |= operand(ctx)?;
                }
                Ok(acc)
            }),
        };
        compiled
    }

    /// Trace-mode n-ary connective. The first operand is always evaluated;
    /// the rest run as thunks so short-circuiting skips both their
    /// evaluation and their trace materialisation. A pruned tail is recorded
    /// as a wrapper node around the partial result.
    fn combine_trace(&self, op: BinOp, operands: Vec<TraceEval<C>>) -> TraceEval<C> {
        let short_circuit = self.short_circuit;
        let compiled: TraceEval<C> = match op {
            BinOp::And => Arc::new(move |ctx: &C| {
                let (first, rest) = operands
                    .split_first()
                    .expect("connective has at least one operand");
                let mut res = first(ctx)?;
                for thunk in rest {
                    if short_circuit && !res.success {
                        return Ok(Trace::cut(false, TraceOp::And, res));
                    }
                    res = res & thunk(ctx)?;
                }
                Ok(res)
            }),
            BinOp::Or => Arc::new(move |ctx: &C| {
                let (first, rest) = operands
                    .split_first()
                    .expect("connective has at least one operand");
                let mut res = first(ctx)?;
                for thunk in rest {
                    if short_circuit && res.success {
                        return Ok(Trace::cut(true, TraceOp::Or, res));
                    }
                    res = res | thunk(ctx)?;
                }
                Ok(res)
            }),
        };
        compiled
    }
}
