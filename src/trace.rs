//! Execution traces for predicate evaluation.
//!
//! A [`Trace`] records how an evaluation arrived at its outcome: one node per
//! evaluated operand, tagged with the operator that produced it. Traces are
//! plain values and compose with the same `&`, `|` and `!` operators as
//! predicates, so runtime helpers can assemble them incrementally while
//! preserving the boolean laws.
//!
//! Rendering is a pluggable strategy ([`TraceStyle`]); the data structure is
//! the stable part. [`DefaultTraceStyle`] prints an indented tree, one node
//! per line.

use crate::predicate::EvalError;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Operator tag attached to a trace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceOp {
    /// A leaf callable was invoked.
    Leaf,
    /// Conjunction of the children.
    And,
    /// Disjunction of the children.
    Or,
    /// Negation of the single child.
    Not,
    /// A leaf failure was caught and replaced by its fallback.
    Skip,
    /// A bare boolean operand was lifted into a trace.
    PureBool,
}

impl TraceOp {
    /// Wire/display tag of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            TraceOp::Leaf => "leaf",
            TraceOp::And => "and",
            TraceOp::Or => "or",
            TraceOp::Not => "not",
            TraceOp::Skip => "SKIP",
            TraceOp::PureBool => "PURE_BOOL",
        }
    }
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a single evaluation step and everything beneath it.
#[derive(Debug, Clone)]
pub struct Trace {
    /// Outcome of this step.
    pub success: bool,
    /// Operator that produced the outcome.
    pub operator: TraceOp,
    /// Traces of the evaluated operands, in evaluation order.
    pub children: Vec<Trace>,
    /// Name of the originating predicate, if it had one.
    pub name: Option<String>,
    /// Description of the originating predicate, if it had one.
    pub desc: Option<String>,
    /// The captured failure, for `SKIP` nodes.
    pub error: Option<EvalError>,
    /// Wall-clock seconds spent below this node.
    pub elapsed: f64,
}

impl Trace {
    /// A childless trace with the given outcome and operator.
    pub fn new(success: bool, operator: TraceOp) -> Self {
        Trace {
            success,
            operator,
            children: Vec::new(),
            name: None,
            desc: None,
            error: None,
            elapsed: 0.0,
        }
    }

    /// Lift a bare boolean operand into a trace.
    pub fn pure_bool(success: bool) -> Self {
        Trace::new(success, TraceOp::PureBool)
    }

    /// Attach the originating predicate's name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach the originating predicate's description.
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Attach a captured failure.
    pub fn with_error(mut self, error: EvalError) -> Self {
        self.error = Some(error);
        self
    }

    /// Set the elapsed wall-clock seconds.
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub(crate) fn with_meta(mut self, name: Option<String>, desc: Option<String>) -> Self {
        self.name = name;
        self.desc = desc;
        self
    }

    /// Wrap a partial result whose remaining operands were pruned by
    /// short-circuiting. The outcome is already known.
    pub(crate) fn cut(success: bool, operator: TraceOp, child: Trace) -> Self {
        Trace {
            success,
            operator,
            elapsed: child.elapsed,
            children: vec![child],
            name: None,
            desc: None,
            error: None,
        }
    }

    fn combine(self, operator: TraceOp, other: Trace) -> Trace {
        let success = match operator {
            TraceOp::And => self.success && other.success,
            TraceOp::Or => self.success || other.success,
            _ => unreachable!("combine is only defined for and/or"),
        };
        Trace {
            success,
            operator,
            elapsed: self.elapsed + other.elapsed,
            children: vec![self, other],
            name: None,
            desc: None,
            error: None,
        }
    }

    /// Render with the given style.
    pub fn render(&self, style: &dyn TraceStyle) -> String {
        style.render(self, 0)
    }
}

impl BitAnd for Trace {
    type Output = Trace;

    fn bitand(self, rhs: Trace) -> Trace {
        self.combine(TraceOp::And, rhs)
    }
}

impl BitAnd<bool> for Trace {
    type Output = Trace;

    fn bitand(self, rhs: bool) -> Trace {
        self.combine(TraceOp::And, Trace::pure_bool(rhs))
    }
}

impl BitOr for Trace {
    type Output = Trace;

    fn bitor(self, rhs: Trace) -> Trace {
        self.combine(TraceOp::Or, rhs)
    }
}

impl BitOr<bool> for Trace {
    type Output = Trace;

    fn bitor(self, rhs: bool) -> Trace {
        self.combine(TraceOp::Or, Trace::pure_bool(rhs))
    }
}

impl Not for Trace {
    type Output = Trace;

    fn not(self) -> Trace {
        Trace {
            success: !self.success,
            operator: TraceOp::Not,
            elapsed: self.elapsed,
            children: vec![self],
            name: None,
            desc: None,
            error: None,
        }
    }
}

/// Strategy for turning a trace into text.
pub trait TraceStyle {
    /// Render `trace` indented to `level`.
    fn render(&self, trace: &Trace, level: usize) -> String;
}

/// Indented-tree renderer, one node per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTraceStyle;

impl TraceStyle for DefaultTraceStyle {
    fn render(&self, trace: &Trace, level: usize) -> String {
        let mut line = format!("{}{}", "  ".repeat(level), trace.operator);
        if let Some(name) = &trace.name {
            line.push(' ');
            line.push_str(name);
        }
        line.push_str(&format!(" -> {}", trace.success));
        if let Some(error) = &trace.error {
            line.push_str(&format!(" ({error})"));
        }
        for child in &trace.children {
            line.push('\n');
            line.push_str(&self.render(child, level + 1));
        }
        line
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DefaultTraceStyle.render(self, 0))
    }
}
