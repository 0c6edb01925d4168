//! Predicate construction and evaluation error types.

use thiserror::Error;

/// Classifies a leaf failure for fail-skip matching.
///
/// Kinds are plain interned labels compared by value. The library defines
/// the kinds it raises itself as associated constants; hosts introduce their
/// own with [`FailKind::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailKind(&'static str);

impl FailKind {
    /// Raised by the tombstone behind a handle whose rule is revoked or
    /// not yet defined.
    pub const RULE_REVOKED: FailKind = FailKind("RuleRevoked");

    /// Create a new failure kind with the given label.
    pub const fn new(label: &'static str) -> Self {
        FailKind(label)
    }

    /// The kind's label.
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for FailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Runtime failure raised by a leaf callable during evaluation.
///
/// An error whose [`kind`](EvalError::kind) is in the call's fail-skip set is
/// caught and replaced by the leaf's fallback; anything else propagates to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A leaf callable failed.
    #[error("{kind}: {message}")]
    Leaf {
        /// Kind used for fail-skip matching.
        kind: FailKind,
        /// Human-readable failure detail.
        message: String,
    },

    /// A handle invocation reached a rule that is revoked or missing.
    #[error("rule '{rule}' in registry '{registry}' revoked or missing")]
    RuleRevoked {
        /// Registry the rule was looked up in.
        registry: String,
        /// Rule identifier.
        rule: String,
    },
}

impl EvalError {
    /// Build a leaf failure of the given kind.
    pub fn leaf(kind: FailKind, message: impl Into<String>) -> Self {
        EvalError::Leaf {
            kind,
            message: message.into(),
        }
    }

    /// The failure kind, used for fail-skip matching.
    pub fn kind(&self) -> FailKind {
        match self {
            EvalError::Leaf { kind, .. } => *kind,
            EvalError::RuleRevoked { .. } => FailKind::RULE_REVOKED,
        }
    }
}

/// Error constructing a predicate combinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// An empty sequence was passed where at least one predicate is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
