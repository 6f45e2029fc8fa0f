//! Error types for planning and evaluation.

use trellis_ir::IrError;

/// A query that cannot be compiled. Raised before any network state is
/// touched, so the engine stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Program(#[from] IrError),
    #[error("query `{query}`: `{constraint}` refers to undeclared relation `{view}`")]
    UnknownRelation {
        query: String,
        constraint: String,
        view: String,
    },
    #[error("query `{query}`: `{constraint}` calls undeclared query `{callee}`")]
    UnknownQuery {
        query: String,
        constraint: String,
        callee: String,
    },
    #[error("query `{query}`: `{constraint}` has {found} arguments, expected {expected}")]
    ArityMismatch {
        query: String,
        constraint: String,
        expected: usize,
        found: usize,
    },
    #[error("query `{query}`: transitive call `{constraint}` must be binary")]
    NonBinaryTransitiveCall { query: String, constraint: String },
    #[error("query `{query}`: transitive call `{constraint}` cannot be negated")]
    NegatedTransitiveCall { query: String, constraint: String },
    #[error("query `{query}`: `{constraint}` negates `{callee}`, which depends on `{query}`")]
    NegatedRecursiveCall {
        query: String,
        constraint: String,
        callee: String,
    },
    #[error("query `{query}`, clause {clause}: `{constraint}` is never enforced")]
    UnenforcedConstraint {
        query: String,
        clause: usize,
        constraint: String,
    },
    #[error("query `{query}`, clause {clause}: parameter `{variable}` is never bound")]
    UnboundParameter {
        query: String,
        clause: usize,
        variable: String,
    },
}

/// Errors raised while evaluating.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// A broken internal invariant. The engine refuses further work.
    #[error("internal error at node {node}{}: {message}", group.map(|g| format!(" in group {g}")).unwrap_or_default())]
    Internal {
        node: u32,
        group: Option<u32>,
        message: String,
    },
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("engine is unusable after an earlier internal error: {0}")]
    Poisoned(String),
    #[error("unknown query `{0}`")]
    UnknownQuery(String),
    #[error("unknown relation `{0}`")]
    UnknownRelation(String),
    #[error("tuple for `{relation}` has {found} values, expected {expected}")]
    ArityMismatch {
        relation: String,
        expected: usize,
        found: usize,
    },
}
