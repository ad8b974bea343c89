//! Internal error type for the IR.
//!
//! An [`IrError`] always means the compiler itself observed a graph shape it
//! must never observe. User mistakes are reported through
//! [`DiagnosticLog`](crate::DiagnosticLog) instead.

/// An internal invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    /// A handle does not belong to the arena it is used with.
    #[error("{kind} handle {index} out of bounds (arena size: {size})")]
    BadHandle {
        kind: &'static str,
        index: usize,
        size: usize,
    },

    /// An expression's type could not be derived from its operands.
    #[error("cannot resolve type of expression [{expression}]: {reason}")]
    TypeResolution { expression: usize, reason: String },

    /// A dereference names a field or element that the base type lacks.
    #[error("invalid access into {base}: index {index}")]
    InvalidAccess { base: String, index: u32 },

    /// A node appears where the pipeline forbids it.
    #[error("invalid IR shape: {0}")]
    InvalidShape(String),

    /// More than one function is flagged as the entry point.
    #[error("{0} functions are flagged as entry point, expected exactly one")]
    EntryPointCount(usize),
}
