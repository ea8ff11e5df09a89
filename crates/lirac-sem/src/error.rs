//! Semantic error types.
//!
//! Every failure the core can report is one [`ErrorKind`] carrying a
//! human-readable message, wrapped in a [`SemanticError`] tagged with the
//! line and column of the offending AST node. Errors are fatal within a
//! top-level declaration; the passes propagate them with `?` up to the
//! pass driver. The one place errors are *caught* is trial type-checking
//! in the transform pass, where a failed hypothesis is expected data.

use lirac_util::Span;
use thiserror::Error;

/// Result alias used throughout the semantic core
pub type Result<T> = std::result::Result<T, SemanticError>;

/// A location-tagged semantic error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{column}: {kind}")]
pub struct SemanticError {
    /// Line of the offending node (1-based)
    pub line: u32,
    /// Column of the offending node (1-based)
    pub column: u32,
    /// What went wrong
    pub kind: ErrorKind,
}

impl SemanticError {
    /// Create an error at the location of `span`
    pub fn new(span: Span, kind: ErrorKind) -> Self {
        Self {
            line: span.line,
            column: span.column,
            kind,
        }
    }
}

/// The taxonomy of semantic failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    /// A pass met an AST node kind it has no rule for. Implementation
    /// bug, not a user error.
    #[error("falling through '{0}'")]
    FallThrough(String),

    /// Same name declared twice in one scope, or a function and a
    /// variable collide.
    #[error("redefining '{0}'")]
    Redefinition(String),

    /// Referenced type name absent from the registry
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// Referenced variable name absent from the scope
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// Field not found in a composite or its ancestors
    #[error("unknown field '{field}' in type '{base}'")]
    UnknownField { base: String, field: String },

    /// Operator token not recognized in this position
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// Two types failed `compatible` where unification was required
    #[error("incompatible types '{0}' and '{1}'")]
    IncompatibleTypes(String, String),

    /// Parent chain revisits a previously-seen composite
    #[error("cyclic inheritance at '{0}'")]
    CyclicInheritance(String),

    /// Protocol extends a non-protocol, or a type inherits from a protocol
    #[error("{0}")]
    ProtocolParentMismatch(String),

    /// `new P(..)` where P is a protocol
    #[error("can not instantiate protocol '{0}'")]
    CannotInstantiateProtocol(String),

    /// Invoke or `new` with the wrong number of arguments
    #[error("'{name}' requires {expected} arguments, got {got}")]
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Invoke with no matching enumerated signature
    #[error("no overload of '{0}' accepts ({1})")]
    NoOverloadCandidate(String, String),

    /// Two parameters of one function share a name
    #[error("duplicated parameter name '{0}'")]
    DuplicateParameterName(String),

    /// The transform pass could not narrow a function signature to any
    /// consistent alternative
    #[error("can not guess a signature for '{0}'")]
    CannotGuessSignature(String),

    /// An attribute kept a non-singleton union after all narrowing stages
    #[error("can not guess attribute type of '{name}', candidates are {candidates}")]
    CannotGuessAttribute { name: String, candidates: String },
}
