use thiserror::Error;

use crate::parse::ParseError;

/// Errors produced while compiling one rule or macro. A compile error is
/// attributed to a single definition and never aborts the rest of a load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("unknown variable '${{{name}}}'")]
    UnknownVariable { name: String },

    #[error("unknown variable scope '{scope}' in '${{{name}}}'")]
    UnknownScope { scope: String, name: String },

    #[error("operator '{operator}' expects {expected}, found {found} in '{expression}'")]
    TypeMismatch {
        operator: String,
        expected: String,
        found: String,
        expression: String,
    },

    #[error("recursive macro reference: {}", path.join(" -> "))]
    RecursiveMacro { path: Vec<String> },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("'{expression}' is not a constant value")]
    NotConstant { expression: String },

    #[error("rule reads no event-specific field")]
    NoEventType,

    #[error("rule mixes fields of several event types: {}", event_types.join(", "))]
    MultipleEventTypes { event_types: Vec<String> },

    #[error("'{expression}' is not a boolean expression")]
    NotBoolean { expression: String },
}
