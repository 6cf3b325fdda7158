use thiserror::Error;

/// A structural or wire-grammar failure raised by the core.
///
/// None of these are user-facing validation errors: they mean the submission
/// was malformed or an intent disagreed with the current tree shape. Callers
/// are expected to log or report them, not render them inline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("invalid field name \"{name}\": {reason}")]
    InvalidName { name: String, reason: String },

    #[error("malformed intent: {reason}")]
    MalformedIntent { reason: String },

    #[error("index {index} out of range for list \"{name}\" (length {length})")]
    IndexOutOfRange {
        name: String,
        index: usize,
        length: usize,
    },

    #[error("invalid operation on \"{name}\": {reason}")]
    InvalidOperation { name: String, reason: String },

    /// Two entries disagree on whether a path holds an object, an array, or a leaf.
    #[error("conflicting container kinds at \"{name}\"")]
    ShapeConflict { name: String },
}

impl FormError {
    pub fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        FormError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_intent(reason: impl Into<String>) -> Self {
        FormError::MalformedIntent {
            reason: reason.into(),
        }
    }

    pub fn invalid_operation(name: &str, reason: impl Into<String>) -> Self {
        FormError::InvalidOperation {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FormError::InvalidName { .. } => "invalid-name",
            FormError::MalformedIntent { .. } => "malformed-intent",
            FormError::IndexOutOfRange { .. } => "index-out-of-range",
            FormError::InvalidOperation { .. } => "invalid-operation",
            FormError::ShapeConflict { .. } => "shape-conflict",
        }
    }

    /// The raw submission violated the wire grammar.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            FormError::InvalidName { .. }
                | FormError::MalformedIntent { .. }
                | FormError::ShapeConflict { .. }
        )
    }

    /// An intent targeted a path inconsistent with the current tree.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FormError::IndexOutOfRange { .. } | FormError::InvalidOperation { .. }
        )
    }
}

/// Failure of a transition that also invokes a validation adapter.
///
/// Adapter errors are carried through untouched: a validator that failed
/// must never be mistaken for one that reported "valid".
#[derive(Debug, Error)]
pub enum ReconcileError<E> {
    #[error(transparent)]
    Form(#[from] FormError),

    #[error("validation adapter failed: {0}")]
    Adapter(E),
}

pub type Result<T, E = FormError> = std::result::Result<T, E>;
