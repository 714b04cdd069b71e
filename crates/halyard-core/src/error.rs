use thiserror::Error;

/// A desired configuration that violates a field constraint. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("{field}: unsupported argument")]
    UnknownField { field: String },

    #[error("{field}: required argument is missing")]
    MissingField { field: String },

    #[error("{field}: computed by the remote side and cannot be set")]
    OutputOnly { field: String },

    #[error("{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{field}: {value:?} is not one of [{allowed}]")]
    NotAllowed {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("{field}: at most {max} block(s) allowed, got {actual}")]
    TooManyBlocks {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("{field}: reference {reference} could not be resolved")]
    UnresolvedReference { field: String, reference: String },

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}
