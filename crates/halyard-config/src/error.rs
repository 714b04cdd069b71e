use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unexpected block `{0}`: only `resource \"<type>\" \"<name>\"` blocks are allowed at the top level")]
    UnexpectedBlock(String),

    #[error("{block}: expected {expected} label(s), got {actual}")]
    Labels {
        block: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("{resource}: `{field}` is declared more than once")]
    DuplicateField { resource: String, field: String },

    #[error("{resource}: `{field}`: {reason}")]
    Unsupported {
        resource: String,
        field: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
