use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid data id: {0}")]
    InvalidDataId(String),

    #[error("field {field} on record {id} is not a {expected}")]
    FieldKind {
        id: String,
        field: String,
        expected: &'static str,
    },
}
