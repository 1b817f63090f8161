//! Error types for selectors and document registries.

/// Errors that can occur while building requests or registering documents.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// A document with this name is already registered.
    #[error("duplicate document: {0}")]
    DuplicateDocument(String),

    /// A document failed structural validation.
    #[error("malformed document {name}: {reason}")]
    MalformedDocument {
        /// The offending document.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for selector results.
pub type SelectorResult<T> = Result<T, SelectorError>;
