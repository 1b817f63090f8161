//! Out-of-band document resolution for module imports.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{SelectorError, SelectorResult};
use crate::node::ConcreteNode;

/// Resolves the document a record names for a module import.
pub trait OperationLoader: Send + Sync {
    /// Look up a document by reference. `None` means "not loaded (yet)".
    fn get(&self, reference: &str) -> Option<Arc<ConcreteNode>>;
}

/// Fixed registry of documents keyed by name.
#[derive(Debug, Default)]
pub struct StaticOperationLoader {
    documents: HashMap<String, Arc<ConcreteNode>>,
}

impl StaticOperationLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document under its own name.
    ///
    /// Malformed documents and a second document with the same name are
    /// rejected; the registry is unchanged on error.
    pub fn register(&mut self, document: ConcreteNode) -> SelectorResult<()> {
        document.validate()?;
        if self.documents.contains_key(&document.name) {
            return Err(SelectorError::DuplicateDocument(document.name));
        }
        debug!(document = %document.name, "registered module document");
        self.documents.insert(document.name.clone(), Arc::new(document));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl OperationLoader for StaticOperationLoader {
    fn get(&self, reference: &str) -> Option<Arc<ConcreteNode>> {
        self.documents.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Selection;

    fn fragment(name: &str) -> ConcreteNode {
        ConcreteNode::fragment(name, vec![Selection::scalar("text")])
    }

    #[test]
    fn register_and_get() {
        let mut loader = StaticOperationLoader::new();
        loader.register(fragment("Markdown_text")).unwrap();
        assert_eq!(loader.len(), 1);
        assert_eq!(loader.get("Markdown_text").unwrap().name, "Markdown_text");
        assert!(loader.get("Plain_text").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut loader = StaticOperationLoader::new();
        loader.register(fragment("Markdown_text")).unwrap();
        let err = loader.register(fragment("Markdown_text")).unwrap_err();
        assert!(matches!(err, SelectorError::DuplicateDocument(name) if name == "Markdown_text"));
        assert_eq!(loader.len(), 1);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let mut loader = StaticOperationLoader::new();
        assert!(loader.register(ConcreteNode::fragment("", vec![])).is_err());
        assert!(loader.is_empty());
    }
}
