//! Requests, selectors, and operation descriptors.
//!
//! A [`ConcreteRequest`] is a compiled operation plus its cache id (a BLAKE3
//! digest of the document). Binding variables to it yields an
//! [`OperationDescriptor`], whose [`RequestIdentifier`] is the stable key the
//! store uses for retention and write bookkeeping.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use normstore_types::{stable_json, DataId, Variables};

use crate::error::{SelectorError, SelectorResult};
use crate::node::ConcreteNode;

/// Compiled operation with a content-derived cache id.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcreteRequest {
    cache_id: String,
    operation: Arc<ConcreteNode>,
}

impl ConcreteRequest {
    /// Wrap an operation, validating it and deriving its cache id.
    pub fn new(operation: ConcreteNode) -> SelectorResult<Self> {
        operation.validate()?;
        let encoded =
            serde_json::to_vec(&operation).map_err(|e| SelectorError::Serialization(e.to_string()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"normstore-request-v1:");
        hasher.update(&encoded);
        let digest = hasher.finalize();
        Ok(Self {
            cache_id: hex::encode(&digest.as_bytes()[..16]),
            operation: Arc::new(operation),
        })
    }

    pub fn name(&self) -> &str {
        &self.operation.name
    }

    /// Hex digest of the document; equal documents share it.
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn operation(&self) -> &Arc<ConcreteNode> {
        &self.operation
    }
}

/// Stable key of one (request, variables) pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestIdentifier(String);

impl RequestIdentifier {
    pub fn new(cache_id: &str, variables: &Variables) -> Self {
        let encoded = stable_json(&Value::Object(
            variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ));
        Self(format!("{cache_id}{encoded}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestIdentifier({})", self.0)
    }
}

impl fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The request that produced (or owns) a selector.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub identifier: RequestIdentifier,
    pub name: String,
    pub variables: Arc<Variables>,
}

/// A read of `node` rooted at `data_id` under bound variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub data_id: DataId,
    pub node: Arc<ConcreteNode>,
    pub variables: Arc<Variables>,
    pub owner: RequestDescriptor,
}

impl Selector {
    pub fn new(
        data_id: DataId,
        node: Arc<ConcreteNode>,
        variables: Arc<Variables>,
        owner: RequestDescriptor,
    ) -> Self {
        Self {
            data_id,
            node,
            variables,
            owner,
        }
    }
}

/// An operation bound to variables, ready to retain, check, or read.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationDescriptor {
    pub request: RequestDescriptor,
    pub root: Selector,
}

impl OperationDescriptor {
    pub fn identifier(&self) -> &RequestIdentifier {
        &self.request.identifier
    }
}

/// Restrict `variables` to the operation's declared arguments, filling in
/// declared defaults for anything not provided.
pub fn operation_variables(operation: &ConcreteNode, variables: &Variables) -> Variables {
    operation
        .argument_definitions
        .iter()
        .map(|def| {
            let value = variables
                .get(&def.name)
                .cloned()
                .unwrap_or_else(|| def.default_value.clone());
            (def.name.clone(), value)
        })
        .collect()
}

/// Bind variables to a request, producing a descriptor rooted at the root
/// record.
pub fn create_operation_descriptor(
    request: &ConcreteRequest,
    variables: &Variables,
) -> OperationDescriptor {
    let variables = Arc::new(operation_variables(request.operation(), variables));
    let descriptor = RequestDescriptor {
        identifier: RequestIdentifier::new(request.cache_id(), &variables),
        name: request.name().to_string(),
        variables: Arc::clone(&variables),
    };
    let root = Selector::new(
        DataId::root(),
        Arc::clone(request.operation()),
        variables,
        descriptor.clone(),
    );
    OperationDescriptor {
        request: descriptor,
        root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Selection;
    use serde_json::json;

    fn user_query() -> ConcreteRequest {
        let node = ConcreteNode::operation(
            "UserQuery",
            vec![Selection::linked("me", vec![Selection::scalar("id")])],
        )
        .with_argument("size", json!(32));
        ConcreteRequest::new(node).unwrap()
    }

    #[test]
    fn cache_id_is_deterministic() {
        let a = user_query();
        let b = user_query();
        assert_eq!(a.cache_id(), b.cache_id());
        assert_eq!(a.cache_id().len(), 32);
    }

    #[test]
    fn different_documents_have_different_cache_ids() {
        let other = ConcreteRequest::new(ConcreteNode::operation(
            "OtherQuery",
            vec![Selection::scalar("id")],
        ))
        .unwrap();
        assert_ne!(user_query().cache_id(), other.cache_id());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let result = ConcreteRequest::new(ConcreteNode::operation("", vec![]));
        assert!(matches!(result, Err(SelectorError::MalformedDocument { .. })));
    }

    #[test]
    fn descriptor_applies_defaults_and_drops_unknown_variables() {
        let request = user_query();
        let mut vars = Variables::new();
        vars.insert("unused".into(), json!(1));
        let op = create_operation_descriptor(&request, &vars);
        assert_eq!(op.request.variables.get("size"), Some(&json!(32)));
        assert!(op.request.variables.get("unused").is_none());
        assert!(op.root.data_id.is_root());
        assert_eq!(op.root.owner, op.request);
    }

    #[test]
    fn identifier_depends_on_variables() {
        let request = user_query();
        let small = create_operation_descriptor(&request, &Variables::new());
        let mut vars = Variables::new();
        vars.insert("size".into(), json!(64));
        let large = create_operation_descriptor(&request, &vars);
        assert_ne!(small.identifier(), large.identifier());
        assert_eq!(
            small.identifier().as_str(),
            format!("{}{{\"size\":32}}", request.cache_id())
        );
    }
}
