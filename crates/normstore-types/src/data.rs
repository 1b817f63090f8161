//! Materialized selector data with structural sharing.
//!
//! Objects and lists are reference counted, so "the same data" can be
//! checked by pointer identity. [`recycle_nodes_into`] rebuilds a fresh read
//! result so that every subtree equal to the previous result is replaced by
//! the previous subtree itself, which lets consumers skip work with a cheap
//! identity comparison.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

/// Result of reading a selector out of a record source.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectorData {
    Null,
    Scalar(Value),
    Object(Arc<BTreeMap<String, SelectorData>>),
    List(Arc<Vec<SelectorData>>),
}

impl SelectorData {
    pub fn object(fields: BTreeMap<String, SelectorData>) -> Self {
        SelectorData::Object(Arc::new(fields))
    }

    pub fn list(items: Vec<SelectorData>) -> Self {
        SelectorData::List(Arc::new(items))
    }

    /// Build from plain JSON. JSON objects and arrays become shared nodes.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => SelectorData::Null,
            Value::Array(items) => {
                SelectorData::list(items.into_iter().map(SelectorData::from_json).collect())
            }
            Value::Object(map) => SelectorData::object(
                map.into_iter()
                    .map(|(k, v)| (k, SelectorData::from_json(v)))
                    .collect(),
            ),
            scalar => SelectorData::Scalar(scalar),
        }
    }

    /// Plain JSON rendering.
    pub fn to_json(&self) -> Value {
        match self {
            SelectorData::Null => Value::Null,
            SelectorData::Scalar(v) => v.clone(),
            SelectorData::Object(fields) => Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            SelectorData::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SelectorData::Null)
    }

    /// Field of an object node.
    pub fn get(&self, key: &str) -> Option<&SelectorData> {
        match self {
            SelectorData::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Identity comparison: shared nodes must be the same allocation,
    /// scalars compare by value.
    pub fn same_identity(&self, other: &SelectorData) -> bool {
        match (self, other) {
            (SelectorData::Null, SelectorData::Null) => true,
            (SelectorData::Scalar(a), SelectorData::Scalar(b)) => a == b,
            (SelectorData::Object(a), SelectorData::Object(b)) => Arc::ptr_eq(a, b),
            (SelectorData::List(a), SelectorData::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Recycle the unchanged parts of `prev` into `next`.
///
/// Returns a value structurally equal to `next` in which every subtree that
/// equals the matching subtree of `prev` is `prev`'s own allocation. When
/// nothing changed at all the result is identical to `prev`.
pub fn recycle_nodes_into(prev: &SelectorData, next: SelectorData) -> SelectorData {
    if prev.same_identity(&next) {
        return prev.clone();
    }
    match (prev, next) {
        (SelectorData::Object(prev_fields), SelectorData::Object(next_fields)) => {
            let next_fields = Arc::try_unwrap(next_fields).unwrap_or_else(|shared| (*shared).clone());
            let mut can_recycle = prev_fields.len() == next_fields.len();
            let mut recycled = BTreeMap::new();
            for (key, next_value) in next_fields {
                let value = match prev_fields.get(&key) {
                    Some(prev_value) => {
                        let value = recycle_nodes_into(prev_value, next_value);
                        can_recycle &= value.same_identity(prev_value);
                        value
                    }
                    None => {
                        can_recycle = false;
                        next_value
                    }
                };
                recycled.insert(key, value);
            }
            if can_recycle {
                prev.clone()
            } else {
                SelectorData::object(recycled)
            }
        }
        (SelectorData::List(prev_items), SelectorData::List(next_items)) => {
            let next_items = Arc::try_unwrap(next_items).unwrap_or_else(|shared| (*shared).clone());
            let mut can_recycle = prev_items.len() == next_items.len();
            let recycled: Vec<SelectorData> = next_items
                .into_iter()
                .enumerate()
                .map(|(index, next_value)| match prev_items.get(index) {
                    Some(prev_value) => {
                        let value = recycle_nodes_into(prev_value, next_value);
                        can_recycle &= value.same_identity(prev_value);
                        value
                    }
                    None => {
                        can_recycle = false;
                        next_value
                    }
                })
                .collect();
            if can_recycle {
                prev.clone()
            } else {
                SelectorData::list(recycled)
            }
        }
        (_, next) => next,
    }
}
