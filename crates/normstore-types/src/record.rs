//! Normalized records.
//!
//! A [`Record`] is the field map of one entity. Records are shared as
//! `Arc<Record>` between the store, optimistic overlays, and snapshots, so a
//! published record is never edited: every change builds a new value and the
//! holder swaps the `Arc`. [`Record::merged`] keeps the original `Arc` when a
//! merge changes nothing, which is what lets the store tell "updated" from
//! "rewritten with identical data".

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_id::DataId;
use crate::epoch::Epoch;
use crate::error::TypeError;

/// Storage key under which a record's typename is read.
pub const TYPENAME_KEY: &str = "__typename";

/// Prefix of the field naming the document a module import resolves to.
pub const MODULE_OPERATION_PREFIX: &str = "__module_operation_";

/// Value stored under one storage key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "FieldRepr", into = "FieldRepr")]
pub enum FieldValue {
    /// A scalar (any JSON value, including null, lists, and objects).
    Scalar(Value),
    /// A link to exactly one other record.
    Link(DataId),
    /// A list of links; `None` entries are null list items.
    Links(Vec<Option<DataId>>),
}

impl FieldValue {
    pub fn scalar(value: impl Into<Value>) -> Self {
        FieldValue::Scalar(value.into())
    }

    pub fn link(id: impl Into<DataId>) -> Self {
        FieldValue::Link(id.into())
    }

    pub fn links<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = Option<T>>,
        T: Into<DataId>,
    {
        FieldValue::Links(ids.into_iter().map(|id| id.map(Into::into)).collect())
    }

    /// Every identity this value points at, in order.
    pub fn linked_ids(&self) -> impl Iterator<Item = &DataId> {
        let (single, many): (Option<&DataId>, &[Option<DataId>]) = match self {
            FieldValue::Scalar(_) => (None, &[]),
            FieldValue::Link(id) => (Some(id), &[]),
            FieldValue::Links(ids) => (None, ids.as_slice()),
        };
        single.into_iter().chain(many.iter().flatten())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkRepr {
    #[serde(rename = "__ref")]
    target: DataId,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinksRepr {
    #[serde(rename = "__refs")]
    targets: Vec<Option<DataId>>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Link(LinkRepr),
    Links(LinksRepr),
    Scalar(Value),
}

impl From<FieldRepr> for FieldValue {
    fn from(repr: FieldRepr) -> Self {
        match repr {
            FieldRepr::Link(l) => FieldValue::Link(l.target),
            FieldRepr::Links(l) => FieldValue::Links(l.targets),
            FieldRepr::Scalar(v) => FieldValue::Scalar(v),
        }
    }
}

impl From<FieldValue> for FieldRepr {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Link(target) => FieldRepr::Link(LinkRepr { target }),
            FieldValue::Links(targets) => FieldRepr::Links(LinksRepr { targets }),
            FieldValue::Scalar(v) => FieldRepr::Scalar(v),
        }
    }
}

/// Field map for one normalized entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "__id")]
    id: DataId,
    #[serde(rename = "__typename", default, skip_serializing_if = "Option::is_none")]
    typename: Option<String>,
    #[serde(rename = "__invalidated_at", default, skip_serializing_if = "Option::is_none")]
    invalidated_at: Option<Epoch>,
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<DataId>, typename: Option<&str>) -> Self {
        Self {
            id: id.into(),
            typename: typename.map(str::to_string),
            invalidated_at: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &DataId {
        &self.id
    }

    pub fn typename(&self) -> Option<&str> {
        self.typename.as_deref()
    }

    /// Epoch at which this record was last explicitly invalidated.
    pub fn invalidated_at(&self) -> Option<Epoch> {
        self.invalidated_at
    }

    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    pub fn has_field(&self, storage_key: &str) -> bool {
        self.fields.contains_key(storage_key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Scalar value under `storage_key`. `Ok(None)` if the field is absent.
    pub fn scalar(&self, storage_key: &str) -> Result<Option<&Value>, TypeError> {
        match self.fields.get(storage_key) {
            None => Ok(None),
            Some(FieldValue::Scalar(v)) => Ok(Some(v)),
            Some(_) => Err(self.kind_error(storage_key, "scalar")),
        }
    }

    /// Singular link under `storage_key`. A scalar null reads as `Some(None)`.
    pub fn link(&self, storage_key: &str) -> Result<Option<Option<&DataId>>, TypeError> {
        match self.fields.get(storage_key) {
            None => Ok(None),
            Some(FieldValue::Link(id)) => Ok(Some(Some(id))),
            Some(FieldValue::Scalar(Value::Null)) => Ok(Some(None)),
            Some(_) => Err(self.kind_error(storage_key, "link")),
        }
    }

    /// Plural link under `storage_key`. A scalar null reads as `Some(None)`.
    pub fn links(&self, storage_key: &str) -> Result<Option<Option<&[Option<DataId>]>>, TypeError> {
        match self.fields.get(storage_key) {
            None => Ok(None),
            Some(FieldValue::Links(ids)) => Ok(Some(Some(ids.as_slice()))),
            Some(FieldValue::Scalar(Value::Null)) => Ok(Some(None)),
            Some(_) => Err(self.kind_error(storage_key, "list of links")),
        }
    }

    /// Copy of this record with one field set.
    pub fn with_field(mut self, storage_key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(storage_key.into(), value);
        self
    }

    /// Copy of this record with one field removed.
    pub fn without_field(mut self, storage_key: &str) -> Self {
        self.fields.remove(storage_key);
        self
    }

    /// Copy of this record stamped as invalidated at `epoch`.
    pub fn with_invalidated_at(mut self, epoch: Epoch) -> Self {
        self.invalidated_at = Some(epoch);
        self
    }

    /// Structurally merge `next` over `prev`.
    ///
    /// Every field of `next` replaces the one in `prev`; a typename or
    /// invalidation stamp carried by `next` wins. When the result would equal
    /// `prev` field for field, `prev` itself is returned (same `Arc`), so
    /// `Arc::ptr_eq(&prev, &merged)` means "nothing changed".
    pub fn merged(prev: &Arc<Record>, next: &Record) -> Arc<Record> {
        let mut updated: Option<Record> = None;

        if next.typename.is_some() && next.typename != prev.typename {
            updated.get_or_insert_with(|| (**prev).clone()).typename = next.typename.clone();
        }
        if next.invalidated_at.is_some() && next.invalidated_at != prev.invalidated_at {
            updated.get_or_insert_with(|| (**prev).clone()).invalidated_at = next.invalidated_at;
        }
        for (key, value) in &next.fields {
            if prev.fields.get(key) != Some(value) {
                updated
                    .get_or_insert_with(|| (**prev).clone())
                    .fields
                    .insert(key.clone(), value.clone());
            }
        }

        match updated {
            Some(record) => Arc::new(record),
            None => Arc::clone(prev),
        }
    }

    fn kind_error(&self, field: &str, expected: &'static str) -> TypeError {
        TypeError::FieldKind {
            id: self.id.to_string(),
            field: field.to_string(),
            expected,
        }
    }
}
