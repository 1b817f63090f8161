//! Data availability checking.
//!
//! [`check`] walks a selector the way the reader would and reports whether
//! everything it needs is present, plus the most recent invalidation epoch
//! among the records it touched. Missing fields can be resolved by
//! [`MissingFieldHandler`]s; their answers are written to the target source
//! so later reads see them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use normstore_source::{InMemoryRecordSource, MutableRecordSource, RecordSlot, RecordSource};
use normstore_types::{DataId, Epoch, FieldValue, Record, Variables};

use crate::descriptor::Selector;
use crate::loader::OperationLoader;
use crate::node::{argument_values, LinkedField, ModuleImport, ScalarField, Selection};
use crate::reader::scalar_value;

/// Whether a selector can be fully read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvailabilityStatus {
    Available,
    Missing,
}

/// Outcome of [`check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Availability {
    pub status: AvailabilityStatus,
    /// Greatest `invalidated_at` among the records the check touched.
    pub most_recently_invalidated_at: Option<Epoch>,
}

/// Fallback for fields absent from the source.
///
/// Each method returns `None` when the handler does not apply. The
/// default implementations apply to nothing.
pub trait MissingFieldHandler: Send + Sync {
    fn handle_scalar(
        &self,
        _field: &ScalarField,
        _record: &Record,
        _args: &BTreeMap<String, Value>,
        _source: &dyn RecordSource,
    ) -> Option<Value> {
        None
    }

    /// `Some(None)` resolves the link to null.
    fn handle_linked(
        &self,
        _field: &LinkedField,
        _record: &Record,
        _args: &BTreeMap<String, Value>,
        _source: &dyn RecordSource,
    ) -> Option<Option<DataId>> {
        None
    }

    fn handle_plural_linked(
        &self,
        _field: &LinkedField,
        _record: &Record,
        _args: &BTreeMap<String, Value>,
        _source: &dyn RecordSource,
    ) -> Option<Vec<Option<DataId>>> {
        None
    }
}

/// Check whether `selector` is fully available in `source`.
///
/// Reads consult `target` before `source`; handler results are written to
/// `target` only.
pub fn check(
    source: &dyn RecordSource,
    target: &mut InMemoryRecordSource,
    selector: &Selector,
    handlers: &[Arc<dyn MissingFieldHandler>],
    loader: Option<&dyn OperationLoader>,
) -> Availability {
    let mut checker = Checker {
        source,
        target,
        handlers,
        loader,
        variables: &selector.variables,
        is_missing: false,
        most_recently_invalidated_at: None,
    };
    checker.traverse(&selector.node.selections, &selector.data_id);
    let status = if checker.is_missing {
        AvailabilityStatus::Missing
    } else {
        AvailabilityStatus::Available
    };
    debug!(?status, data_id = %selector.data_id, "availability checked");
    Availability {
        status,
        most_recently_invalidated_at: checker.most_recently_invalidated_at,
    }
}

struct Checker<'a> {
    source: &'a dyn RecordSource,
    target: &'a mut InMemoryRecordSource,
    handlers: &'a [Arc<dyn MissingFieldHandler>],
    loader: Option<&'a dyn OperationLoader>,
    variables: &'a Variables,
    is_missing: bool,
    most_recently_invalidated_at: Option<Epoch>,
}

impl Checker<'_> {
    fn slot(&self, id: &DataId) -> Option<RecordSlot> {
        self.target.get(id).or_else(|| self.source.get(id)).cloned()
    }

    fn traverse(&mut self, selections: &[Selection], id: &DataId) {
        match self.slot(id) {
            None => self.is_missing = true,
            Some(RecordSlot::Tombstone) => {}
            Some(RecordSlot::Present(record)) => {
                if let Some(at) = record.invalidated_at() {
                    self.most_recently_invalidated_at =
                        Some(self.most_recently_invalidated_at.map_or(at, |prev| prev.max(at)));
                }
                self.check_selections(selections, &record);
            }
        }
    }

    fn check_selections(&mut self, selections: &[Selection], record: &Arc<Record>) {
        for selection in selections {
            match selection {
                Selection::ScalarField(field) => self.check_scalar(field, record),
                Selection::LinkedField(field) if field.plural => self.check_plural_link(field, record),
                Selection::LinkedField(field) => self.check_link(field, record),
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.check_selections(&condition.selections, record);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if record.typename() == Some(fragment.type_condition.as_str()) {
                        self.check_selections(&fragment.selections, record);
                    }
                }
                Selection::ModuleImport(import) => self.check_module_import(import, record),
            }
        }
    }

    fn check_scalar(&mut self, field: &ScalarField, record: &Arc<Record>) {
        let key = field.storage_key(self.variables);
        if scalar_value(record, &key).is_some() {
            return;
        }
        // Client records have no server id to fetch.
        if field.name == "id" && field.alias.is_none() && record.id().is_client_id() {
            return;
        }
        let args = argument_values(&field.args, self.variables);
        let resolved = self
            .handlers
            .iter()
            .find_map(|h| h.handle_scalar(field, record, &args, self.source));
        match resolved {
            Some(value) => self.write_field(record.id(), key, FieldValue::Scalar(value)),
            None => self.is_missing = true,
        }
    }

    fn check_link(&mut self, field: &LinkedField, record: &Arc<Record>) {
        let key = field.storage_key(self.variables);
        let linked = match record.link(&key) {
            Ok(Some(linked)) => linked.cloned(),
            Ok(None) => {
                let args = argument_values(&field.args, self.variables);
                let resolved = self
                    .handlers
                    .iter()
                    .find_map(|h| h.handle_linked(field, record, &args, self.source));
                match resolved {
                    Some(linked) => {
                        let value = match &linked {
                            Some(id) => FieldValue::Link(id.clone()),
                            None => FieldValue::Scalar(Value::Null),
                        };
                        self.write_field(record.id(), key, value);
                        linked
                    }
                    None => {
                        self.is_missing = true;
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "unexpected field kind while checking link");
                self.is_missing = true;
                None
            }
        };
        if let Some(id) = linked {
            self.traverse(&field.selections, &id);
        }
    }

    fn check_plural_link(&mut self, field: &LinkedField, record: &Arc<Record>) {
        let key = field.storage_key(self.variables);
        let linked: Vec<Option<DataId>> = match record.links(&key) {
            Ok(Some(Some(ids))) => ids.to_vec(),
            Ok(Some(None)) => Vec::new(),
            Ok(None) => {
                let args = argument_values(&field.args, self.variables);
                let resolved = self
                    .handlers
                    .iter()
                    .find_map(|h| h.handle_plural_linked(field, record, &args, self.source));
                match resolved {
                    Some(ids) => {
                        self.write_field(record.id(), key, FieldValue::Links(ids.clone()));
                        ids
                    }
                    None => {
                        self.is_missing = true;
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "unexpected field kind while checking links");
                self.is_missing = true;
                Vec::new()
            }
        };
        for id in linked.iter().flatten() {
            self.traverse(&field.selections, id);
        }
    }

    fn check_module_import(&mut self, import: &ModuleImport, record: &Arc<Record>) {
        let reference = match record.scalar(&import.operation_key()) {
            Ok(Some(Value::String(reference))) => reference.clone(),
            Ok(Some(_)) => return,
            Ok(None) | Err(_) => {
                self.is_missing = true;
                return;
            }
        };
        match self.loader.and_then(|loader| loader.get(&reference)) {
            Some(document) => self.check_selections(&document.selections, record),
            // Not loaded yet, so its data cannot have been processed either.
            None => self.is_missing = true,
        }
    }

    fn write_field(&mut self, id: &DataId, key: String, value: FieldValue) {
        let Some(RecordSlot::Present(current)) = self.slot(id) else {
            return;
        };
        let updated = (*current).clone().with_field(key, value);
        self.target.set(id.clone(), Arc::new(updated));
    }
}
