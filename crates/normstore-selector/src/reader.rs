//! Reading a selector out of a record source.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::warn;

use normstore_source::{RecordSlot, RecordSource};
use normstore_types::{DataId, Record, SelectorData, Variables, TYPENAME_KEY};

use crate::descriptor::Selector;
use crate::node::{LinkedField, Selection};
use crate::snapshot::Snapshot;

/// Response key under which a resolved module import names its document.
pub const MODULE_OPERATION_KEY: &str = "__module_operation";

/// Storage key that reads a record's own identity.
pub const ID_KEY: &str = "__id";

/// Read `selector` from `source`.
///
/// Pure: the source is not modified. Absent records and fields mark the
/// snapshot as missing data and are left out of the result; tombstoned
/// records and null links read as null.
pub fn read(source: &dyn RecordSource, selector: &Selector) -> Snapshot {
    let mut reader = Reader {
        source,
        variables: &selector.variables,
        seen_records: HashSet::new(),
        is_missing_data: false,
    };
    let data = reader.traverse(&selector.node.selections, &selector.data_id);
    Snapshot {
        data,
        selector: selector.clone(),
        seen_records: reader.seen_records,
        is_missing_data: reader.is_missing_data,
    }
}

/// Scalar value stored under `storage_key`, including the synthetic
/// `__id` and `__typename` keys. `None` when the record lacks it.
pub(crate) fn scalar_value(record: &Record, storage_key: &str) -> Option<Value> {
    match storage_key {
        ID_KEY => Some(Value::String(record.id().to_string())),
        TYPENAME_KEY => record.typename().map(|t| Value::String(t.to_string())),
        _ => match record.scalar(storage_key) {
            Ok(value) => value.cloned(),
            Err(e) => {
                warn!(error = %e, "unexpected field kind while reading scalar");
                None
            }
        },
    }
}

struct Reader<'a> {
    source: &'a dyn RecordSource,
    variables: &'a Variables,
    seen_records: HashSet<DataId>,
    is_missing_data: bool,
}

impl<'a> Reader<'a> {
    fn traverse(&mut self, selections: &[Selection], id: &DataId) -> SelectorData {
        self.seen_records.insert(id.clone());
        let source = self.source;
        match source.get(id) {
            None => {
                self.is_missing_data = true;
                SelectorData::Null
            }
            Some(RecordSlot::Tombstone) => SelectorData::Null,
            Some(RecordSlot::Present(record)) => {
                let mut data = BTreeMap::new();
                self.read_selections(selections, record, &mut data);
                SelectorData::object(data)
            }
        }
    }

    fn read_selections(
        &mut self,
        selections: &[Selection],
        record: &Record,
        data: &mut BTreeMap<String, SelectorData>,
    ) {
        for selection in selections {
            match selection {
                Selection::ScalarField(field) => {
                    let key = field.storage_key(self.variables);
                    match scalar_value(record, &key) {
                        Some(value) => {
                            data.insert(field.response_key().to_string(), SelectorData::from_json(value));
                        }
                        None => self.is_missing_data = true,
                    }
                }
                Selection::LinkedField(field) if field.plural => {
                    self.read_plural_link(field, record, data);
                }
                Selection::LinkedField(field) => self.read_link(field, record, data),
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.read_selections(&condition.selections, record, data);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if record.typename() == Some(fragment.type_condition.as_str()) {
                        self.read_selections(&fragment.selections, record, data);
                    }
                }
                Selection::ModuleImport(import) => {
                    if let Ok(Some(Value::String(document))) = record.scalar(&import.operation_key()) {
                        data.insert(
                            MODULE_OPERATION_KEY.to_string(),
                            SelectorData::Scalar(Value::String(document.clone())),
                        );
                    }
                }
            }
        }
    }

    fn read_link(&mut self, field: &LinkedField, record: &Record, data: &mut BTreeMap<String, SelectorData>) {
        let key = field.storage_key(self.variables);
        let value = match record.link(&key) {
            Ok(Some(Some(id))) => self.traverse(&field.selections, id),
            Ok(Some(None)) => SelectorData::Null,
            Ok(None) => {
                self.is_missing_data = true;
                return;
            }
            Err(e) => {
                warn!(error = %e, "unexpected field kind while reading link");
                self.is_missing_data = true;
                return;
            }
        };
        data.insert(field.response_key().to_string(), value);
    }

    fn read_plural_link(
        &mut self,
        field: &LinkedField,
        record: &Record,
        data: &mut BTreeMap<String, SelectorData>,
    ) {
        let key = field.storage_key(self.variables);
        let value = match record.links(&key) {
            Ok(Some(Some(ids))) => SelectorData::list(
                ids.iter()
                    .map(|id| match id {
                        Some(id) => self.traverse(&field.selections, id),
                        None => SelectorData::Null,
                    })
                    .collect(),
            ),
            Ok(Some(None)) => SelectorData::Null,
            Ok(None) => {
                self.is_missing_data = true;
                return;
            }
            Err(e) => {
                warn!(error = %e, "unexpected field kind while reading links");
                self.is_missing_data = true;
                return;
            }
        };
        data.insert(field.response_key().to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{create_operation_descriptor, ConcreteRequest};
    use crate::node::{Argument, ConcreteNode};
    use normstore_source::{InMemoryRecordSource, MutableRecordSource};
    use normstore_types::FieldValue;
    use serde_json::json;

    fn source() -> InMemoryRecordSource {
        let mut source = InMemoryRecordSource::from_records([
            Record::new("client:root", Some("__Root")).with_field("me", FieldValue::link("4")),
            Record::new("4", Some("User"))
                .with_field("name", FieldValue::scalar("Zuck"))
                .with_field("friends(first:2)", FieldValue::links([Some("5"), None, Some("6")]))
                .with_field("address", FieldValue::Scalar(Value::Null)),
            Record::new("5", Some("User")).with_field("name", FieldValue::scalar("Dustin")),
        ]);
        source.delete(&DataId::from("6"));
        source
    }

    fn query(selections: Vec<Selection>) -> Selector {
        let request = ConcreteRequest::new(ConcreteNode::operation("Q", selections)).unwrap();
        create_operation_descriptor(&request, &Variables::new()).root
    }

    #[test]
    fn reads_nested_data_and_tracks_seen_records() {
        let selector = query(vec![Selection::linked(
            "me",
            vec![
                Selection::scalar("__id"),
                Selection::scalar("name"),
                Selection::plural("friends", vec![Selection::scalar("name")])
                    .with_args(vec![Argument::literal("first", json!(2))]),
                Selection::linked("address", vec![Selection::scalar("city")]),
            ],
        )]);
        let snapshot = read(&source(), &selector);

        assert!(!snapshot.is_missing_data);
        assert_eq!(
            snapshot.data.to_json(),
            json!({"me": {
                "__id": "4",
                "name": "Zuck",
                "friends": [{"name": "Dustin"}, null, null],
                "address": null,
            }})
        );
        let mut seen: Vec<&str> = snapshot.seen_records.iter().map(DataId::as_str).collect();
        seen.sort();
        assert_eq!(seen, vec!["4", "5", "6", "client:root"]);
    }

    #[test]
    fn absent_field_marks_missing() {
        let selector = query(vec![Selection::linked("me", vec![Selection::scalar("email")])]);
        let snapshot = read(&source(), &selector);
        assert!(snapshot.is_missing_data);
        assert_eq!(snapshot.data.to_json(), json!({"me": {}}));
    }

    #[test]
    fn absent_record_marks_missing() {
        let mut source = source();
        source.remove(&DataId::from("4"));
        let selector = query(vec![Selection::linked("me", vec![Selection::scalar("name")])]);
        let snapshot = read(&source, &selector);
        assert!(snapshot.is_missing_data);
        assert!(snapshot.seen_records.contains("4"));
    }

    #[test]
    fn inline_fragment_and_condition() {
        let node = ConcreteNode::operation(
            "Q",
            vec![Selection::linked(
                "me",
                vec![
                    Selection::on_type("Page", vec![Selection::scalar("likes")]),
                    Selection::on_type("User", vec![Selection::scalar("__typename")]),
                    Selection::include_if("withName", vec![Selection::scalar("name").with_alias("label")]),
                ],
            )],
        )
        .with_argument("withName", json!(true));
        let request = ConcreteRequest::new(node).unwrap();
        let selector = create_operation_descriptor(&request, &Variables::new()).root;
        let snapshot = read(&source(), &selector);
        assert!(!snapshot.is_missing_data);
        assert_eq!(snapshot.data.to_json(), json!({"me": {"__typename": "User", "label": "Zuck"}}));
    }

    #[test]
    fn module_import_exposes_document_name() {
        let mut source = source();
        let record = (**source.record(&DataId::from("4")).unwrap())
            .clone()
            .with_field("__module_operation_Profile", FieldValue::scalar("Profile_user"));
        source.insert(record);
        let selector = query(vec![Selection::linked("me", vec![Selection::module("Profile")])]);
        let snapshot = read(&source, &selector);
        assert_eq!(snapshot.data.to_json(), json!({"me": {"__module_operation": "Profile_user"}}));
    }
}
