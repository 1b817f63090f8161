//! Reachability marking for garbage collection.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use normstore_source::RecordSource;
use normstore_types::{DataId, Record, Variables};

use crate::descriptor::Selector;
use crate::loader::OperationLoader;
use crate::node::Selection;

/// Add every identity reachable from `selector` to `references`.
///
/// Identities are added even when no record exists for them, so a link to
/// a record that arrives later keeps it alive once it does. Module imports
/// are followed through `loader`; without one they are skipped.
pub fn mark(
    source: &dyn RecordSource,
    selector: &Selector,
    references: &mut HashSet<DataId>,
    loader: Option<&dyn OperationLoader>,
) {
    let mut marker = Marker {
        source,
        variables: &selector.variables,
        references,
        loader,
    };
    marker.traverse(&selector.node.selections, &selector.data_id);
}

struct Marker<'a> {
    source: &'a dyn RecordSource,
    variables: &'a Variables,
    references: &'a mut HashSet<DataId>,
    loader: Option<&'a dyn OperationLoader>,
}

impl<'a> Marker<'a> {
    fn traverse(&mut self, selections: &[Selection], id: &DataId) {
        self.references.insert(id.clone());
        let source = self.source;
        if let Some(record) = source.record(id) {
            self.mark_selections(selections, record);
        }
    }

    fn mark_selections(&mut self, selections: &[Selection], record: &'a Record) {
        for selection in selections {
            match selection {
                Selection::ScalarField(_) => {}
                Selection::LinkedField(field) => {
                    let key = field.storage_key(self.variables);
                    if field.plural {
                        if let Ok(Some(Some(ids))) = record.links(&key) {
                            for id in ids.iter().flatten() {
                                self.traverse(&field.selections, id);
                            }
                        }
                    } else if let Ok(Some(Some(id))) = record.link(&key) {
                        self.traverse(&field.selections, id);
                    }
                }
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.mark_selections(&condition.selections, record);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if record.typename() == Some(fragment.type_condition.as_str()) {
                        self.mark_selections(&fragment.selections, record);
                    }
                }
                Selection::ModuleImport(import) => {
                    let Some(loader) = self.loader else {
                        warn!(
                            document = %import.document_name,
                            "no operation loader configured; module import not marked"
                        );
                        continue;
                    };
                    if let Ok(Some(Value::String(reference))) = record.scalar(&import.operation_key()) {
                        if let Some(document) = loader.get(reference) {
                            self.mark_selections(&document.selections, record);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{create_operation_descriptor, ConcreteRequest};
    use crate::loader::StaticOperationLoader;
    use crate::node::ConcreteNode;
    use normstore_source::InMemoryRecordSource;
    use normstore_types::FieldValue;

    fn source() -> InMemoryRecordSource {
        InMemoryRecordSource::from_records([
            Record::new("client:root", Some("__Root"))
                .with_field("me", FieldValue::link("4"))
                .with_field("other", FieldValue::link("9")),
            Record::new("4", Some("User"))
                .with_field("friends", FieldValue::links([Some("5"), None, Some("7")]))
                .with_field("__module_operation_Profile", FieldValue::scalar("Profile_user"))
                .with_field("photo", FieldValue::link("8")),
            Record::new("5", Some("User")),
            Record::new("8", Some("Photo")),
            Record::new("9", Some("User")),
        ])
    }

    fn selector(selections: Vec<Selection>) -> Selector {
        let request = ConcreteRequest::new(ConcreteNode::operation("Q", selections)).unwrap();
        create_operation_descriptor(&request, &Variables::new()).root
    }

    fn sorted(references: &HashSet<DataId>) -> Vec<&str> {
        let mut ids: Vec<&str> = references.iter().map(DataId::as_str).collect();
        ids.sort();
        ids
    }

    #[test]
    fn marks_linked_records_including_absent_ones() {
        let selector = selector(vec![Selection::linked(
            "me",
            vec![Selection::plural("friends", vec![Selection::scalar("name")])],
        )]);
        let mut references = HashSet::new();
        mark(&source(), &selector, &mut references, None);
        assert_eq!(sorted(&references), vec!["4", "5", "7", "client:root"]);
    }

    #[test]
    fn module_import_followed_only_with_loader() {
        let selector = selector(vec![Selection::linked("me", vec![Selection::module("Profile")])]);

        let mut without = HashSet::new();
        mark(&source(), &selector, &mut without, None);
        assert_eq!(sorted(&without), vec!["4", "client:root"]);

        let mut loader = StaticOperationLoader::new();
        loader
            .register(ConcreteNode::fragment(
                "Profile_user",
                vec![Selection::linked("photo", vec![Selection::scalar("uri")])],
            ))
            .unwrap();
        let mut with = HashSet::new();
        mark(&source(), &selector, &mut with, Some(&loader));
        assert_eq!(sorted(&with), vec!["4", "8", "client:root"]);
    }

    #[test]
    fn unmatched_type_condition_is_skipped() {
        let selector = selector(vec![Selection::linked(
            "me",
            vec![Selection::on_type(
                "Page",
                vec![Selection::linked("photo", vec![Selection::scalar("uri")])],
            )],
        )]);
        let mut references = HashSet::new();
        mark(&source(), &selector, &mut references, None);
        assert!(!references.contains("8"));
    }

    #[test]
    fn matched_type_condition_is_followed() {
        let selector = selector(vec![Selection::linked(
            "me",
            vec![Selection::on_type(
                "User",
                vec![Selection::linked("photo", vec![Selection::scalar("uri")])],
            )],
        )]);
        let mut references = HashSet::new();
        mark(&source(), &selector, &mut references, None);
        assert_eq!(sorted(&references), vec!["4", "8", "client:root"]);
    }
}
