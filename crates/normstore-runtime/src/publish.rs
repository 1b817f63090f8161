//! Merging record deltas into the write target.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use normstore_source::{
    InMemoryRecordSource, MutableRecordSource, OptimisticRecordSource, RecordSlot, RecordSource,
};
use normstore_types::{DataId, Epoch, Record};

use crate::event::StoreEvent;
use crate::state::StoreState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Merged {
    updated: usize,
    invalidated: usize,
}

impl StoreState {
    /// Merge `delta` into the overlay if one is open, else into the base.
    ///
    /// Ids in `invalidated_ids` are stamped with the epoch the next notify
    /// will produce. Neither the epoch nor any subscriber is touched here.
    pub(crate) fn publish(
        &mut self,
        delta: &InMemoryRecordSource,
        invalidated_ids: Option<&HashSet<DataId>>,
    ) -> StoreEvent {
        let stamp = self.current_write_epoch.next();
        let StoreState {
            base,
            optimistic,
            updated_ids,
            invalidated_ids: batch_invalidated,
            ..
        } = self;
        let optimistic_open = optimistic.is_some();
        let merged = match optimistic.as_mut() {
            Some(sink) => {
                let mut target = OptimisticRecordSource::new(&*base, sink);
                merge_delta(&mut target, delta, invalidated_ids, stamp, updated_ids, batch_invalidated)
            }
            None => merge_delta(base, delta, invalidated_ids, stamp, updated_ids, batch_invalidated),
        };
        debug!(
            updated = merged.updated,
            invalidated = merged.invalidated,
            optimistic = optimistic_open,
            "published delta"
        );
        StoreEvent::Publish {
            updated: merged.updated,
            invalidated: merged.invalidated,
            optimistic: optimistic_open,
        }
    }
}

fn merge_delta<T: MutableRecordSource + ?Sized>(
    target: &mut T,
    delta: &InMemoryRecordSource,
    invalidated_ids: Option<&HashSet<DataId>>,
    stamp: Epoch,
    updated_ids: &mut HashSet<DataId>,
    batch_invalidated: &mut HashSet<DataId>,
) -> Merged {
    let mut merged = Merged::default();

    for id in invalidated_ids.into_iter().flatten() {
        let delta_slot = delta.get(id);
        if matches!(delta_slot, Some(RecordSlot::Tombstone)) {
            continue;
        }
        let current = target
            .record(id)
            .or_else(|| delta_slot.and_then(RecordSlot::record));
        let stamped = match current {
            Some(record) if record.invalidated_at() == Some(stamp) => None,
            Some(record) => Some((**record).clone().with_invalidated_at(stamp)),
            None => continue,
        };
        if let Some(stamped) = stamped {
            target.set(id.clone(), Arc::new(stamped));
        }
        batch_invalidated.insert(id.clone());
        merged.invalidated += 1;
    }

    for (id, slot) in delta.iter() {
        match slot {
            RecordSlot::Present(next) => {
                let replacement = match target.record(id) {
                    Some(prev) => {
                        let result = Record::merged(prev, next);
                        (!Arc::ptr_eq(&result, prev)).then_some(result)
                    }
                    None => Some(Arc::clone(next)),
                };
                if let Some(record) = replacement {
                    target.set(id.clone(), record);
                    updated_ids.insert(id.clone());
                    merged.updated += 1;
                }
            }
            RecordSlot::Tombstone => {
                let existed = target.record(id).is_some();
                target.delete(id);
                if existed {
                    updated_ids.insert(id.clone());
                    merged.updated += 1;
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::StoreConfig;
    use normstore_types::FieldValue;
    use proptest::prelude::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Merge semantics
    // -----------------------------------------------------------------------

    #[test]
    fn new_records_are_inserted_and_marked_updated() {
        let mut state = state();
        let delta = user_payload("4", "Zuck");
        state.publish(&delta, None);
        assert!(state.base.record(&DataId::from("4")).is_some());
        assert!(state.updated_ids.contains("4"));
        assert!(state.updated_ids.contains("client:root"));
        assert_eq!(state.current_write_epoch, Epoch::ZERO);
    }

    #[test]
    fn identical_publish_is_idempotent() {
        let mut state = state();
        let delta = user_payload("4", "Zuck");
        state.publish(&delta, None);
        let before = state.base.clone();
        let record_before = Arc::clone(state.base.record(&DataId::from("4")).unwrap());
        state.updated_ids.clear();

        let event = state.publish(&delta, None);
        assert!(state.updated_ids.is_empty());
        assert_eq!(
            event,
            StoreEvent::Publish {
                updated: 0,
                invalidated: 0,
                optimistic: false
            }
        );
        assert!(Arc::ptr_eq(&record_before, state.base.record(&DataId::from("4")).unwrap()));
        assert_eq!(state.base, before);
    }

    #[test]
    fn changed_field_replaces_record() {
        let mut state = state();
        state.publish(&user_payload("4", "Zuck"), None);
        let old = Arc::clone(state.base.record(&DataId::from("4")).unwrap());
        state.updated_ids.clear();

        let delta = InMemoryRecordSource::from_records([user("4", "Mark")]);
        state.publish(&delta, None);
        let new = state.base.record(&DataId::from("4")).unwrap();
        assert!(!Arc::ptr_eq(&old, new));
        assert_eq!(new.scalar("name").unwrap(), Some(&json!("Mark")));
        assert_eq!(old.scalar("name").unwrap(), Some(&json!("Zuck")));
        assert_eq!(state.updated_ids.len(), 1);
    }

    #[test]
    fn tombstone_deletes_and_marks_only_existing() {
        let mut state = state();
        state.publish(&user_payload("4", "Zuck"), None);
        state.updated_ids.clear();

        let mut delta = InMemoryRecordSource::new();
        delta.delete(&DataId::from("4"));
        delta.delete(&DataId::from("never"));
        state.publish(&delta, None);

        assert!(state.base.get(&DataId::from("4")).unwrap().is_tombstone());
        assert!(state.updated_ids.contains("4"));
        assert!(!state.updated_ids.contains("never"));
    }

    // -----------------------------------------------------------------------
    // Invalidation stamping
    // -----------------------------------------------------------------------

    #[test]
    fn invalidated_ids_are_stamped_with_next_epoch() {
        let mut state = state();
        state.publish(&user_payload("4", "Zuck"), None);
        state.current_write_epoch = Epoch::new(3);
        state.updated_ids.clear();

        let ids: HashSet<DataId> = [DataId::from("4"), DataId::from("ghost")].into();
        state.publish(&InMemoryRecordSource::new(), Some(&ids));

        let record = state.base.record(&DataId::from("4")).unwrap();
        assert_eq!(record.invalidated_at(), Some(Epoch::new(4)));
        assert!(state.invalidated_ids.contains("4"));
        assert!(!state.invalidated_ids.contains("ghost"));
        assert!(state.updated_ids.is_empty());
    }

    #[test]
    fn invalidating_a_record_only_in_the_delta() {
        let mut state = state();
        let delta = InMemoryRecordSource::from_records([user("7", "New")]);
        let ids: HashSet<DataId> = [DataId::from("7")].into();
        state.publish(&delta, Some(&ids));
        let record = state.base.record(&DataId::from("7")).unwrap();
        assert_eq!(record.invalidated_at(), Some(Epoch::new(1)));
        assert_eq!(record.scalar("name").unwrap(), Some(&json!("New")));
    }

    #[test]
    fn tombstoned_invalidation_is_not_counted() {
        let mut state = state();
        state.publish(&user_payload("4", "Zuck"), None);
        let mut delta = InMemoryRecordSource::new();
        delta.delete(&DataId::from("4"));
        let ids: HashSet<DataId> = [DataId::from("4")].into();
        state.publish(&delta, Some(&ids));
        assert!(state.invalidated_ids.is_empty());
    }

    // -----------------------------------------------------------------------
    // Overlay
    // -----------------------------------------------------------------------

    #[test]
    fn writes_go_to_overlay_when_open() {
        let mut state = state();
        state.publish(&user_payload("4", "Zuck"), None);
        state.optimistic = Some(InMemoryRecordSource::new());

        let delta = InMemoryRecordSource::from_records([user("4", "Optimistic")]);
        let event = state.publish(&delta, None);
        assert!(matches!(event, StoreEvent::Publish { optimistic: true, .. }));

        let base = state.base.record(&DataId::from("4")).unwrap();
        assert_eq!(base.scalar("name").unwrap(), Some(&json!("Zuck")));
        let sink = state.optimistic.as_ref().unwrap().record(&DataId::from("4")).unwrap();
        assert_eq!(sink.scalar("name").unwrap(), Some(&json!("Optimistic")));
        // Fields not in the delta are carried over from the base.
        assert_eq!(sink.scalar("id").unwrap(), Some(&json!("4")));
    }

    fn state() -> StoreState {
        StoreState::new(StoreConfig::default(), InMemoryRecordSource::new())
    }

    proptest! {
        #[test]
        fn publishing_twice_changes_nothing_the_second_time(
            names in proptest::collection::btree_map("[a-e]", "[a-z]{1,4}", 1..6),
        ) {
            let mut state = state();
            let delta = InMemoryRecordSource::from_records(
                names.iter().map(|(id, name)| {
                    Record::new(id.as_str(), Some("User")).with_field("name", FieldValue::scalar(name.as_str()))
                }),
            );
            state.publish(&delta, None);
            let before = state.base.clone();
            state.updated_ids.clear();
            state.publish(&delta, None);
            prop_assert!(state.updated_ids.is_empty());
            prop_assert_eq!(&state.base, &before);
        }
    }
}
