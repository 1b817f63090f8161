//! Optimistic transactions.
//!
//! While a snapshot is open every publish lands in a throwaway overlay and
//! the base source is left alone. Restoring discards the overlay; any
//! subscriber that saw optimistic data is flagged stale so the next notify
//! brings it back to base data.

use tracing::debug;

use normstore_selector::Snapshot;
use normstore_source::{InMemoryRecordSource, RecordSource};
use normstore_types::recycle_nodes_into;

use crate::error::{StoreError, StoreResult};
use crate::event::StoreEvent;
use crate::state::{Collaborators, Effects, StoreState};

impl StoreState {
    pub(crate) fn open_snapshot(
        &mut self,
        collaborators: &Collaborators,
        effects: &mut Effects,
    ) -> StoreResult<()> {
        if self.optimistic.is_some() {
            return Err(StoreError::SnapshotAlreadyOpen);
        }
        for subscription in self.subscriptions.values_mut() {
            let backup = if subscription.stale {
                let fresh = collaborators
                    .reader
                    .read(&self.base, &subscription.snapshot.selector);
                let data = recycle_nodes_into(&subscription.snapshot.data, fresh.data);
                Snapshot { data, ..fresh }
            } else {
                subscription.snapshot.clone()
            };
            subscription.backup = Some(backup);
        }
        self.gc.cancel();
        self.optimistic = Some(InMemoryRecordSource::new());
        debug!(subscriptions = self.subscriptions.len(), "optimistic snapshot opened");
        effects.events.push(StoreEvent::Snapshot);
        Ok(())
    }

    pub(crate) fn restore_snapshot(&mut self, effects: &mut Effects) -> StoreResult<()> {
        let Some(overlay) = self.optimistic.take() else {
            return Err(StoreError::NoSnapshotToRestore);
        };
        let mut stale = 0;
        for subscription in self.subscriptions.values_mut() {
            let unchanged = subscription
                .backup
                .as_ref()
                .is_some_and(|backup| backup.data.same_identity(&subscription.snapshot.data));
            if unchanged {
                subscription.backup = None;
                continue;
            }
            // Until the next notify, overlap is judged against what the
            // base-side read saw, not the optimistic one.
            if let Some(backup) = &subscription.backup {
                subscription.snapshot.seen_records = backup.seen_records.clone();
                subscription.snapshot.is_missing_data = backup.is_missing_data;
                subscription.snapshot.selector = backup.selector.clone();
            }
            subscription.stale = true;
            stale += 1;
        }
        debug!(discarded = overlay.len(), stale, "optimistic snapshot restored");
        effects.events.push(StoreEvent::Restore);
        effects.gc_generation = self.gc.resume();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use crate::{CheckOptions, OperationAvailability, StoreConfig, StoreError};
    use normstore_source::{InMemoryRecordSource, RecordSource};
    use normstore_types::{DataId, FieldValue};
    use serde_json::json;
    use std::sync::Arc;

    fn populated() -> crate::Store {
        let store = store_with(StoreConfig::default());
        store.publish(&user_payload("4", "Zuck"), None).unwrap();
        store.notify(None, false).unwrap();
        store
    }

    #[test]
    fn protocol_violations_are_errors() {
        let store = populated();
        assert_eq!(store.restore().unwrap_err(), StoreError::NoSnapshotToRestore);
        store.snapshot().unwrap();
        assert!(store.is_optimistic().unwrap());
        assert_eq!(store.snapshot().unwrap_err(), StoreError::SnapshotAlreadyOpen);
        store.restore().unwrap();
        assert!(!store.is_optimistic().unwrap());
    }

    #[test]
    fn round_trip_without_writes_changes_nothing() {
        let store = populated();
        let (calls, callback) = recorder();
        let snapshot = store.lookup(&user_operation("4").root).unwrap();
        let data = snapshot.data.clone();
        let _sub = store.subscribe(snapshot, callback).unwrap();
        let before = store.effective_source().unwrap();

        store.snapshot().unwrap();
        store.restore().unwrap();

        assert_eq!(store.effective_source().unwrap(), before);
        store.notify(None, false).unwrap();
        assert!(calls.lock().unwrap().is_empty());
        let current = store.lookup(&user_operation("4").root).unwrap();
        assert_eq!(current.data, data);
    }

    #[test]
    fn optimistic_writes_are_visible_then_rolled_back() {
        let store = populated();
        let (calls, callback) = recorder();
        let _sub = store
            .subscribe(store.lookup(&user_operation("4").root).unwrap(), callback)
            .unwrap();

        store.snapshot().unwrap();
        store
            .publish(&InMemoryRecordSource::from_records([user("4", "Optimistic")]), None)
            .unwrap();
        store.notify(None, false).unwrap();
        assert_eq!(calls.lock().unwrap()[0]["node"]["name"], json!("Optimistic"));
        store.with_effective_source(|source| {
            let record = source.record(&DataId::from("4")).unwrap();
            assert_eq!(record.scalar("name").unwrap(), Some(&json!("Optimistic")));
        })
        .unwrap();

        store.restore().unwrap();
        let base_name = store
            .with_effective_source(|source| {
                source.record(&DataId::from("4")).unwrap().scalar("name").unwrap().cloned()
            })
            .unwrap();
        assert_eq!(base_name, Some(json!("Zuck")));

        // No overlapping update: the stale subscriber gets its backup.
        let owners = store.notify(None, false).unwrap();
        assert_eq!(owners, vec![user_operation("4").request]);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["node"]["name"], json!("Zuck"));
    }

    #[test]
    fn subscription_made_during_transaction_is_stale_after_restore() {
        let store = populated();
        store.snapshot().unwrap();
        store
            .publish(&InMemoryRecordSource::from_records([user("4", "Optimistic")]), None)
            .unwrap();
        store.notify(None, false).unwrap();
        let (calls, callback) = recorder();
        let _sub = store
            .subscribe(store.lookup(&user_operation("4").root).unwrap(), callback)
            .unwrap();
        store.restore().unwrap();

        store.notify(None, false).unwrap();
        assert_eq!(calls.lock().unwrap()[0]["node"]["name"], json!("Zuck"));
    }

    /// Optimistically repoint `node(id: "4")` at user 5 and let the
    /// subscriber see it.
    fn repoint_optimistically(store: &crate::Store) {
        store.snapshot().unwrap();
        let root = root_with_node("4").with_field(node_key("4"), FieldValue::link("5"));
        store
            .publish(&InMemoryRecordSource::from_records([root, user("5", "Dustin")]), None)
            .unwrap();
        store.notify(None, false).unwrap();
    }

    #[test]
    fn base_write_after_restore_reaches_subscriber() {
        let store = populated();
        let (calls, callback) = recorder();
        let _sub = store
            .subscribe(store.lookup(&user_operation("4").root).unwrap(), callback)
            .unwrap();

        repoint_optimistically(&store);
        assert_eq!(calls.lock().unwrap()[0]["node"]["name"], json!("Dustin"));
        store.restore().unwrap();

        // Record 4 was only read before the transaction.
        store
            .publish(&InMemoryRecordSource::from_records([user("4", "Mark")]), None)
            .unwrap();
        store.notify(None, false).unwrap();

        let current = store.lookup(&user_operation("4").root).unwrap();
        assert_eq!(current.data.to_json(), json!({"node": {"id": "4", "name": "Mark"}}));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], current.data.to_json());
    }

    #[test]
    fn base_write_after_restore_to_optimistic_only_record_keeps_backup() {
        let store = populated();
        let (calls, callback) = recorder();
        let _sub = store
            .subscribe(store.lookup(&user_operation("4").root).unwrap(), callback)
            .unwrap();

        repoint_optimistically(&store);
        store.restore().unwrap();
        store
            .publish(&InMemoryRecordSource::from_records([user("5", "Someone")]), None)
            .unwrap();
        store.notify(None, false).unwrap();

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(calls.lock().unwrap()[1], json!({"node": {"id": "4", "name": "Zuck"}}));

        // The adopted backup still tracks record 4.
        store
            .publish(&InMemoryRecordSource::from_records([user("4", "Mark")]), None)
            .unwrap();
        store.notify(None, false).unwrap();
        assert_eq!(
            calls.lock().unwrap().last(),
            Some(&json!({"node": {"id": "4", "name": "Mark"}}))
        );
    }

    #[test]
    fn checks_see_the_overlay() {
        let store = store_with(StoreConfig::default());
        let op = user_operation("4");
        store.snapshot().unwrap();
        store.publish(&user_payload("4", "Optimistic"), None).unwrap();
        assert!(matches!(
            store.check(&op, CheckOptions::default()).unwrap(),
            OperationAvailability::Available { .. }
        ));
        store.restore().unwrap();
        assert_eq!(store.check(&op, CheckOptions::default()).unwrap(), OperationAvailability::Missing);
    }

    #[test]
    fn effective_source_shares_records_with_the_base() {
        let store = populated();
        let copy = store.effective_source().unwrap();
        store
            .with_effective_source(|source| {
                let id = DataId::from("4");
                assert!(Arc::ptr_eq(copy.record(&id).unwrap(), source.record(&id).unwrap()));
            })
            .unwrap();
    }
}
