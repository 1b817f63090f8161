//! Subscription bookkeeping and the notify pass.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use normstore_selector::{OperationDescriptor, RequestDescriptor, RequestIdentifier, Snapshot};
use normstore_source::RecordSource;
use normstore_types::{recycle_nodes_into, DataId};

use crate::event::{sorted, StoreEvent};
use crate::state::{Collaborators, Effects, StoreState};
use crate::traits::SnapshotReader;

/// Receives a fresh snapshot when a subscription's data may have changed.
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Fires when a watched identity, or the whole store, is invalidated.
pub type InvalidationCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct Subscription {
    pub(crate) snapshot: Snapshot,
    pub(crate) callback: SnapshotCallback,
    pub(crate) stale: bool,
    /// Base-side data captured when an optimistic snapshot was opened.
    pub(crate) backup: Option<Snapshot>,
}

pub(crate) struct InvalidationSubscription {
    pub(crate) data_ids: HashSet<DataId>,
    pub(crate) callback: InvalidationCallback,
}

impl StoreState {
    pub(crate) fn add_subscription(&mut self, snapshot: Snapshot, callback: SnapshotCallback) -> u64 {
        let id = self.next_subscription_id();
        self.subscriptions.insert(
            id,
            Subscription {
                snapshot,
                callback,
                stale: false,
                backup: None,
            },
        );
        id
    }

    pub(crate) fn add_invalidation_subscription(
        &mut self,
        data_ids: HashSet<DataId>,
        callback: InvalidationCallback,
    ) -> u64 {
        let id = self.next_subscription_id();
        self.invalidation_subscriptions
            .insert(id, InvalidationSubscription { data_ids, callback });
        id
    }

    /// Advance the write epoch and work out who needs to hear about the
    /// batch accumulated since the previous notify.
    pub(crate) fn notify(
        &mut self,
        collaborators: &Collaborators,
        source_operation: Option<&OperationDescriptor>,
        invalidate_store: bool,
        effects: &mut Effects,
    ) -> Vec<RequestDescriptor> {
        self.current_write_epoch = self.current_write_epoch.next();
        let epoch = self.current_write_epoch;
        if invalidate_store {
            self.global_invalidation_epoch = Some(epoch);
        }
        effects.events.push(StoreEvent::NotifyStart {
            epoch,
            invalidate_store,
            source_operation: source_operation.map(|op| op.identifier().clone()),
        });

        let mut owners = Vec::new();
        let mut seen_owners: HashSet<RequestIdentifier> = HashSet::new();
        {
            let source = crate::state::EffectiveSource::new(&self.base, self.optimistic.as_ref());
            for subscription in self.subscriptions.values_mut() {
                let Some(next) =
                    update_subscription(subscription, &source, &self.updated_ids, collaborators.reader.as_ref())
                else {
                    continue;
                };
                let owner = &next.selector.owner;
                if seen_owners.insert(owner.identifier.clone()) {
                    owners.push(owner.clone());
                }
                effects
                    .snapshot_callbacks
                    .push((Arc::clone(&subscription.callback), next));
            }
        }

        for subscription in self.invalidation_subscriptions.values() {
            let fires = invalidate_store
                || subscription
                    .data_ids
                    .iter()
                    .any(|id| self.invalidated_ids.contains(id));
            if fires {
                effects
                    .invalidation_callbacks
                    .push(Arc::clone(&subscription.callback));
            }
        }

        effects.events.push(StoreEvent::NotifyComplete {
            epoch,
            updated_ids: sorted(&self.updated_ids),
            invalidated_ids: sorted(&self.invalidated_ids),
            affected: owners.iter().map(|o| o.identifier.clone()).collect(),
        });
        debug!(
            %epoch,
            updated = self.updated_ids.len(),
            invalidated = self.invalidated_ids.len(),
            affected = owners.len(),
            "notified"
        );
        self.updated_ids.clear();
        self.invalidated_ids.clear();

        if let Some(operation) = source_operation {
            if let Some(entry) = self.roots.get_mut(operation.identifier()) {
                entry.epoch = Some(epoch);
                if entry.fetch_time.is_none() {
                    entry.fetch_time = Some(collaborators.clock.now());
                }
            }
        }

        owners
    }
}

/// Refresh one subscription if the batch touched it or it was flagged
/// stale. Returns the snapshot to deliver.
fn update_subscription(
    subscription: &mut Subscription,
    source: &dyn RecordSource,
    updated_ids: &HashSet<DataId>,
    reader: &dyn SnapshotReader,
) -> Option<Snapshot> {
    let overlapping = !updated_ids.is_empty() && subscription.snapshot.has_seen_any(updated_ids);
    if !subscription.stale && !overlapping {
        return None;
    }
    let adopted = if overlapping {
        None
    } else {
        subscription.backup.take()
    };
    let next = match adopted {
        Some(backup) => backup,
        None => reader.read(source, &subscription.snapshot.selector),
    };
    let data = recycle_nodes_into(&subscription.snapshot.data, next.data);
    let next = Snapshot { data, ..next };
    subscription.snapshot = next.clone();
    subscription.stale = false;
    Some(next)
}
