//! Structured store events for an optional log sink.

use std::sync::Arc;

use serde::Serialize;

use normstore_selector::RequestIdentifier;
use normstore_types::{DataId, Epoch};

/// Something the store did. Delivered to the sink installed with
/// [`StoreBuilder::log`](crate::StoreBuilder::log) after the operation
/// completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    Publish {
        updated: usize,
        invalidated: usize,
        optimistic: bool,
    },
    NotifyStart {
        epoch: Epoch,
        invalidate_store: bool,
        source_operation: Option<RequestIdentifier>,
    },
    NotifyComplete {
        epoch: Epoch,
        updated_ids: Vec<DataId>,
        invalidated_ids: Vec<DataId>,
        affected: Vec<RequestIdentifier>,
    },
    Gc {
        reachable: usize,
        removed: usize,
    },
    Snapshot,
    Restore,
    Lookup {
        data_id: DataId,
        is_missing_data: bool,
    },
}

/// Receiver of [`StoreEvent`]s.
pub type LogSink = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

pub(crate) fn sorted(ids: &std::collections::HashSet<DataId>) -> Vec<DataId> {
    let mut ids: Vec<DataId> = ids.iter().cloned().collect();
    ids.sort();
    ids
}
