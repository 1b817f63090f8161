//! Captured invalidation state and its comparison.

use std::collections::BTreeMap;

use serde::Serialize;

use normstore_source::RecordSource;
use normstore_types::{DataId, Epoch};

use crate::state::StoreState;

/// Invalidation epochs captured at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidationState {
    /// Per-record `invalidated_at` at capture time.
    pub data_ids: BTreeMap<DataId, Option<Epoch>>,
    /// The store-wide invalidation epoch at capture time.
    pub invalidations: Option<Epoch>,
}

impl StoreState {
    pub(crate) fn lookup_invalidation_state(
        &self,
        data_ids: impl IntoIterator<Item = DataId>,
    ) -> InvalidationState {
        let source = self.effective();
        let data_ids = data_ids
            .into_iter()
            .map(|id| {
                let at = source.record(&id).and_then(|record| record.invalidated_at());
                (id, at)
            })
            .collect();
        InvalidationState {
            data_ids,
            invalidations: self.global_invalidation_epoch,
        }
    }

    pub(crate) fn check_invalidation_state(&self, previous: &InvalidationState) -> bool {
        let current = self.lookup_invalidation_state(previous.data_ids.keys().cloned());
        current != *previous
    }
}
