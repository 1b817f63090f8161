//! Copy-on-write overlay for optimistic writes.
//!
//! [`OptimisticRecordSource`] pairs a read-only base with a writable sink.
//! Lookups consult the sink first and fall through to the base; every write,
//! tombstones included, lands in the sink. Discarding the sink rolls the
//! overlay back without any per-record work.

use std::collections::HashSet;
use std::sync::Arc;

use normstore_types::{DataId, Record};

use crate::memory::InMemoryRecordSource;
use crate::traits::{MutableRecordSource, RecordSlot, RecordSource};

/// Overlay of a writable sink over a base source.
pub struct OptimisticRecordSource<'a> {
    base: &'a dyn RecordSource,
    sink: &'a mut InMemoryRecordSource,
}

impl<'a> OptimisticRecordSource<'a> {
    pub fn new(base: &'a dyn RecordSource, sink: &'a mut InMemoryRecordSource) -> Self {
        Self { base, sink }
    }
}

impl RecordSource for OptimisticRecordSource<'_> {
    fn get(&self, id: &DataId) -> Option<&RecordSlot> {
        match self.sink.get(id) {
            Some(slot) => Some(slot),
            None => self.base.get(id),
        }
    }

    fn record_ids(&self) -> Vec<DataId> {
        let mut seen: HashSet<DataId> = self.base.record_ids().into_iter().collect();
        seen.extend(self.sink.record_ids());
        seen.into_iter().collect()
    }

    fn len(&self) -> usize {
        let base_only = self
            .base
            .record_ids()
            .into_iter()
            .filter(|id| !self.sink.has(id))
            .count();
        base_only + self.sink.len()
    }
}

impl MutableRecordSource for OptimisticRecordSource<'_> {
    fn set(&mut self, id: DataId, record: Arc<Record>) {
        self.sink.set(id, record);
    }

    fn delete(&mut self, id: &DataId) {
        self.sink.delete(id);
    }

    /// Forget a sink entry. A base record under the same identity becomes
    /// visible again.
    fn remove(&mut self, id: &DataId) {
        self.sink.remove(id);
    }

    /// Shadow every base identity with a tombstone; the base is untouched.
    fn clear(&mut self) {
        self.sink.clear();
        for id in self.base.record_ids() {
            self.sink.delete(&id);
        }
    }
}

/// Read-only two-level view, used when no write access is needed.
pub struct OverlayView<'a> {
    pub base: &'a dyn RecordSource,
    pub sink: &'a InMemoryRecordSource,
}

impl RecordSource for OverlayView<'_> {
    fn get(&self, id: &DataId) -> Option<&RecordSlot> {
        self.sink.get(id).or_else(|| self.base.get(id))
    }

    fn record_ids(&self) -> Vec<DataId> {
        let mut seen: HashSet<DataId> = self.base.record_ids().into_iter().collect();
        seen.extend(self.sink.record_ids());
        seen.into_iter().collect()
    }

    fn len(&self) -> usize {
        self.record_ids().len()
    }
}
