use std::sync::Arc;

use normstore_types::{DataId, Record};

/// Contents of one entry in a record source.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordSlot {
    /// The entity exists with these fields.
    Present(Arc<Record>),
    /// The entity was deleted on purpose and reads as null.
    Tombstone,
}

impl RecordSlot {
    /// The record, unless this slot is a tombstone.
    pub fn record(&self) -> Option<&Arc<Record>> {
        match self {
            RecordSlot::Present(record) => Some(record),
            RecordSlot::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordSlot::Tombstone)
    }
}

/// Three-way state of an identity in a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// A record is present.
    Existent,
    /// A tombstone is present.
    Nonexistent,
    /// Nothing is known about the identity.
    Unknown,
}

/// Read access to a table of records.
///
/// Implementations must keep tombstones distinct from absence: `get`
/// returns `Some(RecordSlot::Tombstone)` for a deleted identity and `None`
/// for one that was never written.
pub trait RecordSource: Send + Sync {
    /// Look up the slot for an identity.
    fn get(&self, id: &DataId) -> Option<&RecordSlot>;

    /// Every identity with a slot (records and tombstones), in no
    /// particular order.
    fn record_ids(&self) -> Vec<DataId>;

    /// Number of slots, tombstones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The record for an identity, if one is present.
    fn record(&self, id: &DataId) -> Option<&Arc<Record>> {
        self.get(id).and_then(RecordSlot::record)
    }

    fn status(&self, id: &DataId) -> RecordStatus {
        match self.get(id) {
            Some(RecordSlot::Present(_)) => RecordStatus::Existent,
            Some(RecordSlot::Tombstone) => RecordStatus::Nonexistent,
            None => RecordStatus::Unknown,
        }
    }

    /// Returns `true` if the identity has a record or a tombstone.
    fn has(&self, id: &DataId) -> bool {
        self.get(id).is_some()
    }
}

/// Write access to a table of records.
pub trait MutableRecordSource: RecordSource {
    /// Store a record under `id`, replacing any previous slot.
    fn set(&mut self, id: DataId, record: Arc<Record>);

    /// Replace the slot for `id` with a tombstone.
    fn delete(&mut self, id: &DataId);

    /// Forget `id` entirely; it becomes absent.
    fn remove(&mut self, id: &DataId);

    /// Forget every identity.
    fn clear(&mut self);
}
