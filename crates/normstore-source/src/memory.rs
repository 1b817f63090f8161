use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use normstore_types::{DataId, Record, ROOT_ID, ROOT_TYPE};

use crate::traits::{MutableRecordSource, RecordSlot, RecordSource};

/// In-memory, `HashMap`-based record source.
///
/// Used both as the store's base table and as the delta handed to
/// `publish`. Cloning is shallow: records are shared, not copied.
///
/// The JSON form is an object from identity to record, with `null` for a
/// tombstone.
#[derive(Clone, Default, PartialEq)]
pub struct InMemoryRecordSource {
    records: HashMap<DataId, RecordSlot>,
}

impl InMemoryRecordSource {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding only the empty root record.
    pub fn with_root() -> Self {
        let mut source = Self::new();
        source.set(DataId::root(), Arc::new(Record::new(ROOT_ID, Some(ROOT_TYPE))));
        source
    }

    /// Build a source from records, keyed by their own identities.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut source = Self::new();
        for record in records {
            source.insert(record);
        }
        source
    }

    /// Store a record under its own identity.
    pub fn insert(&mut self, record: Record) {
        let id = record.id().clone();
        self.set(id, Arc::new(record));
    }

    /// Iterate over every slot.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, &RecordSlot)> {
        self.records.iter()
    }

    /// Number of present records (tombstones excluded).
    pub fn record_count(&self) -> usize {
        self.records.values().filter(|slot| !slot.is_tombstone()).count()
    }

    /// Return a sorted list of all identities in the source.
    pub fn sorted_ids(&self) -> Vec<DataId> {
        let mut ids: Vec<DataId> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy every slot of another source into a new table.
    pub fn materialize(source: &dyn RecordSource) -> Self {
        let mut records = HashMap::with_capacity(source.len());
        for id in source.record_ids() {
            if let Some(slot) = source.get(&id) {
                records.insert(id, slot.clone());
            }
        }
        Self { records }
    }
}

impl RecordSource for InMemoryRecordSource {
    fn get(&self, id: &DataId) -> Option<&RecordSlot> {
        self.records.get(id)
    }

    fn record_ids(&self) -> Vec<DataId> {
        self.records.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

impl MutableRecordSource for InMemoryRecordSource {
    fn set(&mut self, id: DataId, record: Arc<Record>) {
        self.records.insert(id, RecordSlot::Present(record));
    }

    fn delete(&mut self, id: &DataId) {
        self.records.insert(id.clone(), RecordSlot::Tombstone);
    }

    fn remove(&mut self, id: &DataId) {
        self.records.remove(id);
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

impl fmt::Debug for InMemoryRecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecordSource")
            .field("record_count", &self.record_count())
            .field("slot_count", &self.records.len())
            .finish()
    }
}

impl Serialize for InMemoryRecordSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ordered: BTreeMap<&DataId, Option<&Record>> = self
            .records
            .iter()
            .map(|(id, slot)| (id, slot.record().map(|r| &**r)))
            .collect();
        ordered.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InMemoryRecordSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<DataId, Option<Record>>::deserialize(deserializer)?;
        let mut source = InMemoryRecordSource::new();
        for (id, record) in raw {
            match record {
                Some(record) if record.id() != &id => {
                    return Err(D::Error::custom(format!(
                        "record keyed {id} carries __id {}",
                        record.id()
                    )));
                }
                Some(record) => source.set(id, Arc::new(record)),
                None => source.delete(&id),
            }
        }
        Ok(source)
    }
}
