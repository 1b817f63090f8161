use std::collections::HashSet;

use normstore_types::{DataId, SelectorData};

use crate::descriptor::Selector;

/// Point-in-time result of reading a selector.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub data: SelectorData,
    pub selector: Selector,
    /// Every identity touched while reading, present or not.
    pub seen_records: HashSet<DataId>,
    pub is_missing_data: bool,
}

impl Snapshot {
    /// Returns `true` if any of `ids` was touched by this read.
    pub fn has_seen_any<'a>(&self, ids: impl IntoIterator<Item = &'a DataId>) -> bool {
        ids.into_iter().any(|id| self.seen_records.contains(id))
    }
}
