//! Mark-and-sweep collection of unreachable records.
//!
//! Collection is requested whenever a root entry is deleted and runs later
//! through the scheduler. Holds and open snapshots defer it; every
//! deferral is remembered so a collection still happens afterwards.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use normstore_source::{MutableRecordSource, RecordSource};
use normstore_types::DataId;

use crate::event::StoreEvent;
use crate::state::{Collaborators, Effects, StoreState};

/// What a call to [`Store::gc`](crate::Store::gc) did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GcOutcome {
    /// An optimistic snapshot is open; collection will run after restore.
    Deferred,
    Collected { reachable: usize, removed: usize },
}

#[derive(Debug, Default)]
pub(crate) struct GcState {
    holds: usize,
    scheduled: bool,
    wanted: bool,
    /// Bumped whenever a scheduled task is superseded.
    generation: u64,
}

impl GcState {
    /// Ask for a collection. Returns the generation of a task to schedule,
    /// if one is needed.
    pub(crate) fn request(&mut self) -> Option<u64> {
        if self.holds > 0 {
            self.wanted = true;
            return None;
        }
        if self.scheduled {
            return None;
        }
        self.scheduled = true;
        self.generation += 1;
        Some(self.generation)
    }

    /// Invalidate a scheduled task, remembering that it is still wanted.
    pub(crate) fn cancel(&mut self) {
        if self.scheduled {
            self.scheduled = false;
            self.generation += 1;
            self.wanted = true;
        }
    }

    pub(crate) fn hold(&mut self) {
        self.holds += 1;
        self.cancel();
    }

    pub(crate) fn release_hold(&mut self) -> Option<u64> {
        self.holds = self.holds.saturating_sub(1);
        if self.holds == 0 {
            self.resume()
        } else {
            None
        }
    }

    /// Schedule a collection that was deferred, if any.
    pub(crate) fn resume(&mut self) -> Option<u64> {
        if std::mem::take(&mut self.wanted) {
            self.request()
        } else {
            None
        }
    }

    /// Claim a scheduled run. Superseded tasks get `false`.
    pub(crate) fn begin_run(&mut self, generation: u64) -> bool {
        if self.scheduled && self.generation == generation {
            self.scheduled = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.holds > 0
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}

impl StoreState {
    pub(crate) fn collect(&mut self, collaborators: &Collaborators, effects: &mut Effects) -> GcOutcome {
        if self.optimistic.is_some() {
            debug!("collection deferred while an optimistic snapshot is open");
            self.gc.wanted = true;
            return GcOutcome::Deferred;
        }

        let loader = collaborators.loader.as_deref();
        let mut references: HashSet<DataId> = HashSet::new();
        for entry in self.roots.values() {
            collaborators
                .marker
                .mark(&self.base, &entry.operation.root, &mut references, loader);
        }

        let removed = if references.is_empty() {
            let removed = self.base.len();
            self.base.clear();
            removed
        } else {
            let mut removed = 0;
            for id in self.base.record_ids() {
                if !references.contains(&id) {
                    self.base.remove(&id);
                    removed += 1;
                }
            }
            removed
        };

        debug!(reachable = references.len(), removed, roots = self.roots.len(), "collected");
        effects.events.push(StoreEvent::Gc {
            reachable: references.len(),
            removed,
        });
        GcOutcome::Collected {
            reachable: references.len(),
            removed,
        }
    }
}
