//! Reference counting with a deferred release buffer.
//!
//! Releasing an operation does not touch its count right away. The
//! identifier is queued, and only once the queue grows past
//! `release_buffer_size` is the oldest entry popped and its count
//! decremented. An entry whose count reaches zero that way is deleted and a
//! collection is requested. Rapid release/retain churn therefore never
//! evicts data that is about to be read again.

use tracing::debug;

use normstore_selector::{OperationDescriptor, RequestIdentifier};

use crate::state::{RootEntry, StoreState};

impl StoreState {
    pub(crate) fn retain_root(&mut self, operation: &OperationDescriptor) -> RequestIdentifier {
        let id = operation.identifier().clone();
        let entry = self.roots.entry(id.clone()).or_insert_with(|| RootEntry {
            operation: operation.clone(),
            ref_count: 0,
            epoch: None,
            fetch_time: None,
        });
        entry.ref_count += 1;
        debug!(operation = %entry.operation.request.name, ref_count = entry.ref_count, "retained");
        id
    }

    /// Buffer a release. Returns `true` when an entry was deleted and a
    /// collection should be requested.
    pub(crate) fn release_root(&mut self, id: RequestIdentifier) -> bool {
        self.release_buffer.push_back(id);
        let mut collect = false;
        while self.release_buffer.len() > self.config.release_buffer_size {
            let Some(oldest) = self.release_buffer.pop_front() else {
                break;
            };
            let Some(entry) = self.roots.get_mut(&oldest) else {
                continue;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count == 0 {
                debug!(operation = %entry.operation.request.name, "root released");
                self.roots.remove(&oldest);
                collect = true;
            }
        }
        collect
    }
}
