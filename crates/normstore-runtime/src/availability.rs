//! Operation-level availability with two-tier staleness.
//!
//! An operation is stale when the whole store was invalidated after it was
//! last written, or when any record it reads was invalidated after that
//! write. Otherwise the checker's verdict stands, subject to the optional
//! query cache expiration.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use normstore_selector::{AvailabilityStatus, MissingFieldHandler, OperationDescriptor};
use normstore_source::{InMemoryRecordSource, MutableRecordSource};

use crate::state::{Collaborators, EffectiveSource, StoreState};

/// Result of [`Store::check`](crate::Store::check).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationAvailability {
    Available { fetch_time: Option<SystemTime> },
    Missing,
    Stale,
}

/// Knobs for a single check.
#[derive(Default)]
pub struct CheckOptions<'a> {
    /// Consulted in order for fields absent from the store.
    pub handlers: Vec<Arc<dyn MissingFieldHandler>>,
    /// Receives handler-resolved fields. Defaults to the store itself.
    pub target: Option<&'a mut InMemoryRecordSource>,
}

impl<'a> CheckOptions<'a> {
    pub fn with_handler(mut self, handler: Arc<dyn MissingFieldHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_target(mut self, target: &'a mut InMemoryRecordSource) -> Self {
        self.target = Some(target);
        self
    }
}

impl StoreState {
    pub(crate) fn check_operation(
        &mut self,
        collaborators: &Collaborators,
        operation: &OperationDescriptor,
        options: CheckOptions<'_>,
    ) -> OperationAvailability {
        let entry = self.roots.get(operation.identifier());
        let last_written = entry.and_then(|e| e.epoch);
        let fetch_time = entry.and_then(|e| e.fetch_time);

        if let Some(global) = self.global_invalidation_epoch {
            if last_written.map_or(true, |written| written <= global) {
                debug!(operation = %operation.request.name, "stale: store invalidated");
                return OperationAvailability::Stale;
            }
        }

        let CheckOptions { handlers, target } = options;
        let loader = collaborators.loader.as_deref();
        let availability = match target {
            Some(target) => {
                let source = EffectiveSource::new(&self.base, self.optimistic.as_ref());
                collaborators
                    .checker
                    .check(&source, target, &operation.root, &handlers, loader)
            }
            None => {
                let mut resolved = InMemoryRecordSource::new();
                let availability = {
                    let source = EffectiveSource::new(&self.base, self.optimistic.as_ref());
                    collaborators
                        .checker
                        .check(&source, &mut resolved, &operation.root, &handlers, loader)
                };
                let target = self.write_target();
                for (id, slot) in resolved.iter() {
                    if let Some(record) = slot.record() {
                        target.set(id.clone(), Arc::clone(record));
                    }
                }
                availability
            }
        };

        if let Some(invalidated_at) = availability.most_recently_invalidated_at {
            if last_written.map_or(true, |written| invalidated_at > written) {
                debug!(operation = %operation.request.name, %invalidated_at, "stale: record invalidated");
                return OperationAvailability::Stale;
            }
        }

        match availability.status {
            AvailabilityStatus::Missing => OperationAvailability::Missing,
            AvailabilityStatus::Available => {
                if let (Some(expiration), Some(fetched)) = (self.config.query_cache_expiration, fetch_time) {
                    let expired = collaborators
                        .clock
                        .now()
                        .duration_since(fetched)
                        .map_or(false, |age| age >= expiration);
                    if expired {
                        debug!(operation = %operation.request.name, "stale: cache expired");
                        return OperationAvailability::Stale;
                    }
                }
                OperationAvailability::Available { fetch_time }
            }
        }
    }
}
