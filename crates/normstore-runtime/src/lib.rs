//! The normstore runtime: a normalized record cache.
//!
//! [`Store`] owns a base record source and orchestrates:
//! - retention with a deferred release buffer ([`Store::retain`])
//! - batched writes and epoch-ordered notification ([`Store::publish`],
//!   [`Store::notify`])
//! - two-tier staleness: store-wide and per-record invalidation
//!   ([`Store::check`], [`InvalidationState`])
//! - optimistic transactions over a copy-on-write overlay
//!   ([`Store::snapshot`], [`Store::restore`])
//! - mark-and-sweep collection deferred through a [`Scheduler`]
//!
//! Reading, availability checking, and reachability marking are injected
//! collaborators ([`SnapshotReader`], [`AvailabilityChecker`],
//! [`ReachabilityMarker`]) with tree-walking defaults.

pub mod availability;
pub mod config;
pub mod disposable;
pub mod error;
pub mod event;
pub mod gc;
pub mod invalidation;
mod optimistic;
mod publish;
mod retention;
pub mod scheduler;
mod state;
pub mod store;
pub mod subscriptions;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use availability::{CheckOptions, OperationAvailability};
pub use config::StoreConfig;
pub use disposable::Disposable;
pub use error::{StoreError, StoreResult};
pub use event::{LogSink, StoreEvent};
pub use gc::GcOutcome;
pub use invalidation::InvalidationState;
pub use scheduler::{GcTask, ImmediateScheduler, ManualScheduler, Scheduler, TokioScheduler};
pub use state::RootEntry;
pub use store::{Store, StoreBuilder};
pub use subscriptions::{InvalidationCallback, SnapshotCallback};
pub use traits::{
    AvailabilityChecker, Clock, ReachabilityMarker, SnapshotReader, SystemClock, TreeChecker,
    TreeMarker, TreeReader,
};
