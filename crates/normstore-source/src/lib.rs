//! Record sources for normstore.
//!
//! A record source is a table from [`DataId`] to [`Record`] with three
//! states per identity: present, tombstoned (deleted on purpose), or absent
//! (never known). Readers treat a tombstone as "this entity is null" and an
//! absent identity as "missing data".
//!
//! # Sources
//!
//! All sources implement the read-only [`RecordSource`] trait; writable ones
//! also implement [`MutableRecordSource`]:
//!
//! - [`InMemoryRecordSource`] -- `HashMap`-backed table used for the store's
//!   base data and for deltas handed to `publish`
//! - [`OptimisticRecordSource`] -- overlay that shadows a base source without
//!   ever writing to it
//!
//! # Design Rules
//!
//! 1. Records are shared as `Arc<Record>` and never edited in place.
//! 2. A tombstone is distinct from absence and survives until removed.
//! 3. Sources never interpret record contents.
//!
//! [`DataId`]: normstore_types::DataId
//! [`Record`]: normstore_types::Record

pub mod memory;
pub mod optimistic;
pub mod traits;

pub use memory::InMemoryRecordSource;
pub use optimistic::{OptimisticRecordSource, OverlayView};
pub use traits::{MutableRecordSource, RecordSlot, RecordSource, RecordStatus};
