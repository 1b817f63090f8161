//! Foundation types for normstore.
//!
//! This crate provides the identity, ordering, and value types shared by every
//! other normstore crate. Nothing here owns state; it is pure data.
//!
//! # Key Types
//!
//! - [`DataId`] -- Stable identity of one normalized entity
//! - [`Epoch`] -- Monotonic write counter used to order staleness
//! - [`Record`] / [`FieldValue`] -- Immutable field map for one entity
//! - [`Variables`] -- Bound query variables and storage-key formatting
//! - [`SelectorData`] -- Materialized read result with structural sharing

pub mod data;
pub mod data_id;
pub mod epoch;
pub mod error;
pub mod record;
pub mod variables;

pub use data::{recycle_nodes_into, SelectorData};
pub use data_id::{DataId, ROOT_ID, ROOT_TYPE};
pub use epoch::Epoch;
pub use error::TypeError;
pub use record::{FieldValue, Record, MODULE_OPERATION_PREFIX, TYPENAME_KEY};
pub use variables::{format_storage_key, stable_json, Variables};
