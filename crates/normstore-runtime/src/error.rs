/// Errors produced by store operations.
///
/// Missing data is never an error; it is reported through
/// [`OperationAvailability`](crate::OperationAvailability) and
/// [`Snapshot::is_missing_data`](normstore_selector::Snapshot).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("an optimistic snapshot is already open")]
    SnapshotAlreadyOpen,

    #[error("no optimistic snapshot is open to restore")]
    NoSnapshotToRestore,

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("store state lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
