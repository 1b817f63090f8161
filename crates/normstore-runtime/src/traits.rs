//! Collaborator boundaries injected into the store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use normstore_selector::{
    Availability, MissingFieldHandler, OperationLoader, Selector, Snapshot,
};
use normstore_source::{InMemoryRecordSource, RecordSource};
use normstore_types::DataId;

/// Reads a selector into a snapshot. Must not modify the source.
pub trait SnapshotReader: Send + Sync {
    fn read(&self, source: &dyn RecordSource, selector: &Selector) -> Snapshot;
}

/// Decides whether everything a selector needs is present.
pub trait AvailabilityChecker: Send + Sync {
    fn check(
        &self,
        source: &dyn RecordSource,
        target: &mut InMemoryRecordSource,
        selector: &Selector,
        handlers: &[Arc<dyn MissingFieldHandler>],
        loader: Option<&dyn OperationLoader>,
    ) -> Availability;
}

/// Adds every identity reachable from a selector to `references`.
pub trait ReachabilityMarker: Send + Sync {
    fn mark(
        &self,
        source: &dyn RecordSource,
        selector: &Selector,
        references: &mut HashSet<DataId>,
        loader: Option<&dyn OperationLoader>,
    );
}

/// Source of wall-clock time for fetch bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Default reader: walks the selection tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeReader;

impl SnapshotReader for TreeReader {
    fn read(&self, source: &dyn RecordSource, selector: &Selector) -> Snapshot {
        normstore_selector::read(source, selector)
    }
}

/// Default availability checker.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeChecker;

impl AvailabilityChecker for TreeChecker {
    fn check(
        &self,
        source: &dyn RecordSource,
        target: &mut InMemoryRecordSource,
        selector: &Selector,
        handlers: &[Arc<dyn MissingFieldHandler>],
        loader: Option<&dyn OperationLoader>,
    ) -> Availability {
        normstore_selector::check(source, target, selector, handlers, loader)
    }
}

/// Default reachability marker.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeMarker;

impl ReachabilityMarker for TreeMarker {
    fn mark(
        &self,
        source: &dyn RecordSource,
        selector: &Selector,
        references: &mut HashSet<DataId>,
        loader: Option<&dyn OperationLoader>,
    ) {
        normstore_selector::mark(source, selector, references, loader)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
