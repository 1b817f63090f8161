//! The public store handle.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use normstore_selector::{
    OperationDescriptor, OperationLoader, RequestDescriptor, RequestIdentifier, Selector, Snapshot,
};
use normstore_source::{InMemoryRecordSource, RecordSource};
use normstore_types::{DataId, Epoch};

use crate::availability::{CheckOptions, OperationAvailability};
use crate::config::StoreConfig;
use crate::disposable::Disposable;
use crate::error::{StoreError, StoreResult};
use crate::event::{LogSink, StoreEvent};
use crate::gc::GcOutcome;
use crate::invalidation::InvalidationState;
use crate::scheduler::{ImmediateScheduler, Scheduler};
use crate::state::{Collaborators, Effects, RootEntry, StoreState};
use crate::traits::{
    AvailabilityChecker, Clock, ReachabilityMarker, SnapshotReader, SystemClock, TreeChecker,
    TreeMarker, TreeReader,
};

/// Normalized record cache with retention, optimistic transactions, and
/// garbage collection.
///
/// `Store` is a cheap handle; clones share one underlying state. Every
/// operation runs to completion under an internal lock. Subscriber
/// callbacks, the log sink, and the scheduler are only invoked after that
/// lock is released, so they may call back into the store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    collaborators: Collaborators,
}

impl Store {
    /// A store over `source` with the default configuration and
    /// collaborators.
    pub fn new(source: InMemoryRecordSource) -> Self {
        StoreBuilder::new().source(source).build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Materialized copy of the data reads currently see. Records are
    /// shared with the store, not cloned.
    pub fn effective_source(&self) -> StoreResult<InMemoryRecordSource> {
        let state = self.lock()?;
        Ok(InMemoryRecordSource::materialize(&state.effective()))
    }

    /// Borrow the data reads currently see without copying it.
    pub fn with_effective_source<R>(&self, f: impl FnOnce(&dyn RecordSource) -> R) -> StoreResult<R> {
        let state = self.lock()?;
        Ok(f(&state.effective()))
    }

    pub fn lookup(&self, selector: &Selector) -> StoreResult<Snapshot> {
        let mut effects = Effects::default();
        let snapshot = {
            let state = self.lock()?;
            self.inner.collaborators.reader.read(&state.effective(), selector)
        };
        effects.events.push(StoreEvent::Lookup {
            data_id: selector.data_id.clone(),
            is_missing_data: snapshot.is_missing_data,
        });
        self.apply(effects);
        Ok(snapshot)
    }

    pub fn check(
        &self,
        operation: &OperationDescriptor,
        options: CheckOptions<'_>,
    ) -> StoreResult<OperationAvailability> {
        let mut state = self.lock()?;
        Ok(state.check_operation(&self.inner.collaborators, operation, options))
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Keep `operation`'s data from being collected until the returned
    /// handle is disposed (and its release has passed through the release
    /// buffer).
    pub fn retain(&self, operation: &OperationDescriptor) -> StoreResult<Disposable> {
        let id = self.lock()?.retain_root(operation);
        let weak = self.downgrade();
        Ok(Disposable::new(move || {
            if let Some(store) = Store::upgrade(&weak) {
                store.release(id);
            }
        }))
    }

    fn release(&self, id: RequestIdentifier) {
        let mut effects = Effects::default();
        {
            let Ok(mut state) = self.lock() else {
                warn!(operation = %id, "release skipped: store lock poisoned");
                return;
            };
            if state.release_root(id) {
                effects.gc_generation = state.gc.request();
            }
        }
        self.apply(effects);
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Merge `delta` into the store. Subscribers are not told until
    /// [`notify`](Store::notify).
    pub fn publish(
        &self,
        delta: &InMemoryRecordSource,
        invalidated_ids: Option<&HashSet<DataId>>,
    ) -> StoreResult<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.lock()?;
            let event = state.publish(delta, invalidated_ids);
            effects.events.push(event);
        }
        self.apply(effects);
        Ok(())
    }

    /// Close the current write batch. Returns the owners of every
    /// subscription that was refreshed.
    pub fn notify(
        &self,
        source_operation: Option<&OperationDescriptor>,
        invalidate_store: bool,
    ) -> StoreResult<Vec<RequestDescriptor>> {
        let mut effects = Effects::default();
        let owners = {
            let mut state = self.lock()?;
            state.notify(
                &self.inner.collaborators,
                source_operation,
                invalidate_store,
                &mut effects,
            )
        };
        self.apply(effects);
        Ok(owners)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn subscribe(
        &self,
        snapshot: Snapshot,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> StoreResult<Disposable> {
        let id = self.lock()?.add_subscription(snapshot, Arc::new(callback));
        let weak = self.downgrade();
        Ok(Disposable::new(move || {
            if let Some(store) = Store::upgrade(&weak) {
                if let Ok(mut state) = store.lock() {
                    state.subscriptions.remove(&id);
                }
            }
        }))
    }

    pub fn lookup_invalidation_state(
        &self,
        data_ids: impl IntoIterator<Item = DataId>,
    ) -> StoreResult<InvalidationState> {
        Ok(self.lock()?.lookup_invalidation_state(data_ids))
    }

    /// Whether anything captured in `state` has been invalidated since.
    pub fn check_invalidation_state(&self, state: &InvalidationState) -> StoreResult<bool> {
        Ok(self.lock()?.check_invalidation_state(state))
    }

    pub fn subscribe_to_invalidation_state(
        &self,
        state: InvalidationState,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> StoreResult<Disposable> {
        let data_ids = state.data_ids.into_keys().collect();
        let id = self
            .lock()?
            .add_invalidation_subscription(data_ids, Arc::new(callback));
        let weak = self.downgrade();
        Ok(Disposable::new(move || {
            if let Some(store) = Store::upgrade(&weak) {
                if let Ok(mut state) = store.lock() {
                    state.invalidation_subscriptions.remove(&id);
                }
            }
        }))
    }

    // -----------------------------------------------------------------------
    // Optimistic transactions
    // -----------------------------------------------------------------------

    /// Open an optimistic overlay. Fails if one is already open.
    pub fn snapshot(&self) -> StoreResult<()> {
        let mut effects = Effects::default();
        self.lock()?
            .open_snapshot(&self.inner.collaborators, &mut effects)?;
        self.apply(effects);
        Ok(())
    }

    /// Discard the optimistic overlay. Fails if none is open.
    pub fn restore(&self) -> StoreResult<()> {
        let mut effects = Effects::default();
        self.lock()?.restore_snapshot(&mut effects)?;
        self.apply(effects);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Defer scheduled collection until the returned handle is disposed.
    pub fn hold_gc(&self) -> StoreResult<Disposable> {
        self.lock()?.gc.hold();
        let weak = self.downgrade();
        Ok(Disposable::new(move || {
            let Some(store) = Store::upgrade(&weak) else {
                return;
            };
            let mut effects = Effects::default();
            match store.lock() {
                Ok(mut state) => effects.gc_generation = state.gc.release_hold(),
                Err(_) => warn!("gc hold release skipped: store lock poisoned"),
            }
            store.apply(effects);
        }))
    }

    /// Ask the scheduler for a collection.
    pub fn schedule_gc(&self) -> StoreResult<()> {
        let mut effects = Effects::default();
        effects.gc_generation = self.lock()?.gc.request();
        self.apply(effects);
        Ok(())
    }

    /// Collect now, regardless of holds.
    pub fn gc(&self) -> StoreResult<GcOutcome> {
        let mut effects = Effects::default();
        let outcome = self
            .lock()?
            .collect(&self.inner.collaborators, &mut effects);
        self.apply(effects);
        Ok(outcome)
    }

    fn run_scheduled_gc(&self, generation: u64) {
        let mut effects = Effects::default();
        {
            let Ok(mut state) = self.lock() else {
                warn!("scheduled collection skipped: store lock poisoned");
                return;
            };
            if !state.gc.begin_run(generation) {
                debug!(generation, "superseded collection task skipped");
                return;
            }
            state.collect(&self.inner.collaborators, &mut effects);
        }
        self.apply(effects);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn config(&self) -> StoreResult<StoreConfig> {
        Ok(self.lock()?.config.clone())
    }

    pub fn current_write_epoch(&self) -> StoreResult<Epoch> {
        Ok(self.lock()?.current_write_epoch)
    }

    pub fn global_invalidation_epoch(&self) -> StoreResult<Option<Epoch>> {
        Ok(self.lock()?.global_invalidation_epoch)
    }

    pub fn is_optimistic(&self) -> StoreResult<bool> {
        Ok(self.lock()?.optimistic.is_some())
    }

    pub fn subscription_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.subscriptions.len())
    }

    /// Released operations waiting in the buffer, oldest first.
    pub fn release_buffer(&self) -> StoreResult<Vec<RequestIdentifier>> {
        Ok(self.lock()?.release_buffer.iter().cloned().collect())
    }

    pub fn root_entry(&self, id: &RequestIdentifier) -> StoreResult<Option<RootEntry>> {
        Ok(self.lock()?.roots.get(id).cloned())
    }

    pub fn retained_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.roots.len())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.inner.state.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<StoreInner>) -> Option<Store> {
        weak.upgrade().map(|inner| Store { inner })
    }

    /// Deliver everything an operation queued while holding the lock.
    fn apply(&self, effects: Effects) {
        let collaborators = &self.inner.collaborators;
        if let Some(log) = &collaborators.log {
            for event in &effects.events {
                log(event);
            }
        }
        for (callback, snapshot) in effects.snapshot_callbacks {
            callback(&snapshot);
        }
        for callback in effects.invalidation_callbacks {
            callback();
        }
        if let Some(generation) = effects.gc_generation {
            let weak = self.downgrade();
            collaborators.scheduler.schedule(Box::new(move || {
                if let Some(store) = Store::upgrade(&weak) {
                    store.run_scheduled_gc(generation);
                }
            }));
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(InMemoryRecordSource::new())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Store");
        match self.inner.state.try_lock() {
            Ok(state) => s
                .field("epoch", &state.current_write_epoch)
                .field("records", &state.base.len())
                .field("roots", &state.roots.len())
                .field("subscriptions", &state.subscriptions.len())
                .field("optimistic", &state.optimistic.is_some())
                .field("gc_held", &state.gc.is_held())
                .field("gc_scheduled", &state.gc.is_scheduled()),
            Err(_) => s.field("state", &"<locked>"),
        };
        s.finish()
    }
}

/// Builder for a [`Store`] with custom configuration or collaborators.
pub struct StoreBuilder {
    config: StoreConfig,
    source: InMemoryRecordSource,
    reader: Arc<dyn SnapshotReader>,
    checker: Arc<dyn AvailabilityChecker>,
    marker: Arc<dyn ReachabilityMarker>,
    loader: Option<Arc<dyn OperationLoader>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    log: Option<LogSink>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            source: InMemoryRecordSource::new(),
            reader: Arc::new(TreeReader),
            checker: Arc::new(TreeChecker),
            marker: Arc::new(TreeMarker),
            loader: None,
            scheduler: Arc::new(ImmediateScheduler),
            clock: Arc::new(SystemClock),
            log: None,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial base source. A root record is added if it has none.
    pub fn source(mut self, source: InMemoryRecordSource) -> Self {
        self.source = source;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn SnapshotReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn checker(mut self, checker: Arc<dyn AvailabilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn marker(mut self, marker: Arc<dyn ReachabilityMarker>) -> Self {
        self.marker = marker;
        self
    }

    pub fn operation_loader(mut self, loader: Arc<dyn OperationLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn log(mut self, sink: impl Fn(&StoreEvent) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Store {
        let state = StoreState::new(self.config, self.source);
        Store {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                collaborators: Collaborators {
                    reader: self.reader,
                    checker: self.checker,
                    marker: self.marker,
                    loader: self.loader,
                    scheduler: self.scheduler,
                    clock: self.clock,
                    log: self.log,
                },
            }),
        }
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
