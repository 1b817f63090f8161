//! Mutable state behind a [`Store`](crate::Store) handle.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use normstore_selector::{OperationDescriptor, OperationLoader, RequestIdentifier, Snapshot};
use normstore_source::{InMemoryRecordSource, OverlayView, RecordSlot, RecordSource};
use normstore_types::{DataId, Epoch, Record, ROOT_ID, ROOT_TYPE};

use crate::config::StoreConfig;
use crate::event::{LogSink, StoreEvent};
use crate::gc::GcState;
use crate::scheduler::Scheduler;
use crate::subscriptions::{InvalidationCallback, InvalidationSubscription, SnapshotCallback, Subscription};
use crate::traits::{AvailabilityChecker, Clock, ReachabilityMarker, SnapshotReader};

/// Retention bookkeeping for one retained operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RootEntry {
    pub operation: OperationDescriptor,
    pub ref_count: u32,
    /// Write epoch of the last notify that named this operation.
    pub epoch: Option<Epoch>,
    /// First time this operation was written. Never overwritten.
    pub fetch_time: Option<SystemTime>,
}

/// Injected behaviour, fixed at construction.
pub(crate) struct Collaborators {
    pub(crate) reader: Arc<dyn SnapshotReader>,
    pub(crate) checker: Arc<dyn AvailabilityChecker>,
    pub(crate) marker: Arc<dyn ReachabilityMarker>,
    pub(crate) loader: Option<Arc<dyn OperationLoader>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) log: Option<LogSink>,
}

/// Work to perform once the state lock is released.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) events: Vec<StoreEvent>,
    pub(crate) snapshot_callbacks: Vec<(SnapshotCallback, Snapshot)>,
    pub(crate) invalidation_callbacks: Vec<InvalidationCallback>,
    /// Generation of a GC task to hand to the scheduler.
    pub(crate) gc_generation: Option<u64>,
}

pub(crate) struct StoreState {
    pub(crate) config: StoreConfig,
    pub(crate) base: InMemoryRecordSource,
    pub(crate) optimistic: Option<InMemoryRecordSource>,
    pub(crate) current_write_epoch: Epoch,
    pub(crate) global_invalidation_epoch: Option<Epoch>,
    pub(crate) roots: HashMap<RequestIdentifier, RootEntry>,
    pub(crate) release_buffer: VecDeque<RequestIdentifier>,
    pub(crate) updated_ids: HashSet<DataId>,
    pub(crate) invalidated_ids: HashSet<DataId>,
    pub(crate) subscriptions: BTreeMap<u64, Subscription>,
    pub(crate) invalidation_subscriptions: BTreeMap<u64, InvalidationSubscription>,
    pub(crate) next_subscription_id: u64,
    pub(crate) gc: GcState,
}

impl StoreState {
    pub(crate) fn new(config: StoreConfig, mut base: InMemoryRecordSource) -> Self {
        if base.record(&DataId::root()).is_none() {
            base.insert(Record::new(ROOT_ID, Some(ROOT_TYPE)));
        }
        Self {
            config,
            base,
            optimistic: None,
            current_write_epoch: Epoch::ZERO,
            global_invalidation_epoch: None,
            roots: HashMap::new(),
            release_buffer: VecDeque::new(),
            updated_ids: HashSet::new(),
            invalidated_ids: HashSet::new(),
            subscriptions: BTreeMap::new(),
            invalidation_subscriptions: BTreeMap::new(),
            next_subscription_id: 0,
            gc: GcState::default(),
        }
    }

    /// Overlay over base while a snapshot is open, else the base.
    pub(crate) fn effective(&self) -> EffectiveSource<'_> {
        EffectiveSource::new(&self.base, self.optimistic.as_ref())
    }

    /// The source writes currently go to.
    pub(crate) fn write_target(&mut self) -> &mut InMemoryRecordSource {
        match self.optimistic.as_mut() {
            Some(sink) => sink,
            None => &mut self.base,
        }
    }

    pub(crate) fn next_subscription_id(&mut self) -> u64 {
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        id
    }
}

/// Read view of the store's current data.
pub(crate) enum EffectiveSource<'a> {
    Base(&'a InMemoryRecordSource),
    Overlay(OverlayView<'a>),
}

impl<'a> EffectiveSource<'a> {
    pub(crate) fn new(base: &'a InMemoryRecordSource, optimistic: Option<&'a InMemoryRecordSource>) -> Self {
        match optimistic {
            Some(sink) => EffectiveSource::Overlay(OverlayView { base, sink }),
            None => EffectiveSource::Base(base),
        }
    }
}

impl RecordSource for EffectiveSource<'_> {
    fn get(&self, id: &DataId) -> Option<&RecordSlot> {
        match self {
            EffectiveSource::Base(base) => base.get(id),
            EffectiveSource::Overlay(view) => view.get(id),
        }
    }

    fn record_ids(&self) -> Vec<DataId> {
        match self {
            EffectiveSource::Base(base) => base.record_ids(),
            EffectiveSource::Overlay(view) => view.record_ids(),
        }
    }

    fn len(&self) -> usize {
        match self {
            EffectiveSource::Base(base) => base.len(),
            EffectiveSource::Overlay(view) => view.len(),
        }
    }
}
