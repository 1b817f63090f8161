//! Shared fixtures for the store tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde_json::{json, Value};

use normstore_selector::{
    create_operation_descriptor, Argument, ConcreteNode, ConcreteRequest, OperationDescriptor,
    Selection, Snapshot, StaticOperationLoader,
};
use normstore_source::InMemoryRecordSource;
use normstore_types::{format_storage_key, FieldValue, Record, Variables, ROOT_ID, ROOT_TYPE};

use crate::scheduler::ManualScheduler;
use crate::traits::Clock;
use crate::{Store, StoreConfig, StoreEvent};

pub(crate) type Events = Arc<Mutex<Vec<StoreEvent>>>;

pub(crate) fn store_with(config: StoreConfig) -> Store {
    Store::builder().config(config).build()
}

pub(crate) fn store_with_log(config: StoreConfig) -> (Store, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let store = Store::builder()
        .config(config)
        .log(move |event| sink.lock().unwrap().push(event.clone()))
        .build();
    (store, events)
}

pub(crate) fn manual_store(config: StoreConfig) -> (Store, Arc<ManualScheduler>, Events) {
    let scheduler = Arc::new(ManualScheduler::new());
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let store = Store::builder()
        .config(config)
        .scheduler(scheduler.clone())
        .log(move |event| sink.lock().unwrap().push(event.clone()))
        .build();
    (store, scheduler, events)
}

pub(crate) fn gc_count(events: &Events) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, StoreEvent::Gc { .. }))
        .count()
}

pub(crate) struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub(crate) fn now_value(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now_value()
    }
}

pub(crate) fn store_with_clock(config: StoreConfig) -> (Store, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock {
        now: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
    });
    let store = Store::builder().config(config).clock(clock.clone()).build();
    (store, clock)
}

/// Callback that records the JSON of every delivered snapshot.
pub(crate) fn recorder() -> (
    Arc<Mutex<Vec<Value>>>,
    impl Fn(&Snapshot) + Send + Sync + 'static,
) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |snapshot: &Snapshot| {
        sink.lock().unwrap().push(snapshot.data.to_json())
    })
}

pub(crate) fn user(id: &str, name: &str) -> Record {
    Record::new(id, Some("User"))
        .with_field("id", FieldValue::scalar(id))
        .with_field("name", FieldValue::scalar(name))
}

pub(crate) fn node_key(id: &str) -> String {
    format_storage_key("node", &BTreeMap::from([("id".to_string(), json!(id))]))
}

pub(crate) fn root_with_node(id: &str) -> Record {
    Record::new(ROOT_ID, Some(ROOT_TYPE)).with_field(node_key(id), FieldValue::link(id))
}

/// What normalizing a `UserQuery` response for `id` would produce.
pub(crate) fn user_payload(id: &str, name: &str) -> InMemoryRecordSource {
    InMemoryRecordSource::from_records([root_with_node(id), user(id, name)])
}

fn bind(node: ConcreteNode, id: &str) -> OperationDescriptor {
    let request = ConcreteRequest::new(node).unwrap();
    let mut variables = Variables::new();
    variables.insert("id".into(), json!(id));
    create_operation_descriptor(&request, &variables)
}

/// `query UserQuery($id) { node(id: $id) { id name } }`
pub(crate) fn user_operation(id: &str) -> OperationDescriptor {
    let node = ConcreteNode::operation(
        "UserQuery",
        vec![Selection::linked(
            "node",
            vec![Selection::scalar("id"), Selection::scalar("name")],
        )
        .with_args(vec![Argument::variable("id", "id")])],
    )
    .with_argument("id", Value::Null);
    bind(node, id)
}

/// `query ProfileQuery($id) { node(id: $id) { id ...Profile @module } }`
pub(crate) fn profile_operation(id: &str) -> OperationDescriptor {
    let node = ConcreteNode::operation(
        "ProfileQuery",
        vec![Selection::linked(
            "node",
            vec![Selection::scalar("id"), Selection::module("Profile")],
        )
        .with_args(vec![Argument::variable("id", "id")])],
    )
    .with_argument("id", Value::Null);
    bind(node, id)
}

pub(crate) fn store_with_profile_loader(config: StoreConfig) -> (Store, Arc<StaticOperationLoader>) {
    let mut loader = StaticOperationLoader::new();
    loader
        .register(ConcreteNode::fragment(
            "Profile_user",
            vec![Selection::linked("photo", vec![Selection::scalar("id")])],
        ))
        .unwrap();
    let loader = Arc::new(loader);
    let store = Store::builder()
        .config(config)
        .operation_loader(loader.clone())
        .build();
    (store, loader)
}
