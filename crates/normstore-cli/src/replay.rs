//! Running a [`Script`] against a fresh [`Store`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use normstore_runtime::{
    CheckOptions, Disposable, OperationAvailability, Store, StoreConfig, StoreEvent,
};
use normstore_selector::{
    create_operation_descriptor, ConcreteRequest, OperationDescriptor, StaticOperationLoader,
};
use normstore_source::{InMemoryRecordSource, MutableRecordSource};

use crate::script::{OperationRef, Script, Step};

/// What one step did.
#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub outcome: Value,
    /// Subscription callbacks fired during the step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<StoreEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub subscription: String,
    pub data: Value,
    pub is_missing_data: bool,
}

enum HandleKind {
    Retain,
    Subscription,
    GcHold,
}

struct Handle {
    kind: HandleKind,
    disposable: Disposable,
}

pub struct Replay {
    store: Store,
    requests: HashMap<String, ConcreteRequest>,
    handles: HashMap<String, Handle>,
    notifications: Arc<Mutex<Vec<Notification>>>,
    events: Arc<Mutex<Vec<StoreEvent>>>,
}

impl Replay {
    /// Build the store and register the script's documents.
    pub fn new(script: &Script, config: StoreConfig) -> anyhow::Result<Self> {
        let mut requests = HashMap::new();
        for document in &script.documents {
            let request = ConcreteRequest::new(document.clone())
                .with_context(|| format!("document {}", document.name))?;
            if requests.insert(document.name.clone(), request).is_some() {
                bail!("duplicate document: {}", document.name);
            }
        }

        let mut loader = StaticOperationLoader::new();
        for module in &script.modules {
            loader
                .register(module.clone())
                .with_context(|| format!("module {}", module.name))?;
        }

        let source = InMemoryRecordSource::from_records(script.records.iter().cloned());
        let events: Arc<Mutex<Vec<StoreEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let store = Store::builder()
            .config(config)
            .source(source)
            .operation_loader(Arc::new(loader))
            .log(move |event| {
                if let Ok(mut events) = sink.lock() {
                    events.push(event.clone());
                }
            })
            .build();

        Ok(Self {
            store,
            requests,
            handles: HashMap::new(),
            notifications: Arc::default(),
            events,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run every step, stopping at the first failure.
    pub fn run(&mut self, steps: &[Step]) -> anyhow::Result<Vec<StepReport>> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                self.run_step(index, step)
                    .with_context(|| format!("step {index} ({})", step.name()))
            })
            .collect()
    }

    pub fn run_step(&mut self, index: usize, step: &Step) -> anyhow::Result<StepReport> {
        debug!(index, step = step.name(), "running step");
        let outcome = match step {
            Step::Retain { target, handle } => {
                let operation = self.operation(target)?;
                let disposable = self.store.retain(&operation)?;
                self.insert_handle(handle, HandleKind::Retain, disposable)?;
                json!({ "operation": operation.identifier().as_str() })
            }
            Step::Release { handle } => {
                match self.take_handle(handle)? {
                    Handle {
                        kind: HandleKind::GcHold,
                        ..
                    } => bail!("{handle} is a gc hold; use release_gc"),
                    Handle { mut disposable, .. } => disposable.dispose(),
                }
                Value::Null
            }
            Step::Publish {
                records,
                deleted,
                invalidated,
            } => {
                let mut delta = InMemoryRecordSource::new();
                for record in records {
                    delta.insert(record.clone());
                }
                for id in deleted {
                    delta.delete(id);
                }
                let invalidated: HashSet<_> = invalidated.iter().cloned().collect();
                self.store.publish(&delta, Some(&invalidated))?;
                json!({ "records": records.len() + deleted.len(), "invalidated": invalidated.len() })
            }
            Step::Notify {
                source,
                invalidate_store,
            } => {
                let source = source.as_ref().map(|s| self.operation(s)).transpose()?;
                let owners = self.store.notify(source.as_ref(), *invalidate_store)?;
                let mut names: Vec<&str> = owners.iter().map(|o| o.name.as_str()).collect();
                names.sort_unstable();
                json!({
                    "epoch": self.store.current_write_epoch()?,
                    "affected": names,
                })
            }
            Step::Check { target } => {
                let operation = self.operation(target)?;
                let availability = self.store.check(&operation, CheckOptions::default())?;
                json!({ "status": availability_label(&availability) })
            }
            Step::Lookup { target } => {
                let operation = self.operation(target)?;
                let snapshot = self.store.lookup(&operation.root)?;
                json!({
                    "data": snapshot.data.to_json(),
                    "is_missing_data": snapshot.is_missing_data,
                })
            }
            Step::Subscribe { target, handle } => {
                let operation = self.operation(target)?;
                let snapshot = self.store.lookup(&operation.root)?;
                let sink = Arc::clone(&self.notifications);
                let name = handle.clone();
                let disposable = self.store.subscribe(snapshot, move |snapshot| {
                    if let Ok(mut notifications) = sink.lock() {
                        notifications.push(Notification {
                            subscription: name.clone(),
                            data: snapshot.data.to_json(),
                            is_missing_data: snapshot.is_missing_data,
                        });
                    }
                })?;
                self.insert_handle(handle, HandleKind::Subscription, disposable)?;
                Value::Null
            }
            Step::Snapshot => {
                self.store.snapshot()?;
                Value::Null
            }
            Step::Restore => {
                self.store.restore()?;
                Value::Null
            }
            Step::Gc => {
                let outcome = self.store.gc()?;
                info!(?outcome, "collection finished");
                serde_json::to_value(outcome)?
            }
            Step::HoldGc { handle } => {
                let disposable = self.store.hold_gc()?;
                self.insert_handle(handle, HandleKind::GcHold, disposable)?;
                Value::Null
            }
            Step::ReleaseGc { handle } => {
                let Handle {
                    kind,
                    mut disposable,
                } = self.take_handle(handle)?;
                if !matches!(kind, HandleKind::GcHold) {
                    bail!("{handle} is not a gc hold");
                }
                disposable.dispose();
                Value::Null
            }
            Step::Invalidate { ids } => {
                let invalidated: HashSet<_> = ids.iter().cloned().collect();
                self.store
                    .publish(&InMemoryRecordSource::new(), Some(&invalidated))?;
                Value::Null
            }
        };

        Ok(StepReport {
            index,
            step: step.name(),
            outcome,
            notifications: drain(&self.notifications),
            events: drain(&self.events),
        })
    }

    fn operation(&self, target: &OperationRef) -> anyhow::Result<OperationDescriptor> {
        let request = self
            .requests
            .get(&target.operation)
            .ok_or_else(|| anyhow!("unknown document: {}", target.operation))?;
        Ok(create_operation_descriptor(request, &target.variables))
    }

    fn insert_handle(
        &mut self,
        name: &str,
        kind: HandleKind,
        mut disposable: Disposable,
    ) -> anyhow::Result<()> {
        if self.handles.contains_key(name) {
            disposable.dispose();
            bail!("handle {name} already in use");
        }
        self.handles
            .insert(name.to_string(), Handle { kind, disposable });
        Ok(())
    }

    fn take_handle(&mut self, name: &str) -> anyhow::Result<Handle> {
        self.handles
            .remove(name)
            .ok_or_else(|| anyhow!("unknown handle: {name}"))
    }
}

fn availability_label(availability: &OperationAvailability) -> &'static str {
    match availability {
        OperationAvailability::Available { .. } => "available",
        OperationAvailability::Missing => "missing",
        OperationAvailability::Stale => "stale",
    }
}

fn drain<T>(buffer: &Mutex<Vec<T>>) -> Vec<T> {
    buffer
        .lock()
        .map(|mut items| std::mem::take(&mut *items))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn script(steps: Value) -> Script {
        Script::from_json(
            &json!({
                "records": [
                    {"__id": "client:root", "__typename": "__Root", "me": {"__ref": "4"}},
                    {"__id": "4", "__typename": "User", "name": "Zuck"}
                ],
                "documents": [{
                    "name": "Viewer",
                    "selections": [{
                        "kind": "linked_field",
                        "name": "me",
                        "selections": [{"kind": "scalar_field", "name": "name"}]
                    }]
                }],
                "steps": steps
            })
            .to_string(),
        )
        .unwrap()
    }

    fn run(steps: Value) -> (Replay, Vec<StepReport>) {
        let script = script(steps);
        let mut replay = Replay::new(&script, StoreConfig::default()).unwrap();
        let reports = replay.run(&script.steps).unwrap();
        (replay, reports)
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    #[test]
    fn lookup_reads_seeded_records() {
        let (_, reports) = run(json!([{"step": "lookup", "operation": "Viewer"}]));
        assert_eq!(
            reports[0].outcome,
            json!({"data": {"me": {"name": "Zuck"}}, "is_missing_data": false})
        );
        assert!(matches!(reports[0].events[0], StoreEvent::Lookup { .. }));
    }

    #[test]
    fn subscription_fires_after_notify() {
        let (_, reports) = run(json!([
            {"step": "subscribe", "operation": "Viewer", "as": "s"},
            {"step": "publish", "records": [{"__id": "4", "name": "Mark"}]},
            {"step": "notify"}
        ]));
        assert!(reports[1].notifications.is_empty());
        assert_eq!(reports[2].notifications.len(), 1);
        assert_eq!(reports[2].notifications[0].subscription, "s");
        assert_eq!(reports[2].notifications[0].data, json!({"me": {"name": "Mark"}}));
        assert_eq!(reports[2].outcome["affected"], json!(["Viewer"]));
    }

    #[test]
    fn check_reports_staleness_after_invalidation() {
        let (_, reports) = run(json!([
            {"step": "retain", "operation": "Viewer", "as": "r"},
            {"step": "check", "operation": "Viewer"},
            {"step": "invalidate", "ids": ["4"]},
            {"step": "notify"},
            {"step": "check", "operation": "Viewer"}
        ]));
        assert_eq!(reports[1].outcome["status"], "available");
        assert_eq!(reports[4].outcome["status"], "stale");
    }

    // ------------------------------------------------------------------
    // Retention and collection
    // ------------------------------------------------------------------

    #[test]
    fn gc_keeps_retained_and_drops_the_rest() {
        let (replay, reports) = run(json!([
            {"step": "publish", "records": [{"__id": "9", "__typename": "User"}]},
            {"step": "retain", "operation": "Viewer", "as": "r"},
            {"step": "gc"}
        ]));
        assert_eq!(reports[2].outcome, json!({"outcome": "collected", "reachable": 2, "removed": 1}));
        let ids = replay.store().effective_source().unwrap().sorted_ids();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn gc_is_deferred_under_snapshot() {
        let (_, reports) = run(json!([
            {"step": "snapshot"},
            {"step": "gc"},
            {"step": "restore"}
        ]));
        assert_eq!(reports[1].outcome, json!({"outcome": "deferred"}));
        assert!(reports[2]
            .events
            .iter()
            .any(|e| matches!(e, StoreEvent::Gc { .. })));
    }

    #[test]
    fn bundled_optimistic_scenario() {
        let script =
            Script::from_json(include_str!("../scenarios/optimistic_profile.json")).unwrap();
        let mut replay = Replay::new(&script, StoreConfig::default()).unwrap();
        let reports = replay.run(&script.steps).unwrap();

        assert_eq!(reports[2].outcome["status"], "available");
        assert_eq!(
            reports[5].notifications[0].data,
            json!({"me": {"name": "Optimistic Zuck", "friends": [{"name": "Dustin"}, null]}})
        );
        assert_eq!(reports[6].outcome, json!({"outcome": "deferred"}));
        assert!(reports[7].events.contains(&StoreEvent::Gc {
            reachable: 3,
            removed: 1
        }));
        assert_eq!(reports[8].notifications[0].data["me"]["name"], "Zuck");
        assert_eq!(reports[11].outcome["status"], "available");

        let ids: Vec<String> = replay
            .store()
            .effective_source()
            .unwrap()
            .sorted_ids()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["4", "5", "client:root"]);
    }

    #[test]
    fn released_handle_cannot_be_reused() {
        let script = script(json!([
            {"step": "hold_gc", "as": "h"},
            {"step": "release", "handle": "h"}
        ]));
        let mut replay = Replay::new(&script, StoreConfig::default()).unwrap();
        let err = replay.run(&script.steps).unwrap_err();
        assert!(format!("{err:#}").contains("release_gc"));
    }

    #[test]
    fn unknown_document_is_an_error() {
        let script = script(json!([{"step": "lookup", "operation": "Nope"}]));
        let mut replay = Replay::new(&script, StoreConfig::default()).unwrap();
        let err = replay.run(&script.steps).unwrap_err();
        assert!(format!("{err:#}").contains("unknown document: Nope"));
    }

    #[test]
    fn second_snapshot_is_an_error() {
        let script = script(json!([{"step": "snapshot"}, {"step": "snapshot"}]));
        let mut replay = Replay::new(&script, StoreConfig::default()).unwrap();
        assert!(replay.run(&script.steps).is_err());
    }
}
