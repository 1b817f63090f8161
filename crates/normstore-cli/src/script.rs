//! Scenario scripts.
//!
//! A script seeds a store with records, declares the documents its steps
//! refer to by name, and lists the steps to run in order. Handles returned
//! by `retain`, `subscribe`, and `hold_gc` are named with `as` so later
//! steps can dispose them.

use serde::Deserialize;

use normstore_selector::ConcreteNode;
use normstore_types::{DataId, Record, Variables};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Records present before the first step.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Operations addressable by name.
    pub documents: Vec<ConcreteNode>,
    /// Documents resolvable through module imports.
    #[serde(default)]
    pub modules: Vec<ConcreteNode>,
    pub steps: Vec<Step>,
}

/// An operation bound to variables.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRef {
    pub operation: String,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Retain {
        #[serde(flatten)]
        target: OperationRef,
        #[serde(rename = "as")]
        handle: String,
    },
    /// Dispose a retain or subscribe handle.
    Release { handle: String },
    Publish {
        #[serde(default)]
        records: Vec<Record>,
        #[serde(default)]
        deleted: Vec<DataId>,
        #[serde(default)]
        invalidated: Vec<DataId>,
    },
    Notify {
        #[serde(default)]
        source: Option<OperationRef>,
        #[serde(default)]
        invalidate_store: bool,
    },
    Check {
        #[serde(flatten)]
        target: OperationRef,
    },
    Lookup {
        #[serde(flatten)]
        target: OperationRef,
    },
    Subscribe {
        #[serde(flatten)]
        target: OperationRef,
        #[serde(rename = "as")]
        handle: String,
    },
    Snapshot,
    Restore,
    Gc,
    HoldGc {
        #[serde(rename = "as")]
        handle: String,
    },
    ReleaseGc { handle: String },
    /// Publish an empty delta that invalidates `ids`.
    Invalidate { ids: Vec<DataId> },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Retain { .. } => "retain",
            Step::Release { .. } => "release",
            Step::Publish { .. } => "publish",
            Step::Notify { .. } => "notify",
            Step::Check { .. } => "check",
            Step::Lookup { .. } => "lookup",
            Step::Subscribe { .. } => "subscribe",
            Step::Snapshot => "snapshot",
            Step::Restore => "restore",
            Step::Gc => "gc",
            Step::HoldGc { .. } => "hold_gc",
            Step::ReleaseGc { .. } => "release_gc",
            Step::Invalidate { .. } => "invalidate",
        }
    }
}

impl Script {
    pub fn from_json(input: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
