//! Selection documents and the traversals that run over them.
//!
//! A compiled document ([`ConcreteNode`]) describes which fields to read
//! starting at a record. Binding variables produces a [`Selector`]; three
//! traversals interpret selectors against a record source:
//!
//! - [`read`] materializes a [`Snapshot`] of the selected data
//! - [`check`] reports [`Availability`] and resolves missing fields
//! - [`mark`] collects every identity reachable for garbage collection

pub mod checker;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod marker;
pub mod node;
pub mod reader;
pub mod snapshot;

pub use checker::{check, Availability, AvailabilityStatus, MissingFieldHandler};
pub use descriptor::{
    create_operation_descriptor, operation_variables, ConcreteRequest, OperationDescriptor,
    RequestDescriptor, RequestIdentifier, Selector,
};
pub use error::{SelectorError, SelectorResult};
pub use loader::{OperationLoader, StaticOperationLoader};
pub use marker::mark;
pub use node::{
    argument_values, Argument, ArgumentDefinition, ConcreteNode, Condition, InlineFragment,
    LinkedField, ModuleImport, NodeKind, ScalarField, Selection,
};
pub use reader::{read, MODULE_OPERATION_KEY};
pub use snapshot::Snapshot;
