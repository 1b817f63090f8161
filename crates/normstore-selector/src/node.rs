//! Selection AST.
//!
//! A [`ConcreteNode`] is the compiled form of an operation or fragment: a
//! tree of [`Selection`]s naming which fields to read from which records.
//! The same tree drives reading, availability checking, and reachability
//! marking. Nodes are plain data and deserialize from JSON, which is how
//! the CLI loads documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use normstore_types::{format_storage_key, Variables, MODULE_OPERATION_PREFIX};

use crate::error::{SelectorError, SelectorResult};

/// Whether a node is a full operation or a reusable fragment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Operation,
    Fragment,
}

/// Declared variable of an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDefinition {
    pub name: String,
    #[serde(default)]
    pub default_value: Value,
}

/// Compiled operation or fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConcreteNode {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,
    pub selections: Vec<Selection>,
}

impl ConcreteNode {
    pub fn operation(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Operation,
            argument_definitions: Vec::new(),
            selections,
        }
    }

    pub fn fragment(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            kind: NodeKind::Fragment,
            ..Self::operation(name, selections)
        }
    }

    /// Declare a variable with a default value.
    pub fn with_argument(mut self, name: impl Into<String>, default_value: Value) -> Self {
        self.argument_definitions.push(ArgumentDefinition {
            name: name.into(),
            default_value,
        });
        self
    }

    /// Structural checks a compiler would guarantee.
    pub fn validate(&self) -> SelectorResult<()> {
        if self.name.is_empty() {
            return Err(SelectorError::MalformedDocument {
                name: self.name.clone(),
                reason: "document name must not be empty".into(),
            });
        }
        validate_selections(&self.name, &self.selections)
    }
}

fn validate_selections(document: &str, selections: &[Selection]) -> SelectorResult<()> {
    for selection in selections {
        match selection {
            Selection::ScalarField(field) if field.name.is_empty() => {
                return Err(malformed(document, "scalar field without a name"));
            }
            Selection::LinkedField(field) => {
                if field.name.is_empty() {
                    return Err(malformed(document, "linked field without a name"));
                }
                if field.selections.is_empty() {
                    return Err(malformed(
                        document,
                        &format!("linked field {} selects nothing", field.name),
                    ));
                }
                validate_selections(document, &field.selections)?;
            }
            Selection::Condition(condition) => {
                validate_selections(document, &condition.selections)?;
            }
            Selection::InlineFragment(fragment) => {
                validate_selections(document, &fragment.selections)?;
            }
            Selection::ModuleImport(import) if import.document_name.is_empty() => {
                return Err(malformed(document, "module import without a document name"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn malformed(document: &str, reason: &str) -> SelectorError {
    SelectorError::MalformedDocument {
        name: document.to_string(),
        reason: reason.to_string(),
    }
}

/// One entry in a selection set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    ScalarField(ScalarField),
    LinkedField(LinkedField),
    Condition(Condition),
    InlineFragment(InlineFragment),
    ModuleImport(ModuleImport),
}

/// Argument passed to a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Argument {
    Literal { name: String, value: Value },
    Variable { name: String, variable_name: String },
}

impl Argument {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Argument::Literal {
            name: name.into(),
            value,
        }
    }

    pub fn variable(name: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Argument::Variable {
            name: name.into(),
            variable_name: variable_name.into(),
        }
    }
}

/// Field holding a scalar value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
}

/// Field holding a link (or list of links) to other records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkedField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub plural: bool,
    pub selections: Vec<Selection>,
}

/// Selections included only when a boolean variable has a given value
/// (`@include` / `@skip`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub condition: String,
    pub passing_value: bool,
    pub selections: Vec<Selection>,
}

/// Selections applying only to records of one concrete type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineFragment {
    pub type_condition: String,
    pub selections: Vec<Selection>,
}

/// Selections loaded out of band: the record names the document to apply
/// in its `__module_operation_<document_name>` field, and the document is
/// resolved through an operation loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleImport {
    pub document_name: String,
}

impl ModuleImport {
    /// Storage key of the field naming the resolved document.
    pub fn operation_key(&self) -> String {
        format!("{MODULE_OPERATION_PREFIX}{}", self.document_name)
    }
}

impl Selection {
    pub fn scalar(name: impl Into<String>) -> Self {
        Selection::ScalarField(ScalarField {
            name: name.into(),
            alias: None,
            args: Vec::new(),
        })
    }

    pub fn linked(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Selection::LinkedField(LinkedField {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            plural: false,
            selections,
        })
    }

    pub fn plural(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Selection::LinkedField(LinkedField {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            plural: true,
            selections,
        })
    }

    pub fn include_if(variable: impl Into<String>, selections: Vec<Selection>) -> Self {
        Selection::Condition(Condition {
            condition: variable.into(),
            passing_value: true,
            selections,
        })
    }

    pub fn on_type(type_condition: impl Into<String>, selections: Vec<Selection>) -> Self {
        Selection::InlineFragment(InlineFragment {
            type_condition: type_condition.into(),
            selections,
        })
    }

    pub fn module(document_name: impl Into<String>) -> Self {
        Selection::ModuleImport(ModuleImport {
            document_name: document_name.into(),
        })
    }

    /// Attach arguments to a field selection; other selections are unchanged.
    pub fn with_args(mut self, arguments: Vec<Argument>) -> Self {
        match &mut self {
            Selection::ScalarField(field) => field.args = arguments,
            Selection::LinkedField(field) => field.args = arguments,
            _ => {}
        }
        self
    }

    /// Attach an alias to a field selection; other selections are unchanged.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        match &mut self {
            Selection::ScalarField(field) => field.alias = Some(alias.into()),
            Selection::LinkedField(field) => field.alias = Some(alias.into()),
            _ => {}
        }
        self
    }
}

impl ScalarField {
    /// Key under which the value appears in read results.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }
}

impl LinkedField {
    /// Key under which the value appears in read results.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }
}

impl Condition {
    /// Whether the guarded selections apply under `variables`.
    pub fn passes(&self, variables: &Variables) -> bool {
        let value = variables.get(&self.condition).map(truthy).unwrap_or(false);
        value == self.passing_value
    }
}

/// Resolve a field's arguments against bound variables.
pub fn argument_values(args: &[Argument], variables: &Variables) -> BTreeMap<String, Value> {
    args.iter()
        .map(|arg| match arg {
            Argument::Literal { name, value } => (name.clone(), value.clone()),
            Argument::Variable {
                name,
                variable_name,
            } => {
                let value = variables.get(variable_name).cloned().unwrap_or_else(|| {
                    warn!(variable = %variable_name, "undefined variable; treating as null");
                    Value::Null
                });
                (name.clone(), value)
            }
        })
        .collect()
}

/// Storage key of a field under bound variables.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    format_storage_key(name, &argument_values(args, variables))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
