use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use super::error::CompileError;
use super::event::{Event, FieldError};
use super::expr::{Expr, Literal};
use super::value::{FieldValue, ValueKind};
use crate::evaluate::{EvalContext, Node};
use crate::parse::parse_expression;

pub type RuleId = String;

/// Where a definition came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PolicyInfo {
    pub name: String,
    pub source: String,
    pub version: String,
}

/// How a definition combines with an earlier one carrying the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Replace the earlier definition instead of reporting a collision.
    Override,
}

/// Token bucket parameters: `burst` events at once, refilled at `rate`
/// events per second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Limit {
    pub burst: u32,
    pub rate: f64,
}

impl Limit {
    #[must_use]
    pub fn new(burst: u32, rate: f64) -> Self {
        Self { burst, rate }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self {
            burst: 40,
            rate: 20.0,
        }
    }
}

/// Value written by a `set` action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Bool(bool),
    Int(i64),
    String(String),
    Strings(Vec<String>),
}

impl ActionValue {
    #[must_use]
    pub fn to_field_value(&self) -> FieldValue {
        match self {
            ActionValue::Bool(v) => FieldValue::Bool(*v),
            ActionValue::Int(v) => FieldValue::Int(*v),
            ActionValue::String(v) => FieldValue::String(v.clone()),
            ActionValue::Strings(v) => FieldValue::StringArray(v.clone()),
        }
    }
}

/// `set: { name, value, scope, append }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetAction {
    pub name: String,
    pub value: ActionValue,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub append: bool,
}

impl SetAction {
    #[must_use]
    pub fn new(name: &str, value: ActionValue) -> Self {
        Self {
            name: name.to_owned(),
            value,
            scope: None,
            append: false,
        }
    }

    #[must_use]
    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_owned());
        self
    }

    #[must_use]
    pub fn append(mut self) -> Self {
        self.append = true;
        self
    }

    /// The name rules read the variable with: `scope.name` or `name`.
    #[must_use]
    pub fn variable_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Appending a string builds a string array.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match (&self.value, self.append) {
            (ActionValue::String(_), true) => ValueKind::StringArray,
            (value, _) => value.to_field_value().kind(),
        }
    }

    pub(crate) fn stored_value(&self) -> FieldValue {
        match (&self.value, self.append) {
            (ActionValue::String(s), true) => FieldValue::StringArray(vec![s.clone()]),
            (value, _) => value.to_field_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDefinition {
    Set(SetAction),
}

/// A raw rule as written in a policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleDefinition {
    pub id: RuleId,
    pub expression: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub combine: Option<Combine>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub rate_limit: Option<Limit>,
    #[serde(skip)]
    pub policy: PolicyInfo,
}

impl RuleDefinition {
    #[must_use]
    pub fn new(id: &str, expression: &str) -> Self {
        Self {
            id: id.to_owned(),
            expression: expression.to_owned(),
            description: String::new(),
            tags: BTreeMap::new(),
            disabled: false,
            combine: None,
            actions: Vec::new(),
            rate_limit: None,
            policy: PolicyInfo::default(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    #[must_use]
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, limit: Limit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    #[must_use]
    pub fn combine(mut self, combine: Combine) -> Self {
        self.combine = Some(combine);
        self
    }
}

/// A named expression fragment or value list, inlined wherever its id is
/// referenced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MacroDefinition {
    pub id: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub combine: Option<Combine>,
    #[serde(skip)]
    pub policy: PolicyInfo,
}

impl MacroDefinition {
    #[must_use]
    pub fn new(id: &str, expression: &str) -> Self {
        Self {
            id: id.to_owned(),
            expression: Some(expression.to_owned()),
            values: Vec::new(),
            combine: None,
            policy: PolicyInfo::default(),
        }
    }

    /// A macro standing for a list of string values.
    #[must_use]
    pub fn values<I, S>(id: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_owned(),
            expression: None,
            values: values.into_iter().map(Into::into).collect(),
            combine: None,
            policy: PolicyInfo::default(),
        }
    }

    #[must_use]
    pub fn combine(mut self, combine: Combine) -> Self {
        self.combine = Some(combine);
        self
    }

    pub(crate) fn body(&self) -> Result<Expr, CompileError> {
        match &self.expression {
            Some(expression) => Ok(parse_expression(expression)?),
            None => Ok(Expr::Array(
                self.values
                    .iter()
                    .map(|v| Expr::Literal(Literal::String(v.clone())))
                    .collect(),
            )),
        }
    }
}

/// A compiled rule bound to one event type.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) definition: RuleDefinition,
    pub(crate) node: Node,
    pub(crate) event_type: String,
    pub(crate) fields: BTreeSet<String>,
}

impl Rule {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.definition.expression
    }

    #[must_use]
    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    #[must_use]
    pub fn policy(&self) -> &PolicyInfo {
        &self.definition.policy
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Every event field the rule may read.
    #[must_use]
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// Evaluate the rule on its own, without any discarder or approver.
    ///
    /// # Errors
    ///
    /// Returns the [`FieldError`] of the first field that could not be read.
    pub fn matches(&self, event: &dyn Event) -> Result<bool, FieldError> {
        self.node.eval(&EvalContext::new(event))
    }
}
