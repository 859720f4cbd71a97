//! Runtime variable storage.
//!
//! Variables are read with `${name}` (global) or `${scope.name}` (scoped)
//! and written by `set` rule actions. A scope is backed by a
//! [`VariableProvider`] produced by a [`VariableProviderFactory`] every time
//! a [`RuleSet`](crate::RuleSet) is built. Providers receive the event under
//! evaluation and use it to pick their backing store, so one compiled
//! expression reads per-process (or per-anything) state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::types::{Event, FieldValue, ScalarValue, ValueKind};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("no scope instance available for variable '{name}'")]
    ScopeUnavailable { name: String },

    #[error("variable '{name}' holds {existing}, cannot append {appended}")]
    AppendMismatch {
        name: String,
        existing: ValueKind,
        appended: ValueKind,
    },
}

/// Backing store for the variables of one scope.
pub trait VariableProvider: Send + Sync {
    /// Read a variable for the object selected by `event`. `None` means the
    /// scope instance or the variable is not initialized.
    fn get(&self, event: &dyn Event, name: &str) -> Option<FieldValue>;

    /// Write a variable for the object selected by `event`.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError`] when the scope instance cannot be selected
    /// or an append does not fit the stored value.
    fn set(
        &self,
        event: &dyn Event,
        name: &str,
        value: FieldValue,
        append: bool,
    ) -> Result<(), VariableError>;
}

/// Produces a fresh provider for each rule set generation.
pub type VariableProviderFactory = Arc<dyn Fn() -> Arc<dyn VariableProvider> + Send + Sync>;

/// A read-only variable computed from the event, declared in [`Opts`](crate::Opts).
#[derive(Clone)]
pub struct Variable {
    pub(crate) kind: ValueKind,
    pub(crate) getter: Arc<dyn Fn(&dyn Event) -> FieldValue + Send + Sync>,
}

impl Variable {
    pub fn new(
        kind: ValueKind,
        getter: impl Fn(&dyn Event) -> FieldValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            getter: Arc::new(getter),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable").field("kind", &self.kind).finish()
    }
}

fn store(
    slot: &mut HashMap<String, FieldValue>,
    name: &str,
    value: FieldValue,
    append: bool,
) -> Result<(), VariableError> {
    if !append || !slot.contains_key(name) {
        slot.insert(name.to_owned(), value);
        return Ok(());
    }
    let Some(existing) = slot.get_mut(name) else {
        return Ok(());
    };
    match (existing, value) {
        (FieldValue::StringArray(items), FieldValue::String(s)) => {
            items.push(s);
            Ok(())
        }
        (FieldValue::StringArray(items), FieldValue::StringArray(more)) => {
            items.extend(more);
            Ok(())
        }
        (FieldValue::Int(total), FieldValue::Int(n)) => {
            *total = total.saturating_add(n);
            Ok(())
        }
        (existing, value) => Err(VariableError::AppendMismatch {
            name: name.to_owned(),
            existing: existing.kind(),
            appended: value.kind(),
        }),
    }
}

/// Variables shared by every event.
#[derive(Debug, Default)]
pub struct GlobalVariables {
    values: RwLock<HashMap<String, FieldValue>>,
}

impl GlobalVariables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableProvider for GlobalVariables {
    fn get(&self, _event: &dyn Event, name: &str) -> Option<FieldValue> {
        self.values.read().get(name).cloned()
    }

    fn set(
        &self,
        _event: &dyn Event,
        name: &str,
        value: FieldValue,
        append: bool,
    ) -> Result<(), VariableError> {
        store(&mut self.values.write(), name, value, append)
    }
}

/// Scoped variables keyed by the value of one event field, e.g. one
/// variable namespace per `process.pid`.
#[derive(Debug)]
pub struct KeyedVariables {
    key_field: String,
    scopes: RwLock<HashMap<ScalarValue, HashMap<String, FieldValue>>>,
}

impl KeyedVariables {
    #[must_use]
    pub fn new(key_field: &str) -> Self {
        Self {
            key_field: key_field.to_owned(),
            scopes: RwLock::new(HashMap::new()),
        }
    }

    /// A factory handing out the same shared store to every generation, so
    /// scoped state survives policy reloads.
    #[must_use]
    pub fn shared_factory(store: Arc<KeyedVariables>) -> VariableProviderFactory {
        Arc::new(move || Arc::clone(&store) as Arc<dyn VariableProvider>)
    }

    /// Drop the variables of one scope instance (e.g. on process exit).
    pub fn release(&self, key: &ScalarValue) {
        self.scopes.write().remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.read().is_empty()
    }

    fn key(&self, event: &dyn Event) -> Option<ScalarValue> {
        event.field(&self.key_field).ok()?.to_scalar()
    }
}

impl VariableProvider for KeyedVariables {
    fn get(&self, event: &dyn Event, name: &str) -> Option<FieldValue> {
        let key = self.key(event)?;
        self.scopes.read().get(&key)?.get(name).cloned()
    }

    fn set(
        &self,
        event: &dyn Event,
        name: &str,
        value: FieldValue,
        append: bool,
    ) -> Result<(), VariableError> {
        let key = self.key(event).ok_or_else(|| VariableError::ScopeUnavailable {
            name: name.to_owned(),
        })?;
        let mut scopes = self.scopes.write();
        store(scopes.entry(key).or_default(), name, value, append)
    }
}

/// Provider that never holds a value. Used when compiling the rule set
/// dedicated to approver analysis, which never evaluates events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVariables;

impl VariableProvider for NoopVariables {
    fn get(&self, _event: &dyn Event, _name: &str) -> Option<FieldValue> {
        None
    }

    fn set(
        &self,
        _event: &dyn Event,
        _name: &str,
        _value: FieldValue,
        _append: bool,
    ) -> Result<(), VariableError> {
        Ok(())
    }
}
