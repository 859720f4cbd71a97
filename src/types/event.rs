use std::collections::HashMap;

use thiserror::Error;

use super::value::{FieldValue, ValueKind};

/// Failure of a field accessor. Evaluation treats it as a non-match for the
/// rule being evaluated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field '{field}' not found")]
    NotFound { field: String },

    #[error("field '{field}' has kind {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("field '{field}' unavailable: {reason}")]
    Unavailable { field: String, reason: String },

    #[error("field '{field}' is read-only")]
    ReadOnly { field: String },
}

/// An observed system activity event.
///
/// Rules only see events through this trait. Implementations may resolve
/// fields lazily; [`RuleSet::evaluate`](crate::RuleSet::evaluate) reads each
/// field at most once per evaluation.
pub trait Event {
    /// The event type tag used to pick the rule bucket (e.g. `"open"`).
    fn event_type(&self) -> &str;

    /// Read a field by name.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] when the field is unknown or cannot be resolved.
    fn field(&self, name: &str) -> Result<FieldValue, FieldError>;

    /// Set a field by name.
    ///
    /// # Errors
    ///
    /// The default implementation rejects every write with [`FieldError::ReadOnly`].
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        let _ = value;
        Err(FieldError::ReadOnly {
            field: name.to_owned(),
        })
    }
}

/// An [`Event`] backed by a flat map of field names to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapEvent {
    event_type: String,
    fields: HashMap<String, FieldValue>,
}

impl MapEvent {
    #[must_use]
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_owned(),
            fields: HashMap::new(),
        }
    }

    /// Set a value, builder style.
    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_owned(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

impl Event for MapEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn field(&self, name: &str) -> Result<FieldValue, FieldError> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| FieldError::NotFound {
                field: name.to_owned(),
            })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        self.insert(name, value);
        Ok(())
    }
}
