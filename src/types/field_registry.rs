use std::collections::HashMap;

use super::value::ValueKind;

/// Operator override installed on a field. Every comparison touching the
/// field uses the overridden semantics; other fields keep the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOverride {
    /// Lower-case both sides before comparing scalars and patterns.
    /// Fields carrying this override never produce approvers.
    CaseInsensitive,
}

/// Static description of one event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub kind: ValueKind,
    /// The event type this field belongs to. Fields shared by every event
    /// type (e.g. `process.*`) have none.
    pub event_type: Option<String>,
    pub op_override: Option<OpOverride>,
}

impl FieldSpec {
    #[must_use]
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            event_type: None,
            op_override: None,
        }
    }

    #[must_use]
    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_type = Some(event_type.to_owned());
        self
    }

    #[must_use]
    pub fn with_override(mut self, op_override: OpOverride) -> Self {
        self.op_override = Some(op_override);
        self
    }
}

/// Maps field names (e.g. `"open.filename"`) to their [`FieldSpec`].
///
/// The registry is the compile-time model of an event: identifiers in rule
/// expressions that are not macros or constants must resolve here.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldSpec>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field scoped to the event type named by its first path
    /// segment (`open.filename` belongs to `open`).
    #[must_use]
    pub fn field(mut self, name: &str, kind: ValueKind) -> Self {
        let event_type = name.split('.').next().unwrap_or(name);
        let spec = FieldSpec::new(kind).event_type(event_type);
        self.fields.insert(name.to_owned(), spec);
        self
    }

    /// Register a field available on every event type.
    #[must_use]
    pub fn common_field(mut self, name: &str, kind: ValueKind) -> Self {
        self.fields.insert(name.to_owned(), FieldSpec::new(kind));
        self
    }

    /// Register a field with an explicit spec.
    #[must_use]
    pub fn with_spec(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_owned(), spec);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_takes_event_type_from_prefix() {
        let reg = FieldRegistry::new().field("open.filename", ValueKind::String);
        let spec = reg.get("open.filename").unwrap();
        assert_eq!(spec.event_type.as_deref(), Some("open"));
        assert_eq!(spec.kind, ValueKind::String);
        assert_eq!(spec.op_override, None);
    }

    #[test]
    fn common_field_has_no_event_type() {
        let reg = FieldRegistry::new().common_field("process.name", ValueKind::String);
        assert_eq!(reg.get("process.name").unwrap().event_type, None);
    }

    #[test]
    fn explicit_spec_with_override() {
        let reg = FieldRegistry::new().with_spec(
            "dns.question.name",
            FieldSpec::new(ValueKind::String)
                .event_type("dns")
                .with_override(OpOverride::CaseInsensitive),
        );
        assert_eq!(
            reg.get("dns.question.name").unwrap().op_override,
            Some(OpOverride::CaseInsensitive)
        );
    }

    #[test]
    fn missing_and_len() {
        let reg = FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int);
        assert_eq!(reg.len(), 2);
        assert!(!reg.is_empty());
        assert!(reg.get("exec.filename").is_none());
        assert!(FieldRegistry::new().is_empty());
    }
}
