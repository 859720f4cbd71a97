use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::field_registry::FieldRegistry;
use super::rule::RuleId;
use super::value::FieldValue;
use crate::variables::{
    GlobalVariables, NoopVariables, Variable, VariableProvider, VariableProviderFactory,
};

/// Compilation environment shared by every rule of a rule set: the field
/// model, constants, variables and the knobs that restrict what gets loaded.
///
/// # Example
///
/// ```
/// use vigil::{FieldRegistry, FieldValue, Opts, ValueKind};
///
/// let opts = Opts::new(FieldRegistry::new().field("open.filename", ValueKind::String))
///     .with_constant("O_CREAT", FieldValue::Int(64))
///     .with_supported_discarders(["open.filename"]);
/// assert!(opts.is_discarder_supported("open.filename"));
/// ```
#[derive(Clone)]
pub struct Opts {
    pub(crate) registry: FieldRegistry,
    pub(crate) constants: HashMap<String, FieldValue>,
    pub(crate) variables: HashMap<String, Variable>,
    pub(crate) scopes: HashMap<String, VariableProviderFactory>,
    pub(crate) globals: Arc<dyn VariableProvider>,
    pub(crate) supported_discarders: Option<HashSet<String>>,
    pub(crate) event_types_enabled: Option<HashSet<String>>,
    pub(crate) reserved_rule_ids: Vec<RuleId>,
}

impl Opts {
    #[must_use]
    pub fn new(registry: FieldRegistry) -> Self {
        Self {
            registry,
            constants: HashMap::new(),
            variables: HashMap::new(),
            scopes: HashMap::new(),
            globals: Arc::new(GlobalVariables::new()),
            supported_discarders: None,
            event_types_enabled: None,
            reserved_rule_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_constant(mut self, name: &str, value: FieldValue) -> Self {
        self.constants.insert(name.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_constants(mut self, constants: HashMap<String, FieldValue>) -> Self {
        self.constants.extend(constants);
        self
    }

    /// Declare a read-only global variable computed from the event.
    #[must_use]
    pub fn with_variable(mut self, name: &str, variable: Variable) -> Self {
        self.variables.insert(name.to_owned(), variable);
        self
    }

    /// Declare a variable scope. `${scope.name}` reads and `set` actions
    /// with `scope: <scope>` go through the provider the factory returns.
    #[must_use]
    pub fn with_scope(mut self, scope: &str, factory: VariableProviderFactory) -> Self {
        self.scopes.insert(scope.to_owned(), factory);
        self
    }

    /// Replace the store backing unscoped `set` actions.
    #[must_use]
    pub fn with_global_store(mut self, store: Arc<dyn VariableProvider>) -> Self {
        self.globals = store;
        self
    }

    /// Restrict discarder caching to these fields. Without this call every
    /// scalar field is eligible.
    #[must_use]
    pub fn with_supported_discarders<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_discarders = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Only load rules for these event types.
    #[must_use]
    pub fn with_event_types_enabled<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types_enabled = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    /// Rule ids owned by the host (e.g. internally generated events). User
    /// policies cannot define them.
    #[must_use]
    pub fn with_reserved_rule_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_rule_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    #[must_use]
    pub fn reserved_rule_ids(&self) -> &[RuleId] {
        &self.reserved_rule_ids
    }

    #[must_use]
    pub fn is_discarder_supported(&self, field: &str) -> bool {
        self.supported_discarders
            .as_ref()
            .is_none_or(|fields| fields.contains(field))
    }

    #[must_use]
    pub fn is_event_type_enabled(&self, event_type: &str) -> bool {
        self.event_types_enabled
            .as_ref()
            .is_none_or(|types| types.contains(event_type))
    }

    /// The same environment with every variable store replaced by
    /// [`NoopVariables`]. Used for the rule set dedicated to approver
    /// analysis so that compiling it never touches live state.
    #[must_use]
    pub fn for_approvers(&self) -> Self {
        let mut opts = self.clone();
        let mock: VariableProviderFactory =
            Arc::new(|| Arc::new(NoopVariables) as Arc<dyn VariableProvider>);
        for factory in opts.scopes.values_mut() {
            *factory = Arc::clone(&mock);
        }
        opts.globals = Arc::new(NoopVariables);
        opts
    }
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<&String> = self.scopes.keys().collect();
        scopes.sort();
        f.debug_struct("Opts")
            .field("fields", &self.registry.len())
            .field("constants", &self.constants.len())
            .field("variables", &self.variables.len())
            .field("scopes", &scopes)
            .field("supported_discarders", &self.supported_discarders)
            .field("event_types_enabled", &self.event_types_enabled)
            .field("reserved_rule_ids", &self.reserved_rule_ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::KeyedVariables;
    use crate::{MapEvent, ValueKind};

    #[test]
    fn discarders_default_to_all_fields() {
        let opts = Opts::new(FieldRegistry::new());
        assert!(opts.is_discarder_supported("open.filename"));
        let opts = opts.with_supported_discarders(["open.filename"]);
        assert!(opts.is_discarder_supported("open.filename"));
        assert!(!opts.is_discarder_supported("open.flags"));
    }

    #[test]
    fn event_types_default_to_all() {
        let opts = Opts::new(FieldRegistry::new());
        assert!(opts.is_event_type_enabled("exec"));
        let opts = opts.with_event_types_enabled(["open"]);
        assert!(opts.is_event_type_enabled("open"));
        assert!(!opts.is_event_type_enabled("exec"));
    }

    #[test]
    fn approver_opts_mock_every_store() {
        let store = Arc::new(KeyedVariables::new("process.pid"));
        let opts = Opts::new(FieldRegistry::new().field("exec.filename", ValueKind::String))
            .with_scope("process", KeyedVariables::shared_factory(Arc::clone(&store)));
        let event = MapEvent::new("exec").set("process.pid", 1_i64);

        let mocked = opts.for_approvers();
        let provider = mocked.scopes["process"]();
        provider
            .set(&event, "seen", FieldValue::Bool(true), false)
            .unwrap();
        assert!(store.is_empty());
        assert_eq!(provider.get(&event, "seen"), None);
    }
}
