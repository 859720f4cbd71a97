use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::event::{Event, FieldError};
use super::evaluation_report::EvaluationReport;
use super::opts::Opts;
use super::rule::{ActionDefinition, MacroDefinition, PolicyInfo, Rule, RuleDefinition, RuleId};
use super::value::ValueKind;
use crate::approvers::{self, ApproverError, Approvers, Capabilities};
use crate::compile::{compile_rule, Environment};
use crate::discarders::{Discarder, DiscarderCache};
use crate::error::{LoadError, LoadErrors};
use crate::evaluate::EvalContext;
use crate::variables::VariableProvider;

/// Receives the outcome of [`RuleSet::evaluate`]. Callbacks run inline on the
/// evaluating thread and must not block.
pub trait RuleSetListener: Send + Sync {
    fn rule_match(&self, rule: &Rule, event: &dyn Event);

    /// A new discarder was cached. Only called for fields read by every rule
    /// of the event type, so events carrying that value can be dropped
    /// before they reach the rule set.
    fn event_discarder_found(&self, discarder: &Discarder) {
        let _ = discarder;
    }
}

/// Builder for constructing a [`RuleSet`].
///
/// Macros and rules are compiled together by [`build()`](Self::build); a
/// definition that fails is reported and skipped, the rest still loads.
///
/// # Example
///
/// ```
/// use vigil::{FieldRegistry, MapEvent, Opts, RuleDefinition, RuleSetBuilder, ValueKind};
///
/// let opts = Opts::new(FieldRegistry::new().field("open.filename", ValueKind::String));
/// let ruleset = RuleSetBuilder::new(opts)
///     .rule(RuleDefinition::new("shadow", r#"open.filename == "/etc/shadow""#))
///     .compile()
///     .unwrap();
///
/// assert!(ruleset.evaluate(&MapEvent::new("open").set("open.filename", "/etc/shadow")));
/// ```
#[must_use]
pub struct RuleSetBuilder {
    opts: Opts,
    macros: Vec<MacroDefinition>,
    rules: Vec<RuleDefinition>,
    listeners: Vec<Arc<dyn RuleSetListener>>,
    policies: Vec<PolicyInfo>,
    digest: Option<String>,
}

impl RuleSetBuilder {
    pub fn new(opts: Opts) -> Self {
        Self {
            opts,
            macros: Vec::new(),
            rules: Vec::new(),
            listeners: Vec::new(),
            policies: Vec::new(),
            digest: None,
        }
    }

    pub fn macro_def(mut self, definition: MacroDefinition) -> Self {
        self.macros.push(definition);
        self
    }

    pub fn rule(mut self, definition: RuleDefinition) -> Self {
        self.rules.push(definition);
        self
    }

    pub fn rules(mut self, definitions: impl IntoIterator<Item = RuleDefinition>) -> Self {
        self.rules.extend(definitions);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RuleSetListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Record a policy the definitions came from.
    pub fn policy(mut self, info: PolicyInfo) -> Self {
        self.policies.push(info);
        self
    }

    pub fn digest(mut self, digest: String) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Compile every definition. Failures are collected, never fatal.
    pub fn build(self) -> (RuleSet, LoadErrors) {
        let mut errors = LoadErrors::new();
        let mut env = Environment::new(self.opts);

        let mut macro_policies: HashMap<&str, &str> = HashMap::new();
        for def in &self.macros {
            if let Some(existing) = macro_policies.get(def.id.as_str()) {
                errors.push(LoadError::MacroIdCollision {
                    id: def.id.clone(),
                    policy: def.policy.name.clone(),
                    existing: (*existing).to_owned(),
                });
                continue;
            }
            match env.add_macro(def) {
                Ok(()) => {
                    macro_policies.insert(&def.id, &def.policy.name);
                }
                Err(source) => errors.push(LoadError::Macro {
                    id: def.id.clone(),
                    source,
                }),
            }
        }

        let definitions: Vec<&RuleDefinition> =
            self.rules.iter().filter(|d| !d.disabled).collect();
        for def in &definitions {
            env.declare_actions(def);
        }

        let mut rules: Vec<Rule> = Vec::with_capacity(definitions.len());
        let mut index: HashMap<RuleId, usize> = HashMap::new();
        for def in definitions {
            if env.opts.reserved_rule_ids.contains(&def.id) {
                errors.push(LoadError::ReservedRuleId { id: def.id.clone() });
                continue;
            }
            if let Some(&existing) = index.get(&def.id) {
                errors.push(LoadError::RuleIdCollision {
                    id: def.id.clone(),
                    policy: def.policy.name.clone(),
                    existing: rules[existing].policy().name.clone(),
                });
                continue;
            }
            let rule = match compile_rule(&env, def) {
                Ok(rule) => rule,
                Err(source) => {
                    errors.push(LoadError::Rule {
                        id: def.id.clone(),
                        source,
                    });
                    continue;
                }
            };
            if !env.opts.is_event_type_enabled(&rule.event_type) {
                errors.push(LoadError::EventTypeDisabled {
                    id: def.id.clone(),
                    event_type: rule.event_type.clone(),
                });
                continue;
            }
            index.insert(def.id.clone(), rules.len());
            rules.push(rule);
        }

        let buckets = bucketize(&rules, &env.opts);
        let discarders = Arc::new(DiscarderCache::default());
        let generation = discarders.reset();

        let ruleset = RuleSet {
            globals: Arc::clone(&env.opts.globals),
            scopes: env.scopes,
            opts: env.opts,
            rules,
            index,
            buckets,
            listeners: self.listeners,
            policies: self.policies,
            digest: self.digest,
            discarders,
            generation,
        };
        (ruleset, errors)
    }

    /// Compile every definition, failing if any of them is rejected.
    ///
    /// # Errors
    ///
    /// Returns every [`LoadError`] found.
    pub fn compile(self) -> Result<RuleSet, LoadErrors> {
        let (ruleset, errors) = self.build();
        if errors.is_empty() {
            Ok(ruleset)
        } else {
            Err(errors)
        }
    }
}

/// Rules of one event type, with the fields discarders can be learned on.
#[derive(Debug, Default)]
struct Bucket {
    /// Indices into [`RuleSet::rules`].
    rules: Vec<usize>,
    fields: Vec<DiscarderField>,
    /// For each entry of `rules`, its discarder-eligible fields as indices
    /// into `fields`.
    rule_fields: Vec<Vec<usize>>,
}

#[derive(Debug)]
struct DiscarderField {
    name: String,
    /// Positions in [`Bucket::rules`] of the rules reading the field.
    readers: Vec<usize>,
    read_by_all: bool,
}

fn bucketize(rules: &[Rule], opts: &Opts) -> HashMap<String, Bucket> {
    let mut buckets: HashMap<String, Bucket> = HashMap::new();
    for (index, rule) in rules.iter().enumerate() {
        buckets
            .entry(rule.event_type.clone())
            .or_default()
            .rules
            .push(index);
    }

    for bucket in buckets.values_mut() {
        let eligible: BTreeSet<&str> = bucket
            .rules
            .iter()
            .flat_map(|&i| rules[i].fields.iter())
            .map(String::as_str)
            .filter(|f| is_discarder_eligible(f, opts))
            .collect();

        bucket.rule_fields = vec![Vec::new(); bucket.rules.len()];
        for name in eligible {
            let readers: Vec<usize> = bucket
                .rules
                .iter()
                .enumerate()
                .filter(|&(_, &i)| rules[i].fields.contains(name))
                .map(|(pos, _)| pos)
                .collect();
            for &pos in &readers {
                bucket.rule_fields[pos].push(bucket.fields.len());
            }
            bucket.fields.push(DiscarderField {
                name: name.to_owned(),
                read_by_all: readers.len() == bucket.rules.len(),
                readers,
            });
        }
    }
    buckets
}

fn is_discarder_eligible(field: &str, opts: &Opts) -> bool {
    opts.is_discarder_supported(field)
        && opts.registry.get(field).is_some_and(|spec| {
            matches!(spec.kind, ValueKind::Bool | ValueKind::Int | ValueKind::String)
        })
}

enum Outcome {
    Discarded,
    Evaluated(Result<bool, FieldError>),
}

#[derive(Default)]
struct Trace {
    matched: Vec<String>,
    skipped: Vec<String>,
    failed: Vec<(String, String)>,
    discarders: Vec<Discarder>,
}

/// A compiled, immutable rule set partitioned by event type. Thread-safe and
/// designed to live behind `Arc`.
pub struct RuleSet {
    pub(crate) opts: Opts,
    pub(crate) rules: Vec<Rule>,
    index: HashMap<RuleId, usize>,
    buckets: HashMap<String, Bucket>,
    listeners: Vec<Arc<dyn RuleSetListener>>,
    policies: Vec<PolicyInfo>,
    digest: Option<String>,
    scopes: HashMap<String, Arc<dyn VariableProvider>>,
    globals: Arc<dyn VariableProvider>,
    discarders: Arc<DiscarderCache>,
    generation: u64,
}

impl RuleSet {
    /// Evaluate every rule of the event's type. Matches are reported to the
    /// listeners; the return value says whether any rule matched.
    ///
    /// A rule whose field accessor fails or panics counts as a non-match.
    pub fn evaluate(&self, event: &dyn Event) -> bool {
        self.run(event, None)
    }

    /// Evaluate with diagnostics. Listeners and the discarder cache are
    /// used exactly as by [`evaluate()`](Self::evaluate).
    pub fn evaluate_detailed(&self, event: &dyn Event) -> EvaluationReport {
        let start = Instant::now();
        let mut trace = Trace::default();
        self.run(event, Some(&mut trace));
        EvaluationReport::new(
            trace.matched,
            trace.skipped,
            trace.failed,
            trace.discarders,
            start.elapsed(),
        )
    }

    fn run(&self, event: &dyn Event, mut trace: Option<&mut Trace>) -> bool {
        let event_type = event.event_type();
        let Some(bucket) = self.buckets.get(event_type) else {
            return false;
        };
        let ctx = EvalContext::new(event);
        let mut matched = false;

        for (pos, &index) in bucket.rules.iter().enumerate() {
            let rule = &self.rules[index];
            // Accessors, discarder lookups and actions all run under the
            // guard so a panicking field only fails this rule.
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if self.is_discarded(&ctx, event_type, bucket, pos) {
                    return Outcome::Discarded;
                }
                let result = rule.node.eval(&ctx);
                if result == Ok(true) {
                    self.run_actions(rule, event);
                }
                Outcome::Evaluated(result)
            }));

            match outcome {
                Ok(Outcome::Discarded) => {
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.skipped.push(rule.id().to_owned());
                    }
                }
                Ok(Outcome::Evaluated(Ok(true))) => {
                    matched = true;
                    for listener in &self.listeners {
                        listener.rule_match(rule, event);
                    }
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.matched.push(rule.id().to_owned());
                    }
                }
                Ok(Outcome::Evaluated(Ok(false))) => {}
                Ok(Outcome::Evaluated(Err(err))) => {
                    tracing::debug!(rule = rule.id(), error = %err, "rule evaluation failed");
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.failed.push((rule.id().to_owned(), err.to_string()));
                    }
                }
                Err(_) => {
                    tracing::debug!(rule = rule.id(), "rule evaluation panicked");
                    if let Some(trace) = trace.as_deref_mut() {
                        trace
                            .failed
                            .push((rule.id().to_owned(), "evaluation panicked".to_owned()));
                    }
                }
            }
        }

        if !matched {
            self.find_discarders(&ctx, event_type, bucket, trace);
        }
        matched
    }

    fn is_discarded(
        &self,
        ctx: &EvalContext<'_>,
        event_type: &str,
        bucket: &Bucket,
        pos: usize,
    ) -> bool {
        bucket.rule_fields[pos].iter().any(|&f| {
            let name = &bucket.fields[f].name;
            // Only resolve a field the rule has not read yet when a discarder
            // on it exists; otherwise leave it to short-circuit evaluation.
            let value = match ctx.cached(name) {
                Some(value) => value,
                None if self.discarders.has_field(self.generation, event_type, name) => {
                    match ctx.field(name) {
                        Ok(value) => value,
                        Err(_) => return false,
                    }
                }
                None => return false,
            };
            value.to_scalar().is_some_and(|value| {
                self.discarders
                    .contains(self.generation, event_type, name, &value)
            })
        })
    }

    /// Cache every field value, among those already read, that no rule
    /// reading the field can match whatever the other fields hold.
    fn find_discarders(
        &self,
        ctx: &EvalContext<'_>,
        event_type: &str,
        bucket: &Bucket,
        mut trace: Option<&mut Trace>,
    ) {
        for field in &bucket.fields {
            let Some(value) = ctx.cached(&field.name) else {
                continue;
            };
            let Some(scalar) = value.to_scalar() else {
                continue;
            };
            let discardable = field.readers.iter().all(|&pos| {
                let rule = &self.rules[bucket.rules[pos]];
                rule.node.partial(&field.name, &value) == Some(false)
            });
            if !discardable {
                continue;
            }

            let discarder = Discarder {
                event_type: event_type.to_owned(),
                field: field.name.clone(),
                value: scalar,
            };
            if !self.discarders.insert(self.generation, &discarder) {
                continue;
            }
            tracing::debug!(discarder = %discarder, "new discarder");
            if field.read_by_all {
                for listener in &self.listeners {
                    listener.event_discarder_found(&discarder);
                }
            }
            if let Some(trace) = trace.as_deref_mut() {
                trace.discarders.push(discarder);
            }
        }
    }

    fn run_actions(&self, rule: &Rule, event: &dyn Event) {
        for action in &rule.definition.actions {
            let ActionDefinition::Set(set) = action;
            let provider = match &set.scope {
                Some(scope) => self.scopes.get(scope),
                None => Some(&self.globals),
            };
            let Some(provider) = provider else {
                continue;
            };
            if let Err(err) = provider.set(event, &set.name, set.stored_value(), set.append) {
                tracing::debug!(
                    rule = rule.id(),
                    variable = %set.variable_name(),
                    error = %err,
                    "set action failed"
                );
            }
        }
    }

    /// Attach this rule set to a shared discarder cache generation.
    pub(crate) fn bind_discarders(&mut self, cache: Arc<DiscarderCache>, generation: u64) {
        self.discarders = cache;
        self.generation = generation;
    }

    /// Register a listener. Only possible before the rule set is shared.
    pub fn add_listener(&mut self, listener: Arc<dyn RuleSetListener>) {
        self.listeners.push(listener);
    }

    /// Approvers per event type for the capture layer.
    #[must_use]
    pub fn approvers(&self, capabilities: &Capabilities) -> Approvers {
        self.approvers_detailed(capabilities).0
    }

    /// Approvers along with the reason every non-approvable rule has none.
    #[must_use]
    pub fn approvers_detailed(
        &self,
        capabilities: &Capabilities,
    ) -> (Approvers, Vec<ApproverError>) {
        let mut event_types: Vec<&String> = self.buckets.keys().collect();
        event_types.sort();
        approvers::compute(
            event_types.into_iter().map(|event_type| {
                let rules = self.buckets[event_type]
                    .rules
                    .iter()
                    .map(|&i| &self.rules[i])
                    .collect();
                (event_type.as_str(), rules)
            }),
            capabilities,
        )
    }

    /// Distinct versions of the loaded policies, in load order.
    #[must_use]
    pub fn policies_versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = Vec::new();
        for policy in &self.policies {
            if !policy.version.is_empty() && !versions.contains(&policy.version.as_str()) {
                versions.push(&policy.version);
            }
        }
        versions
    }

    #[must_use]
    pub fn policies(&self) -> &[PolicyInfo] {
        &self.policies
    }

    /// Rule ids in load order.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::id).collect()
    }

    #[must_use]
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Event types with at least one rule, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// BLAKE3 digest of the merged policy definitions, when loaded through a
    /// [`PolicyLoader`](crate::PolicyLoader).
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    #[must_use]
    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    #[must_use]
    pub fn discarders(&self) -> &DiscarderCache {
        &self.discarders
    }

    /// The discarder cache generation this rule set reads and writes.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rule_ids())
            .field("event_types", &self.event_types())
            .field("listeners", &self.listeners.len())
            .field("digest", &self.digest)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuleSet({} rules, {} event types)",
            self.rules.len(),
            self.buckets.len(),
        )
    }
}
