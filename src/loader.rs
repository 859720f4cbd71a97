//! Merging the policies of every provider into one set of definitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LoadError, LoadErrors};
use crate::policy::PolicyProvider;
use crate::types::{
    Combine, MacroDefinition, Opts, PolicyInfo, RuleDefinition, RuleSet, RuleSetBuilder,
};

/// The merged definitions of one load, ready to be compiled.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub policies: Vec<PolicyInfo>,
    pub rules: Vec<RuleDefinition>,
    pub macros: Vec<MacroDefinition>,
    digest: String,
}

impl PolicySet {
    /// Hex BLAKE3 digest of the merged definitions. Two loads of unchanged
    /// policies have the same digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// A builder holding every definition of the set.
    pub fn rule_set_builder(&self, opts: Opts) -> RuleSetBuilder {
        let mut builder = RuleSetBuilder::new(opts)
            .rules(self.rules.iter().cloned())
            .digest(self.digest.clone());
        for def in &self.macros {
            builder = builder.macro_def(def.clone());
        }
        for info in &self.policies {
            builder = builder.policy(info.clone());
        }
        builder
    }
}

/// Loads policies from an ordered list of providers. Earlier providers win
/// id collisions unless the later definition opts into `combine: override`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vigil::{
///     FieldRegistry, Opts, Policy, PolicyLoader, RuleDefinition, StaticProvider, ValueKind,
/// };
///
/// let provider = StaticProvider::new("builtin").policy(
///     Policy::new("default", "builtin")
///         .rule(RuleDefinition::new("shadow", r#"open.filename == "/etc/shadow""#)),
/// );
/// let loader = PolicyLoader::new().provider(Arc::new(provider));
///
/// let opts = Opts::new(FieldRegistry::new().field("open.filename", ValueKind::String));
/// let (ruleset, errors) = loader.load_rule_set(opts);
/// assert!(errors.is_empty());
/// assert_eq!(ruleset.rule_ids(), vec!["shadow"]);
/// ```
#[derive(Default, Clone)]
pub struct PolicyLoader {
    providers: Vec<Arc<dyn PolicyProvider>>,
}

impl PolicyLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn PolicyProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn add_provider(&mut self, provider: Arc<dyn PolicyProvider>) {
        self.providers.push(provider);
    }

    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn PolicyProvider>] {
        &self.providers
    }

    /// Query every provider and merge their policies.
    pub fn load(&self) -> (PolicySet, LoadErrors) {
        let mut errors = LoadErrors::new();
        let mut merge = Merge::default();

        for provider in &self.providers {
            let (policies, provider_errors) = provider.load_policies();
            errors.extend(provider_errors);
            for policy in policies {
                merge.policy(policy.info, policy.macros, policy.rules, &mut errors);
            }
        }

        let set = merge.finish();
        tracing::debug!(
            providers = self.providers.len(),
            policies = set.policies.len(),
            rules = set.rules.len(),
            macros = set.macros.len(),
            digest = %set.digest,
            "policies merged"
        );
        (set, errors)
    }

    /// Load and compile in one step.
    pub fn load_rule_set(&self, opts: Opts) -> (RuleSet, LoadErrors) {
        let (set, mut errors) = self.load();
        let (ruleset, compile_errors) = set.rule_set_builder(opts).build();
        errors.extend(compile_errors);
        (ruleset, errors)
    }
}

#[derive(Default)]
struct Merge {
    policies: Vec<PolicyInfo>,
    rules: Vec<Option<RuleDefinition>>,
    rule_index: HashMap<String, usize>,
    macros: Vec<MacroDefinition>,
    macro_index: HashMap<String, usize>,
}

impl Merge {
    fn policy(
        &mut self,
        info: PolicyInfo,
        macros: Vec<MacroDefinition>,
        rules: Vec<RuleDefinition>,
        errors: &mut LoadErrors,
    ) {
        for mut def in macros {
            def.policy = info.clone();
            match self.macro_index.get(&def.id) {
                Some(&i) if def.combine == Some(Combine::Override) => self.macros[i] = def,
                Some(&i) => errors.push(LoadError::MacroIdCollision {
                    id: def.id.clone(),
                    policy: info.name.clone(),
                    existing: self.macros[i].policy.name.clone(),
                }),
                None => {
                    self.macro_index.insert(def.id.clone(), self.macros.len());
                    self.macros.push(def);
                }
            }
        }

        for mut def in rules {
            def.policy = info.clone();
            let overrides = def.combine == Some(Combine::Override);
            match self.rule_index.get(&def.id).copied() {
                Some(i) if overrides && def.disabled => {
                    self.rules[i] = None;
                    self.rule_index.remove(&def.id);
                }
                Some(i) if overrides => self.rules[i] = Some(def),
                Some(_) if def.disabled => {}
                Some(i) => {
                    let existing = self.rules[i]
                        .as_ref()
                        .map(|r| r.policy.name.clone())
                        .unwrap_or_default();
                    errors.push(LoadError::RuleIdCollision {
                        id: def.id.clone(),
                        policy: info.name.clone(),
                        existing,
                    });
                }
                None if def.disabled => {}
                None => {
                    self.rule_index.insert(def.id.clone(), self.rules.len());
                    self.rules.push(Some(def));
                }
            }
        }

        self.policies.push(info);
    }

    fn finish(self) -> PolicySet {
        let rules: Vec<RuleDefinition> = self.rules.into_iter().flatten().collect();
        let digest = digest(&self.macros, &rules);
        PolicySet {
            policies: self.policies,
            rules,
            macros: self.macros,
            digest,
        }
    }
}

fn digest(macros: &[MacroDefinition], rules: &[RuleDefinition]) -> String {
    fn feed(hasher: &mut blake3::Hasher, field: &str) {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    let mut hasher = blake3::Hasher::new();
    for def in macros {
        feed(&mut hasher, "macro");
        feed(&mut hasher, &def.id);
        feed(&mut hasher, def.expression.as_deref().unwrap_or_default());
        for value in &def.values {
            feed(&mut hasher, value);
        }
    }
    for def in rules {
        feed(&mut hasher, "rule");
        feed(&mut hasher, &def.id);
        feed(&mut hasher, &def.expression);
        feed(&mut hasher, &format!("{:?}", def.actions));
        feed(&mut hasher, &format!("{:?}", def.rate_limit));
        feed(&mut hasher, &format!("{:?}", def.tags));
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, StaticProvider};

    fn provider(name: &str, policy: Policy) -> Arc<dyn PolicyProvider> {
        Arc::new(StaticProvider::new(name).policy(policy))
    }

    #[test]
    fn first_provider_wins_collisions() {
        let loader = PolicyLoader::new()
            .provider(provider(
                "a",
                Policy::new("default", "a").rule(RuleDefinition::new("R1", "open.flags == 1")),
            ))
            .provider(provider(
                "b",
                Policy::new("custom", "b").rule(RuleDefinition::new("R1", "open.flags == 2")),
            ));
        let (set, errors) = loader.load();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].expression, "open.flags == 1");
        assert_eq!(set.rules[0].policy.name, "default");
        assert_eq!(
            errors.to_string(),
            "1 policy load error(s)\n  - rule 'R1' from policy 'custom' collides with the definition from policy 'default'"
        );
    }

    #[test]
    fn override_replaces_in_place() {
        let loader = PolicyLoader::new()
            .provider(provider(
                "a",
                Policy::new("default", "a")
                    .rule(RuleDefinition::new("R1", "open.flags == 1"))
                    .rule(RuleDefinition::new("R2", "open.flags == 2"))
                    .macro_def(MacroDefinition::new("m", "open.flags == 3")),
            ))
            .provider(provider(
                "b",
                Policy::new("custom", "b")
                    .rule(RuleDefinition::new("R1", "open.flags == 9").combine(Combine::Override))
                    .macro_def(MacroDefinition::new("m", "open.flags == 4").combine(Combine::Override)),
            ));
        let (set, errors) = loader.load();
        assert!(errors.is_empty());
        let ids: Vec<&str> = set.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
        assert_eq!(set.rules[0].expression, "open.flags == 9");
        assert_eq!(set.macros[0].expression.as_deref(), Some("open.flags == 4"));
    }

    #[test]
    fn disabled_rules() {
        let loader = PolicyLoader::new()
            .provider(provider(
                "a",
                Policy::new("default", "a")
                    .rule(RuleDefinition::new("R1", "open.flags == 1"))
                    .rule(RuleDefinition::new("R2", "open.flags == 2").disabled()),
            ))
            .provider(provider(
                "b",
                Policy::new("custom", "b").rule(
                    RuleDefinition::new("R1", "open.flags == 1")
                        .disabled()
                        .combine(Combine::Override),
                ),
            ));
        let (set, errors) = loader.load();
        assert!(errors.is_empty());
        assert!(set.rules.is_empty());
    }

    #[test]
    fn digest_is_stable_and_content_based() {
        let policy = || {
            Policy::new("default", "a").rule(RuleDefinition::new("R1", "open.flags == 1"))
        };
        let first = PolicyLoader::new().provider(provider("a", policy())).load().0;
        let second = PolicyLoader::new().provider(provider("a", policy())).load().0;
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);

        let changed = PolicyLoader::new()
            .provider(provider(
                "a",
                Policy::new("default", "a").rule(RuleDefinition::new("R1", "open.flags == 2")),
            ))
            .load()
            .0;
        assert_ne!(first.digest(), changed.digest());
    }
}
