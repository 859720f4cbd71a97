//! The runtime wiring: loads policies, publishes rule sets and dispatches
//! matches through the rate limiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::approvers::{ApproverError, Approvers, Capabilities};
use crate::config::EngineConfig;
use crate::discarders::{Discarder, DiscarderCache};
use crate::error::LoadErrors;
use crate::loader::PolicyLoader;
use crate::policy::{DirectoryProvider, PolicyProvider};
use crate::rate_limiter::{RateLimiter, StatsError, StatsSink};
use crate::types::{Event, Opts, Rule, RuleId, RuleSet, RuleSetBuilder, RuleSetListener};

/// The capture and dispatch layer around the engine.
pub trait EventSink: Send + Sync {
    /// A rule matched and its rate limit allowed the event through.
    fn send(&self, rule: &Rule, event: &dyn Event);

    /// Events of `discarder.event_type` whose field holds the discarded
    /// value can be dropped at the source until the next
    /// [`flush_discarders`](Self::flush_discarders).
    fn on_discarder(&self, discarder: &Discarder) {
        let _ = discarder;
    }

    /// Every discarder pushed so far is invalid and must stop filtering
    /// events. Called on each reload, before the new rule set is published.
    fn flush_discarders(&self) {}

    /// An event raised outside rule evaluation under a reserved rule id,
    /// allowed through by that id's rate limit.
    fn send_custom(&self, rule_id: &str, event: &dyn Event) {
        let _ = (rule_id, event);
    }

    /// Called after every load with the complete approver set.
    fn apply_approvers(&self, approvers: &Approvers) {
        let _ = approvers;
    }

    /// Called after every load with the ids of the loaded rules.
    fn apply_rule_ids(&self, rule_ids: &[RuleId]) {
        let _ = rule_ids;
    }
}

/// Outcome of [`Engine::reload`].
#[derive(Debug)]
pub struct LoadReport {
    pub errors: LoadErrors,
    pub rules: usize,
    pub approvers: Approvers,
    pub approver_errors: Vec<ApproverError>,
    pub digest: String,
    pub policies_versions: Vec<String>,
    /// Discarder cache generation of the published rule set.
    pub generation: u64,
}

impl LoadReport {
    /// Whether the published rule set has no rule at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules == 0
    }
}

struct Dispatcher {
    sink: Arc<dyn EventSink>,
    rate_limiter: Arc<RateLimiter>,
    reloading: Arc<AtomicBool>,
}

impl RuleSetListener for Dispatcher {
    fn rule_match(&self, rule: &Rule, event: &dyn Event) {
        if self.rate_limiter.allow(rule.id()) {
            self.sink.send(rule, event);
        }
    }

    fn event_discarder_found(&self, discarder: &Discarder) {
        if !self.reloading.load(Ordering::Acquire) {
            self.sink.on_discarder(discarder);
        }
    }
}

/// Marks a reload in progress; the mark is cleared on drop, unwinding
/// included, so a panicking sink or callback cannot mute discarders.
struct ReloadGuard<'a>(&'a AtomicBool);

impl<'a> ReloadGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type LoadedCallback = Box<dyn Fn(&RuleSet) + Send + Sync>;

/// Owns the live [`RuleSet`] and swaps it atomically on reload. Evaluation
/// never waits for a reload; it keeps using the rule set it started with.
pub struct Engine {
    config: EngineConfig,
    opts: Opts,
    capabilities: Capabilities,
    sink: Arc<dyn EventSink>,
    /// Held for the whole reload so reloads run one at a time.
    loader: Mutex<PolicyLoader>,
    current: RwLock<Arc<RuleSet>>,
    discarders: Arc<DiscarderCache>,
    rate_limiter: Arc<RateLimiter>,
    reloading: Arc<AtomicBool>,
    callbacks: Mutex<Vec<LoadedCallback>>,
}

impl Engine {
    /// An engine with an empty rule set. Call [`reload`](Self::reload) or
    /// [`load_policies`](Self::load_policies) to load rules.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        opts: Opts,
        capabilities: Capabilities,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let opts = config.apply_to(opts);
        let discarders = Arc::new(DiscarderCache::new(config.discarder_cache_capacity));
        let rate_limiter = Arc::new(RateLimiter::new(config.default_rate_limit));

        let (mut empty, _) = RuleSetBuilder::new(opts.clone()).build();
        let generation = discarders.reset();
        empty.bind_discarders(Arc::clone(&discarders), generation);

        Self {
            config,
            opts,
            capabilities,
            sink,
            loader: Mutex::new(PolicyLoader::new()),
            current: RwLock::new(Arc::new(empty)),
            discarders,
            rate_limiter,
            reloading: Arc::new(AtomicBool::new(false)),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_provider(&self, provider: Arc<dyn PolicyProvider>) {
        self.loader.lock().add_provider(provider);
    }

    /// Add a [`DirectoryProvider`] for the configured policies directory.
    pub fn add_policies_dir(&self) {
        self.add_provider(Arc::new(DirectoryProvider::new(self.config.policies_dir.clone())));
    }

    /// Replace the providers and reload.
    pub fn load_policies(&self, providers: Vec<Arc<dyn PolicyProvider>>) -> LoadReport {
        {
            let mut loader = self.loader.lock();
            *loader = providers
                .into_iter()
                .fold(PolicyLoader::new(), PolicyLoader::provider);
        }
        self.reload()
    }

    /// Register a callback run after every successful publish.
    ///
    /// Callbacks run while the reload still holds the loader and callback
    /// locks, which are not reentrant: a callback must not call
    /// [`reload`](Self::reload), [`load_policies`](Self::load_policies),
    /// [`add_provider`](Self::add_provider) or `on_rules_loaded` on the same
    /// engine, or it deadlocks.
    pub fn on_rules_loaded(&self, callback: impl Fn(&RuleSet) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Load every provider, compile, compute approvers and publish the new
    /// rule set. Failures of individual definitions are reported, the rest
    /// is still published.
    pub fn reload(&self) -> LoadReport {
        let loader = self.loader.lock();
        let reloading = ReloadGuard::new(&self.reloading);

        let (set, mut errors) = loader.load();

        let (approver_set, _) = set.rule_set_builder(self.opts.for_approvers()).build();
        let (approvers, approver_errors) = approver_set.approvers_detailed(&self.capabilities);

        let dispatcher = Arc::new(Dispatcher {
            sink: Arc::clone(&self.sink),
            rate_limiter: Arc::clone(&self.rate_limiter),
            reloading: Arc::clone(&self.reloading),
        });
        let (mut ruleset, compile_errors) = set
            .rule_set_builder(self.opts.clone())
            .listener(dispatcher)
            .build();
        errors.extend(compile_errors);

        // Entries learned under the previous rule set must not outlive it.
        self.sink.flush_discarders();
        let generation = self.discarders.reset();
        ruleset.bind_discarders(Arc::clone(&self.discarders), generation);
        let ruleset = Arc::new(ruleset);
        *self.current.write() = Arc::clone(&ruleset);

        let limits = ruleset
            .rules()
            .iter()
            .map(|rule| (rule.id().to_owned(), rule.definition().rate_limit))
            .chain(
                self.opts
                    .reserved_rule_ids()
                    .iter()
                    .map(|id| (id.clone(), None)),
            );
        self.rate_limiter.apply_with_limits(limits);

        let rule_ids: Vec<RuleId> = ruleset.rule_ids().into_iter().map(str::to_owned).collect();
        self.sink.apply_rule_ids(&rule_ids);
        self.sink.apply_approvers(&approvers);
        for callback in self.callbacks.lock().iter() {
            callback(&ruleset);
        }

        drop(reloading);
        drop(loader);

        let policies_versions: Vec<String> = ruleset
            .policies_versions()
            .into_iter()
            .map(str::to_owned)
            .collect();
        tracing::info!(
            rules = ruleset.len(),
            policies = ruleset.policies().len(),
            versions = ?policies_versions,
            digest = set.digest(),
            approvers = approvers.len(),
            generation,
            "policies loaded"
        );
        for error in &errors {
            tracing::warn!(error = %error, "policy load error");
        }
        if ruleset.is_empty() {
            tracing::warn!("no rule loaded");
        }

        LoadReport {
            errors,
            rules: ruleset.len(),
            approvers,
            approver_errors,
            digest: set.digest().to_owned(),
            policies_versions,
            generation,
        }
    }

    /// Evaluate an event against the current rule set.
    pub fn handle_event(&self, event: &dyn Event) -> bool {
        self.rule_set().evaluate(event)
    }

    /// Send an event that needs no evaluation under a reserved rule id,
    /// subject to that id's rate limit. Returns whether it was sent.
    pub fn handle_custom_event(&self, rule_id: &str, event: &dyn Event) -> bool {
        if !self.rate_limiter.allow(rule_id) {
            return false;
        }
        self.sink.send_custom(rule_id, event);
        true
    }

    /// The current rule set. Holding it keeps that generation alive without
    /// blocking reloads.
    #[must_use]
    pub fn rule_set(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn discarders(&self) -> &DiscarderCache {
        &self.discarders
    }

    /// Flush rate limiter counters to `sink`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`StatsError`] of the sink.
    pub fn send_stats(&self, sink: &dyn StatsSink) -> Result<(), StatsError> {
        self.rate_limiter.send_stats(sink)
    }
}
