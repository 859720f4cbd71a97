//! Per-rule token buckets gating how many matches are sent downstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::types::{Limit, RuleId};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats sink rejected '{rule}': {reason}")]
    Rejected { rule: String, reason: String },
}

/// Counters of one rule since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleStats {
    pub allowed: u64,
    pub dropped: u64,
}

/// Receives rate limiter counters.
pub trait StatsSink {
    /// # Errors
    ///
    /// Implementations report delivery failures as [`StatsError`].
    fn send(&self, rule: &str, stats: RuleStats) -> Result<(), StatsError>;
}

#[derive(Debug)]
struct Bucket {
    limit: Limit,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn full(limit: Limit, now: Instant) -> Self {
        Self {
            limit,
            tokens: f64::from(limit.burst),
            last: now,
        }
    }

    fn take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        let burst = f64::from(self.limit.burst);
        self.tokens = (self.tokens + elapsed * self.limit.rate).min(burst);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct RuleLimiter {
    bucket: Mutex<Bucket>,
    allowed: AtomicU64,
    dropped: AtomicU64,
}

impl RuleLimiter {
    fn new(limit: Limit, now: Instant) -> Self {
        Self {
            bucket: Mutex::new(Bucket::full(limit, now)),
            allowed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn limit(&self) -> Limit {
        self.bucket.lock().limit
    }
}

/// Token bucket per rule id. Buckets lock independently; the map itself is
/// only written by [`apply`](Self::apply) and lazily on first use of an id.
///
/// # Example
///
/// ```
/// use vigil::{Limit, RateLimiter};
///
/// let limiter = RateLimiter::new(Limit::new(2, 1.0));
/// limiter.apply(["shadow_open"]);
/// assert!(limiter.allow("shadow_open"));
/// assert!(limiter.allow("shadow_open"));
/// assert!(!limiter.allow("shadow_open"));
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    default: Limit,
    limiters: RwLock<HashMap<RuleId, Arc<RuleLimiter>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Limit::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(default: Limit) -> Self {
        Self {
            default,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn default_limit(&self) -> Limit {
        self.default
    }

    /// Keep buckets for `rule_ids` with the default limit and drop every
    /// other bucket.
    pub fn apply<I, S>(&self, rule_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply_with_limits(rule_ids.into_iter().map(|id| (id, None)));
    }

    /// Like [`apply`](Self::apply) with an optional custom limit per rule.
    /// Existing buckets keep their tokens unless their limit changed; new
    /// ones start full.
    pub fn apply_with_limits<I, S>(&self, rules: I)
    where
        I: IntoIterator<Item = (S, Option<Limit>)>,
        S: AsRef<str>,
    {
        let now = Instant::now();
        let mut limiters = self.limiters.write();
        let mut next = HashMap::with_capacity(limiters.len());
        for (id, limit) in rules {
            let id = id.as_ref();
            let limit = limit.unwrap_or(self.default);
            let limiter = match limiters.remove(id) {
                Some(existing) if existing.limit() == limit => existing,
                _ => Arc::new(RuleLimiter::new(limit, now)),
            };
            next.insert(id.to_owned(), limiter);
        }
        *limiters = next;
    }

    /// Whether an event matched by `rule_id` may be sent now. Consumes a
    /// token on success. An id never applied gets a default bucket.
    pub fn allow(&self, rule_id: &str) -> bool {
        self.allow_at(rule_id, Instant::now())
    }

    pub(crate) fn allow_at(&self, rule_id: &str, now: Instant) -> bool {
        let limiter = self.limiter(rule_id, now);
        let allowed = limiter.bucket.lock().take(now);
        if allowed {
            limiter.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            limiter.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(rule = rule_id, "event rate limited");
        }
        allowed
    }

    fn limiter(&self, rule_id: &str, now: Instant) -> Arc<RuleLimiter> {
        if let Some(limiter) = self.limiters.read().get(rule_id) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write();
        Arc::clone(
            limiters
                .entry(rule_id.to_owned())
                .or_insert_with(|| Arc::new(RuleLimiter::new(self.default, now))),
        )
    }

    /// Counters accumulated since the last [`send_stats`](Self::send_stats),
    /// sorted by rule id.
    #[must_use]
    pub fn stats(&self) -> Vec<(RuleId, RuleStats)> {
        let mut stats: Vec<(RuleId, RuleStats)> = self
            .limiters
            .read()
            .iter()
            .map(|(id, limiter)| {
                (
                    id.clone(),
                    RuleStats {
                        allowed: limiter.allowed.load(Ordering::Relaxed),
                        dropped: limiter.dropped.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Flush the counters of every rule to `sink` and reset them.
    ///
    /// # Errors
    ///
    /// Stops at the first [`StatsError`]; counters of rules not yet sent are
    /// kept for the next flush.
    pub fn send_stats(&self, sink: &dyn StatsSink) -> Result<(), StatsError> {
        let mut limiters: Vec<(RuleId, Arc<RuleLimiter>)> = self
            .limiters
            .read()
            .iter()
            .map(|(id, limiter)| (id.clone(), Arc::clone(limiter)))
            .collect();
        limiters.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, limiter) in limiters {
            let stats = RuleStats {
                allowed: limiter.allowed.swap(0, Ordering::Relaxed),
                dropped: limiter.dropped.swap(0, Ordering::Relaxed),
            };
            if stats == RuleStats::default() {
                continue;
            }
            if let Err(err) = sink.send(&id, stats) {
                limiter.allowed.fetch_add(stats.allowed, Ordering::Relaxed);
                limiter.dropped.fetch_add(stats.dropped, Ordering::Relaxed);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Rule ids with a bucket, sorted.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<RuleId> {
        let mut ids: Vec<RuleId> = self.limiters.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
