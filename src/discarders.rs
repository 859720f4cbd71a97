//! Runtime cache of (event type, field, value) triples proven not to match
//! any rule of the current rule set generation.
//!
//! The cache outlives rule sets. Publishing a new generation calls
//! [`DiscarderCache::reset`], which clears every entry and advances the
//! generation counter under the same write lock. Rule sets carry the
//! generation they were bound to: lookups from a superseded generation miss
//! and inserts from it are rejected, so a discarder learned under an old
//! policy can never suppress a match under the new one.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::ScalarValue;

pub const DEFAULT_CAPACITY: usize = 8192;

/// A value of one field that no rule reading the field can match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Discarder {
    pub event_type: String,
    pub field: String,
    pub value: ScalarValue,
}

impl fmt::Display for Discarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} == {}", self.event_type, self.field, self.value)
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_type: HashMap<String, HashMap<String, HashSet<ScalarValue>>>,
    len: usize,
}

/// Concurrent discarder cache shared by every rule set generation.
#[derive(Debug)]
pub struct DiscarderCache {
    generation: AtomicU64,
    capacity: usize,
    entries: RwLock<Entries>,
}

impl Default for DiscarderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiscarderCache {
    /// A cache holding at most `capacity` discarders. Once full, new
    /// discarders are dropped until the next reset.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            generation: AtomicU64::new(0),
            capacity,
            entries: RwLock::new(Entries::default()),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop every entry and start a new generation. Returns the generation
    /// the next rule set must be bound to.
    pub fn reset(&self) -> u64 {
        let mut entries = self.entries.write();
        entries.by_type.clear();
        entries.len = 0;
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn contains(
        &self,
        generation: u64,
        event_type: &str,
        field: &str,
        value: &ScalarValue,
    ) -> bool {
        let entries = self.entries.read();
        if self.generation() != generation {
            return false;
        }
        entries
            .by_type
            .get(event_type)
            .and_then(|fields| fields.get(field))
            .is_some_and(|values| values.contains(value))
    }

    /// Whether `generation` holds any discarder on `field` of `event_type`.
    /// Lets callers skip reading a field no discarder could match.
    #[must_use]
    pub fn has_field(&self, generation: u64, event_type: &str, field: &str) -> bool {
        let entries = self.entries.read();
        self.generation() == generation
            && entries
                .by_type
                .get(event_type)
                .and_then(|fields| fields.get(field))
                .is_some_and(|values| !values.is_empty())
    }

    /// Insert a discarder found by a rule set of `generation`. Returns
    /// `true` when the entry is new; stale generations and a full cache
    /// insert nothing.
    pub fn insert(&self, generation: u64, discarder: &Discarder) -> bool {
        let mut entries = self.entries.write();
        if self.generation() != generation || entries.len >= self.capacity {
            return false;
        }
        let inserted = entries
            .by_type
            .entry(discarder.event_type.clone())
            .or_default()
            .entry(discarder.field.clone())
            .or_default()
            .insert(discarder.value.clone());
        if inserted {
            entries.len += 1;
        }
        inserted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of every entry, sorted.
    #[must_use]
    pub fn entries(&self) -> Vec<Discarder> {
        let entries = self.entries.read();
        let mut out: Vec<Discarder> = entries
            .by_type
            .iter()
            .flat_map(|(event_type, fields)| {
                fields.iter().flat_map(move |(field, values)| {
                    values.iter().map(move |value| Discarder {
                        event_type: event_type.clone(),
                        field: field.clone(),
                        value: value.clone(),
                    })
                })
            })
            .collect();
        out.sort();
        out
    }
}
