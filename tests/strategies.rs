#![allow(dead_code)]

use proptest::prelude::*;
use vigil::{
    field, Expr, FieldRegistry, FieldValue, MapEvent, Opts, RuleDefinition, RuleSet,
    RuleSetBuilder, ValueKind,
};

// --- Fixed field schema (event type "open") ---
// open.filename  : string, one of FILENAMES
// open.flags     : i64 (0..=8)
// open.truncated : bool

pub const FILENAMES: &[&str] = &[
    "/etc/shadow",
    "/etc/passwd",
    "/tmp/x",
    "/tmp/y",
    "/usr/bin/ls",
];

const GLOBS: &[&str] = &["/tmp/*", "/etc/*", "*/ls", "/usr/*/ls"];

pub fn opts() -> Opts {
    Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int)
            .field("open.truncated", ValueKind::Bool),
    )
}

/// Generate an open event that aligns with the fixed field schema.
pub fn arb_event() -> impl Strategy<Value = MapEvent> {
    (prop::sample::select(FILENAMES), 0_i64..=8, any::<bool>()).prop_map(
        |(filename, flags, truncated)| {
            MapEvent::new("open")
                .set("open.filename", filename)
                .set("open.flags", flags)
                .set("open.truncated", truncated)
        },
    )
}

/// Generate a leaf comparison on a random field of the schema.
fn arb_leaf_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (prop::sample::select(FILENAMES), any::<bool>()).prop_map(|(val, is_eq)| {
            if is_eq {
                field("open.filename").eq(val)
            } else {
                field("open.filename").neq(val)
            }
        }),
        prop::sample::subsequence(FILENAMES, 1..3)
            .prop_map(|vals| field("open.filename").in_list(vals)),
        prop::sample::select(GLOBS).prop_map(|glob| field("open.filename").matches(glob)),
        (0_i64..=8, prop::sample::select(&[0u8, 1, 2, 3, 4, 5][..])).prop_map(|(val, op)| {
            let f = field("open.flags");
            match op {
                0 => f.eq(val),
                1 => f.neq(val),
                2 => f.gt(val),
                3 => f.gte(val),
                4 => f.lt(val),
                _ => f.lte(val),
            }
        }),
        any::<bool>().prop_map(|val| field("open.truncated").eq(val)),
    ]
}

/// Generate a composite expression tree (AND, OR, NOT of leaves), bounded depth.
pub fn arb_expr(max_depth: u32) -> impl Strategy<Value = Expr> {
    arb_leaf_expr().prop_recursive(max_depth, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.and(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.or(b)),
            inner.prop_map(|e| !e),
        ]
    })
}

/// A generated set of rules, all on the "open" event type.
#[derive(Debug, Clone)]
pub struct GenRuleSet {
    pub rules: Vec<(String, Expr)>,
}

impl GenRuleSet {
    #[must_use]
    pub fn definitions(&self) -> Vec<RuleDefinition> {
        self.rules
            .iter()
            .map(|(id, expr)| RuleDefinition::new(id, &expr.to_string()))
            .collect()
    }

    /// Compile into an actual `RuleSet`.
    ///
    /// # Panics
    ///
    /// Panics if the generated rules fail to compile (should not happen
    /// with valid generators).
    #[must_use]
    pub fn compile(&self) -> RuleSet {
        RuleSetBuilder::new(opts())
            .rules(self.definitions())
            .compile()
            .expect("generated rule set should compile")
    }
}

pub fn arb_ruleset() -> impl Strategy<Value = GenRuleSet> {
    prop::collection::vec(arb_expr(3), 1..=5).prop_map(|exprs| GenRuleSet {
        rules: exprs
            .into_iter()
            .enumerate()
            .map(|(i, expr)| (format!("rule_{i}"), expr))
            .collect(),
    })
}

/// Overwrite one field of an event.
#[must_use]
pub fn with_field(event: &MapEvent, name: &str, value: FieldValue) -> MapEvent {
    let mut event = event.clone();
    event.insert(name, value);
    event
}
