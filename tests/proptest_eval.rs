use proptest::prelude::*;
use vigil::{
    field, Expr, FieldRegistry, FieldValue, MapEvent, Opts, RuleDefinition, RuleSet,
    RuleSetBuilder, ValueKind,
};

fn opts() -> Opts {
    Opts::new(
        FieldRegistry::new()
            .field("open.flags", ValueKind::Int)
            .field("open.mode", ValueKind::Int)
            .field("open.filename", ValueKind::String),
    )
}

fn single(expr: &Expr) -> RuleSet {
    RuleSetBuilder::new(opts())
        .rule(RuleDefinition::new("r", &expr.to_string()))
        .compile()
        .unwrap()
}

/// Generate a random `FieldValue`, of any kind.
fn arb_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<i64>().prop_map(FieldValue::Int),
        any::<bool>().prop_map(FieldValue::Bool),
        "[a-z/]{1,8}".prop_map(FieldValue::String),
        prop::collection::vec("[a-z]{1,4}", 0..3).prop_map(FieldValue::StringArray),
    ]
}

/// Generate a leaf comparison on `open.flags`.
fn arb_flags_expr() -> impl Strategy<Value = Expr> {
    (-3_i64..=3, 0_u8..6).prop_map(|(val, op)| {
        let f = field("open.flags");
        match op {
            0 => f.eq(val),
            1 => f.neq(val),
            2 => f.gt(val),
            3 => f.gte(val),
            4 => f.lt(val),
            _ => f.lte(val),
        }
    })
}

proptest! {
    /// Evaluation never panics, whatever the event holds. Values of the
    /// wrong kind are a non-match.
    #[test]
    fn eval_never_panics(expr in arb_flags_expr(), value in arb_value()) {
        let ruleset = single(&expr);
        let event = MapEvent::new("open").set("open.flags", value.clone());
        let matched = ruleset.evaluate(&event);
        if value.kind() != ValueKind::Int {
            prop_assert!(!matched);
        }
    }

    /// NOT(NOT(x)) == x for any evaluation.
    #[test]
    fn double_negation(expr in arb_flags_expr(), flags in -5_i64..=5) {
        let event = MapEvent::new("open").set("open.flags", flags);
        prop_assert_eq!(
            single(&expr).evaluate(&event),
            single(&!!expr.clone()).evaluate(&event)
        );
    }

    /// !(a && b) == !a || !b
    #[test]
    fn de_morgan(a in arb_flags_expr(), b in arb_flags_expr(), flags in -5_i64..=5) {
        let event = MapEvent::new("open").set("open.flags", flags);
        let lhs = single(&!(a.clone().and(b.clone())));
        let rhs = single(&(!a).or(!b));
        prop_assert_eq!(lhs.evaluate(&event), rhs.evaluate(&event));
    }

    /// AND short-circuits: the right side is never read when the left side
    /// is false, so a missing field there does not fail the rule.
    #[test]
    fn and_false_short_circuit(mode in arb_value()) {
        let expr = field("open.flags").eq(999_i64).and(field("open.mode").eq(1_i64));
        let ruleset = single(&expr);
        let event = MapEvent::new("open").set("open.flags", 0_i64).set("open.mode", mode);
        let report = ruleset.evaluate_detailed(&event);
        prop_assert!(!report.is_match());
        prop_assert!(report.failed().is_empty());
    }

    /// OR short-circuits: a true left side matches regardless of the right.
    #[test]
    fn or_true_short_circuit(mode in arb_value()) {
        let expr = field("open.flags").eq(1_i64).or(field("open.mode").eq(999_i64));
        let ruleset = single(&expr);
        let event = MapEvent::new("open").set("open.flags", 1_i64).set("open.mode", mode);
        prop_assert!(ruleset.evaluate(&event));
    }

    /// Equality on strings never matches a different string.
    #[test]
    fn string_equality(a in "[a-z/]{1,8}", b in "[a-z/]{1,8}") {
        let ruleset = single(&field("open.filename").eq(a.as_str()));
        let event = MapEvent::new("open").set("open.filename", b.as_str());
        prop_assert_eq!(ruleset.evaluate(&event), a == b);
    }
}
