mod strategies;

use proptest::prelude::*;
use strategies::{arb_event, arb_ruleset, with_field};
use vigil::{ApproverKind, ApproverValue, Capabilities, FieldValue, MapEvent, Rule, ScalarValue};

fn expected_matches(rules: &[Rule], event: &MapEvent) -> Vec<String> {
    rules
        .iter()
        .filter(|r| r.matches(event).unwrap_or(false))
        .map(|r| r.id().to_owned())
        .collect()
}

fn capabilities() -> Capabilities {
    Capabilities::new()
        .field("open.filename", [ApproverKind::Exact, ApproverKind::Prefix])
        .field("open.flags", [ApproverKind::Exact, ApproverKind::Range])
        .field("open.truncated", [ApproverKind::Exact])
}

/// Whether an approver entry lets `value` through at the source.
fn accepts(approver: &ApproverValue, value: &FieldValue) -> bool {
    match (approver, value) {
        (ApproverValue::Exact(ScalarValue::String(a)), FieldValue::String(v)) => a == v,
        (ApproverValue::Exact(ScalarValue::Int(a)), FieldValue::Int(v)) => a == v,
        (ApproverValue::Exact(ScalarValue::Bool(a)), FieldValue::Bool(v)) => a == v,
        (ApproverValue::Prefix(prefix), FieldValue::String(v)) => v.starts_with(prefix.as_str()),
        (ApproverValue::Range { min, max }, FieldValue::Int(v)) => (*min..=*max).contains(v),
        _ => false,
    }
}

proptest! {
    /// Soundness: discarders learned on earlier events never hide a rule
    /// whose expression is true on a later event.
    #[test]
    fn discarders_never_hide_a_match(
        generated in arb_ruleset(),
        events in prop::collection::vec(arb_event(), 1..40),
    ) {
        let ruleset = generated.compile();
        for event in &events {
            let report = ruleset.evaluate_detailed(event);
            let expected = expected_matches(ruleset.rules(), event);
            prop_assert_eq!(report.matched(), expected.as_slice());
        }
    }

    /// Cache soundness: no rule reading a cached field matches any event
    /// carrying the cached value.
    #[test]
    fn cached_discarders_are_sound(
        generated in arb_ruleset(),
        events in prop::collection::vec(arb_event(), 1..40),
        probes in prop::collection::vec(arb_event(), 1..20),
    ) {
        let ruleset = generated.compile();
        for event in &events {
            ruleset.evaluate(event);
        }

        for discarder in ruleset.discarders().entries() {
            let value = FieldValue::from(discarder.value.clone());
            for probe in &probes {
                let probe = with_field(probe, &discarder.field, value.clone());
                for rule in ruleset.rules() {
                    if rule.fields().contains(&discarder.field) {
                        prop_assert!(
                            !rule.matches(&probe).unwrap_or(false),
                            "discarder {} hides rule {} ({})",
                            discarder,
                            rule.id(),
                            rule.expression()
                        );
                    }
                }
            }
        }
    }

    /// evaluate and evaluate_detailed agree.
    #[test]
    fn detailed_agrees_with_evaluate(
        generated in arb_ruleset(),
        event in arb_event(),
    ) {
        let plain = generated.compile();
        let detailed = generated.compile();
        prop_assert_eq!(plain.evaluate(&event), detailed.evaluate_detailed(&event).is_match());
    }

    /// A fresh rule set reports every rule whose expression is true.
    #[test]
    fn first_evaluation_is_exact(
        generated in arb_ruleset(),
        event in arb_event(),
    ) {
        let ruleset = generated.compile();
        let report = ruleset.evaluate_detailed(&event);
        prop_assert!(report.skipped().is_empty());
        let expected = expected_matches(ruleset.rules(), &event);
        prop_assert_eq!(report.matched(), expected.as_slice());
    }

    /// The capture layer never filters out an event some rule matches.
    #[test]
    fn approvers_never_reject_a_match(
        generated in arb_ruleset(),
        events in prop::collection::vec(arb_event(), 1..40),
    ) {
        let ruleset = generated.compile();
        let approvers = ruleset.approvers(&capabilities());
        let Some(fields) = approvers.get("open") else {
            return Ok(());
        };

        for event in &events {
            let matched = expected_matches(ruleset.rules(), event);
            if matched.is_empty() {
                continue;
            }
            let approved = fields.iter().any(|(field, values)| {
                event
                    .get(field)
                    .is_some_and(|value| values.iter().any(|approver| accepts(approver, value)))
            });
            prop_assert!(
                approved,
                "rules {:?} match {:?} but approvers {:?} reject it",
                matched,
                event,
                fields
            );
        }
    }
}
