//! Static approver analysis.
//!
//! An approver is a value restriction on one field that the capture layer
//! can apply at the source. For an event type, the union of the approvers
//! of all its rules must accept every event that could match one of them;
//! events matching no approver can be dropped before evaluation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

use crate::evaluate::{Node, Operand};
use crate::operators::{glob_prefix, StringMatcher};
use crate::types::{CompareOp, Rule, ScalarValue};

/// The kinds of filters the capture layer can apply to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApproverKind {
    Exact,
    Prefix,
    Range,
}

/// Fields the capture layer can filter on, and how.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    fields: HashMap<String, BTreeSet<ApproverKind>>,
}

impl Capabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field<I>(mut self, name: &str, kinds: I) -> Self
    where
        I: IntoIterator<Item = ApproverKind>,
    {
        self.fields
            .entry(name.to_owned())
            .or_default()
            .extend(kinds);
        self
    }

    fn allows(&self, field: &str, kind: ApproverKind) -> bool {
        self.fields
            .get(field)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// An accepted value of an approver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApproverValue {
    Exact(ScalarValue),
    Prefix(String),
    /// Inclusive int range.
    Range { min: i64, max: i64 },
}

impl ApproverValue {
    fn kind(&self) -> ApproverKind {
        match self {
            ApproverValue::Exact(_) => ApproverKind::Exact,
            ApproverValue::Prefix(_) => ApproverKind::Prefix,
            ApproverValue::Range { .. } => ApproverKind::Range,
        }
    }
}

impl fmt::Display for ApproverValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApproverValue::Exact(v) => write!(f, "{v}"),
            ApproverValue::Prefix(p) => write!(f, "\"{p}\"*"),
            ApproverValue::Range { min, max } => write!(f, "[{min}, {max}]"),
        }
    }
}

/// One approver entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Approver {
    pub event_type: String,
    pub field: String,
    pub value: ApproverValue,
}

/// Why a rule yields no approver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApproverError {
    #[error("rule '{rule}': field '{field}' is not filterable by the capture layer")]
    NotCapable { rule: String, field: String },

    #[error("rule '{rule}': the operator override of field '{field}' does not support approvers")]
    OperatorOverride { rule: String, field: String },

    #[error("rule '{rule}': '{expression}' cannot be approved")]
    Unsupported { rule: String, expression: String },

    #[error("rule '{rule}': a branch accepts events without any field restriction")]
    Unconstrained { rule: String },
}

type FieldApprovers = BTreeMap<String, BTreeSet<ApproverValue>>;

/// Approvers per event type, then per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Approvers {
    by_type: BTreeMap<String, FieldApprovers>,
}

/// Entries to add and remove to go from one [`Approvers`] to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApproverDiff {
    pub added: Vec<Approver>,
    pub removed: Vec<Approver>,
}

impl ApproverDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Approvers {
    /// The approvers of one event type, per field. `None` means every event
    /// of that type must be captured.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<&BTreeMap<String, BTreeSet<ApproverValue>>> {
        self.by_type.get(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Every entry, sorted by event type, field and value.
    pub fn iter(&self) -> impl Iterator<Item = Approver> + '_ {
        self.by_type.iter().flat_map(|(event_type, fields)| {
            fields.iter().flat_map(move |(field, values)| {
                values.iter().map(move |value| Approver {
                    event_type: event_type.clone(),
                    field: field.clone(),
                    value: value.clone(),
                })
            })
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    /// What changed since `previous`.
    #[must_use]
    pub fn diff(&self, previous: &Approvers) -> ApproverDiff {
        let current: BTreeSet<Approver> = self.iter().collect();
        let before: BTreeSet<Approver> = previous.iter().collect();
        ApproverDiff {
            added: current.difference(&before).cloned().collect(),
            removed: before.difference(&current).cloned().collect(),
        }
    }
}

/// Compute approvers for `rules` grouped by event type.
pub(crate) fn compute<'r>(
    buckets: impl IntoIterator<Item = (&'r str, Vec<&'r Rule>)>,
    capabilities: &Capabilities,
) -> (Approvers, Vec<ApproverError>) {
    let mut approvers = Approvers::default();
    let mut errors = Vec::new();

    for (event_type, rules) in buckets {
        let mut merged = FieldApprovers::new();
        let mut approvable = true;
        for rule in rules {
            match rule_approvers(rule, capabilities) {
                Ok(values) => union(&mut merged, values),
                Err(err) => {
                    tracing::debug!(
                        event_type,
                        rule = rule.id(),
                        error = %err,
                        "no approver for event type"
                    );
                    errors.push(err);
                    approvable = false;
                }
            }
        }
        if approvable && !merged.is_empty() {
            approvers.by_type.insert(event_type.to_owned(), merged);
        }
    }

    (approvers, errors)
}

fn rule_approvers(rule: &Rule, capabilities: &Capabilities) -> Result<FieldApprovers, ApproverError> {
    walk(&rule.node, rule.id(), capabilities)
}

fn walk(node: &Node, rule: &str, caps: &Capabilities) -> Result<FieldApprovers, ApproverError> {
    match node {
        Node::Or(a, b) => {
            let mut left = walk(a, rule, caps)?;
            union(&mut left, walk(b, rule, caps)?);
            Ok(left)
        }
        Node::And(a, b) => {
            let left = walk(a, rule, caps)?;
            let right = walk(b, rule, caps)?;
            Ok(narrowest(left, right))
        }
        // Never true: restricts nothing and accepts nothing.
        Node::Const(false) => Ok(FieldApprovers::new()),
        Node::Const(true) => Err(ApproverError::Unconstrained {
            rule: rule.to_owned(),
        }),
        Node::Truthy(Operand::Field { name, .. }) => {
            check_field(name, false, rule, caps)?;
            leaf(
                name,
                vec![ApproverValue::Exact(ScalarValue::Bool(true))],
                rule,
                caps,
                node,
            )
        }
        Node::Compare { op, lhs, rhs, .. } => compare(node, *op, lhs, rhs, rule, caps),
        Node::Truthy(_) | Node::Not(_) => Err(unsupported(node, rule)),
    }
}

fn compare(
    node: &Node,
    op: CompareOp,
    lhs: &Operand,
    rhs: &Operand,
    rule: &str,
    caps: &Capabilities,
) -> Result<FieldApprovers, ApproverError> {
    let Operand::Field {
        name,
        kind,
        fold_case,
    } = lhs
    else {
        return Err(unsupported(node, rule));
    };
    check_field(name, *fold_case, rule, caps)?;
    // Only scalar fields can be filtered value by value.
    if kind.zero_value().to_scalar().is_none() {
        return Err(unsupported(node, rule));
    }

    let values = match (op, rhs) {
        (CompareOp::Eq | CompareOp::In, Operand::Value(value)) => match value.to_scalar() {
            Some(scalar) => vec![ApproverValue::Exact(scalar)],
            None => return Err(unsupported(node, rule)),
        },
        (CompareOp::In, Operand::Ints(ints)) => ints
            .iter()
            .map(|i| ApproverValue::Exact(ScalarValue::Int(*i)))
            .collect(),
        (CompareOp::Eq | CompareOp::In | CompareOp::Matches, Operand::Strings(values)) => {
            let mut out: Vec<ApproverValue> = values
                .exact()
                .iter()
                .map(|s| ApproverValue::Exact(ScalarValue::String(s.clone())))
                .collect();
            for matcher in values.matchers() {
                match matcher {
                    StringMatcher::Glob { pattern, .. } if !glob_prefix(pattern).is_empty() => {
                        out.push(ApproverValue::Prefix(glob_prefix(pattern).to_owned()));
                    }
                    StringMatcher::Glob { .. } | StringMatcher::Regex { .. } => {
                        return Err(unsupported(node, rule))
                    }
                }
            }
            out
        }
        (CompareOp::Lt | CompareOp::Lte | CompareOp::Gt | CompareOp::Gte, Operand::Value(v)) => {
            let Some(bound) = v.as_int() else {
                return Err(unsupported(node, rule));
            };
            let (min, max) = match op {
                CompareOp::Lt => (i64::MIN, bound.saturating_sub(1)),
                CompareOp::Lte => (i64::MIN, bound),
                CompareOp::Gt => (bound.saturating_add(1), i64::MAX),
                _ => (bound, i64::MAX),
            };
            vec![ApproverValue::Range { min, max }]
        }
        _ => return Err(unsupported(node, rule)),
    };

    leaf(name, values, rule, caps, node)
}

fn check_field(
    field: &str,
    fold_case: bool,
    rule: &str,
    caps: &Capabilities,
) -> Result<(), ApproverError> {
    if fold_case {
        return Err(ApproverError::OperatorOverride {
            rule: rule.to_owned(),
            field: field.to_owned(),
        });
    }
    if !caps.has_field(field) {
        return Err(ApproverError::NotCapable {
            rule: rule.to_owned(),
            field: field.to_owned(),
        });
    }
    Ok(())
}

fn leaf(
    field: &str,
    values: Vec<ApproverValue>,
    rule: &str,
    caps: &Capabilities,
    node: &Node,
) -> Result<FieldApprovers, ApproverError> {
    if values.iter().any(|v| !caps.allows(field, v.kind())) {
        return Err(unsupported(node, rule));
    }
    let mut out = FieldApprovers::new();
    out.insert(field.to_owned(), values.into_iter().collect());
    Ok(out)
}

fn union(into: &mut FieldApprovers, other: FieldApprovers) {
    for (field, values) in other {
        into.entry(field).or_default().extend(values);
    }
}

/// Both sides restrict the events a conjunction accepts; keep the one with
/// the fewest accepted values.
fn narrowest(left: FieldApprovers, right: FieldApprovers) -> FieldApprovers {
    let count = |v: &FieldApprovers| v.values().map(BTreeSet::len).sum::<usize>();
    if count(&right) < count(&left) {
        right
    } else {
        left
    }
}

fn unsupported(node: &Node, rule: &str) -> ApproverError {
    ApproverError::Unsupported {
        rule: rule.to_owned(),
        expression: node.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldRegistry, FieldSpec, OpOverride, Opts, RuleDefinition, ValueKind};
    use crate::RuleSetBuilder;

    fn opts() -> Opts {
        Opts::new(
            FieldRegistry::new()
                .field("open.filename", ValueKind::String)
                .field("open.flags", ValueKind::Int)
                .field("open.mode", ValueKind::Int)
                .field("exec.filename", ValueKind::String)
                .with_spec(
                    "dns.question.name",
                    FieldSpec::new(ValueKind::String)
                        .event_type("dns")
                        .with_override(OpOverride::CaseInsensitive),
                ),
        )
    }

    fn caps() -> Capabilities {
        Capabilities::new()
            .field(
                "open.filename",
                [ApproverKind::Exact, ApproverKind::Prefix],
            )
            .field("open.flags", [ApproverKind::Exact, ApproverKind::Range])
            .field("exec.filename", [ApproverKind::Exact])
            .field("dns.question.name", [ApproverKind::Exact])
    }

    fn approvers(rules: &[(&str, &str)]) -> (Approvers, Vec<ApproverError>) {
        let mut builder = RuleSetBuilder::new(opts());
        for (id, expr) in rules {
            builder = builder.rule(RuleDefinition::new(id, expr));
        }
        let rs = builder.compile().unwrap();
        rs.approvers_detailed(&caps())
    }

    fn exact(s: &str) -> ApproverValue {
        ApproverValue::Exact(ScalarValue::String(s.into()))
    }

    #[test]
    fn equality_and_membership() {
        let (a, errors) = approvers(&[
            ("r1", r#"open.filename == "/etc/shadow""#),
            ("r2", r#"open.filename in ["/etc/passwd", ~"/root/*"]"#),
        ]);
        assert!(errors.is_empty());
        let fields = a.get("open").unwrap();
        assert_eq!(
            fields["open.filename"],
            BTreeSet::from([
                exact("/etc/shadow"),
                exact("/etc/passwd"),
                ApproverValue::Prefix("/root/".into()),
            ])
        );
    }

    #[test]
    fn or_unions_fields() {
        let (a, _) = approvers(&[("r", r#"open.filename == "/a" || open.flags == 4"#)]);
        let fields = a.get("open").unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields["open.flags"].contains(&ApproverValue::Exact(ScalarValue::Int(4))));
    }

    #[test]
    fn and_keeps_one_side() {
        let (a, _) = approvers(&[(
            "r",
            r#"open.filename in ["/a", "/b"] && open.flags == 4"#,
        )]);
        let fields = a.get("open").unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("open.flags"));
    }

    #[test]
    fn int_order_is_a_range() {
        let (a, _) = approvers(&[("r", "open.flags > 10")]);
        assert_eq!(
            a.get("open").unwrap()["open.flags"],
            BTreeSet::from([ApproverValue::Range {
                min: 11,
                max: i64::MAX
            }])
        );
    }

    #[test]
    fn non_approvable_sibling_poisons_the_rule() {
        // open.mode is not filterable, so `open.filename == "/a"` alone
        // would drop events matching through the other branch.
        let (a, errors) = approvers(&[(
            "r",
            r#"open.filename == "/a" && (open.mode == 1 || open.flags == 2)"#,
        )]);
        assert!(a.get("open").is_none());
        assert_eq!(
            errors,
            vec![ApproverError::NotCapable {
                rule: "r".into(),
                field: "open.mode".into()
            }]
        );
    }

    #[test]
    fn one_bad_rule_disables_the_event_type() {
        let (a, errors) = approvers(&[
            ("good", r#"open.filename == "/a""#),
            ("bad", r#"!(open.filename == "/b")"#),
            ("exec", r#"exec.filename == "/bin/sh""#),
        ]);
        assert!(a.get("open").is_none());
        assert!(a.get("exec").is_some());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn negated_and_unanchored_patterns_are_not_approvable() {
        for expr in [
            r#"open.filename != "/a""#,
            r#"open.filename =~ ~"*.so""#,
            r#"open.filename =~ r"^/tmp""#,
            r#"open.filename not in ["/a"]"#,
        ] {
            let (a, errors) = approvers(&[("r", expr)]);
            assert!(a.is_empty(), "{expr}");
            assert_eq!(errors.len(), 1, "{expr}");
        }
    }

    #[test]
    fn capability_kinds_are_enforced() {
        // exec.filename only supports exact values.
        let (a, errors) = approvers(&[("r", r#"exec.filename =~ ~"/usr/bin/*""#)]);
        assert!(a.is_empty());
        assert!(matches!(errors[0], ApproverError::Unsupported { .. }));
    }

    #[test]
    fn overridden_fields_have_no_approvers() {
        let (a, errors) = approvers(&[("r", r#"dns.question.name == "evil.org""#)]);
        assert!(a.is_empty());
        assert_eq!(
            errors,
            vec![ApproverError::OperatorOverride {
                rule: "r".into(),
                field: "dns.question.name".into()
            }]
        );
    }

    #[test]
    fn diff_reports_changes() {
        let (before, _) = approvers(&[("r", r#"open.filename in ["/a", "/b"]"#)]);
        let (after, _) = approvers(&[("r", r#"open.filename in ["/b", "/c"]"#)]);
        let diff = after.diff(&before);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].value, exact("/c"));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].value, exact("/a"));
        assert!(after.diff(&after).is_empty());
        assert_eq!(after.len(), 2);
    }
}
