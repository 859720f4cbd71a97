//! Comparison operators and the compile-time operator table.
//!
//! The compiler resolves every comparison to a [`Comparator`] once, from the
//! operator and the static kinds of both operands. Field operator overrides
//! are folded into the comparator and its constant operands at that point,
//! so evaluation never looks at types or overrides again.

use std::collections::BTreeSet;
use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::types::{CompareOp, FieldValue, ValueKind};

/// Static kind of a compiled operand. Extends [`ValueKind`] with the
/// constant int list produced by `[1, 2, 3]` literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandKind {
    Bool,
    Int,
    IntList,
    String,
    StringArray,
    StringSet,
}

impl From<ValueKind> for OperandKind {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => OperandKind::Bool,
            ValueKind::Int => OperandKind::Int,
            ValueKind::String => OperandKind::String,
            ValueKind::StringArray => OperandKind::StringArray,
            ValueKind::StringSet => OperandKind::StringSet,
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandKind::Bool => "bool",
            OperandKind::Int => "int",
            OperandKind::IntList => "int list",
            OperandKind::String => "string",
            OperandKind::StringArray => "string array",
            OperandKind::StringSet => "string set",
        };
        f.write_str(name)
    }
}

/// A string pattern compiled to a regex.
#[derive(Debug, Clone)]
pub(crate) enum StringMatcher {
    /// `~"/etc/*"`
    Glob { pattern: String, regex: Regex },
    /// `r"^/tmp/.+$"`
    Regex { source: String, regex: Regex },
}

impl StringMatcher {
    fn is_match(&self, s: &str) -> bool {
        match self {
            StringMatcher::Glob { regex, .. } | StringMatcher::Regex { regex, .. } => {
                regex.is_match(s)
            }
        }
    }

    fn rebuild(&self, case_insensitive: bool) -> Result<Self, regex::Error> {
        Ok(match self {
            StringMatcher::Glob { pattern, .. } => StringMatcher::Glob {
                pattern: pattern.clone(),
                regex: glob_regex(pattern, case_insensitive)?,
            },
            StringMatcher::Regex { source, .. } => StringMatcher::Regex {
                source: source.clone(),
                regex: RegexBuilder::new(source)
                    .case_insensitive(case_insensitive)
                    .build()?,
            },
        })
    }
}

fn glob_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    RegexBuilder::new(&format!("^{}$", body.join(".*")))
        .case_insensitive(case_insensitive)
        .build()
}

/// The literal text of a glob before its first wildcard.
pub(crate) fn glob_prefix(pattern: &str) -> &str {
    pattern.split('*').next().unwrap_or_default()
}

/// A constant set of strings and patterns, the right-hand side of `in`,
/// `=~` and pattern equality.
#[derive(Debug, Clone, Default)]
pub(crate) struct StringValues {
    exact: BTreeSet<String>,
    matchers: Vec<StringMatcher>,
    fold_case: bool,
}

impl StringValues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, value: &str) {
        if self.fold_case {
            self.exact.insert(value.to_lowercase());
        } else {
            self.exact.insert(value.to_owned());
        }
    }

    pub(crate) fn push_glob(&mut self, pattern: &str) -> Result<(), regex::Error> {
        if !pattern.contains('*') {
            self.insert(pattern);
            return Ok(());
        }
        self.matchers.push(StringMatcher::Glob {
            pattern: pattern.to_owned(),
            regex: glob_regex(pattern, self.fold_case)?,
        });
        Ok(())
    }

    pub(crate) fn push_regex(&mut self, source: &str) -> Result<(), regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(self.fold_case)
            .build()?;
        self.matchers.push(StringMatcher::Regex {
            source: source.to_owned(),
            regex,
        });
        Ok(())
    }

    pub(crate) fn extend(&mut self, other: StringValues) {
        for value in other.exact {
            self.insert(&value);
        }
        self.matchers.extend(other.matchers);
    }

    /// The same set with case-insensitive semantics baked in.
    pub(crate) fn folded(&self) -> Result<Self, regex::Error> {
        Ok(Self {
            exact: self.exact.iter().map(|s| s.to_lowercase()).collect(),
            matchers: self
                .matchers
                .iter()
                .map(|m| m.rebuild(true))
                .collect::<Result<_, _>>()?,
            fold_case: true,
        })
    }

    pub(crate) fn contains(&self, value: &str) -> bool {
        if self.fold_case {
            let lowered = value.to_lowercase();
            self.exact.contains(&lowered) || self.matchers.iter().any(|m| m.is_match(&lowered))
        } else {
            self.exact.contains(value) || self.matchers.iter().any(|m| m.is_match(value))
        }
    }

    pub(crate) fn exact(&self) -> &BTreeSet<String> {
        &self.exact
    }

    pub(crate) fn matchers(&self) -> &[StringMatcher] {
        &self.matchers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.matchers.is_empty()
    }
}

impl fmt::Display for StringValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut items: Vec<String> = self.exact.iter().map(|s| format!("\"{s}\"")).collect();
        items.extend(self.matchers.iter().map(|m| match m {
            StringMatcher::Glob { pattern, .. } => format!("~\"{pattern}\""),
            StringMatcher::Regex { source, .. } => format!("r\"{source}\""),
        }));
        write!(f, "[{}]", items.join(", "))
    }
}

/// A comparison operand after resolution against an event (or, during
/// partial evaluation, against a single known field value).
#[derive(Debug)]
pub(crate) enum Resolved<'a> {
    Value(std::borrow::Cow<'a, FieldValue>),
    Ints(&'a [i64]),
    Strings(&'a StringValues),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpKind {
    BoolEq,
    IntEq,
    IntLt,
    IntLte,
    IntGt,
    IntGte,
    IntIn,
    StrEq,
    StrIn,
    /// String array field against one string: any element equal.
    AnyStrEq,
    /// String array field against a set: any element contained.
    AnyStrIn,
    /// String against a runtime string array.
    ArrayContains,
}

/// A comparison resolved for one (operator, left kind, right kind) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Comparator {
    pub(crate) kind: CmpKind,
    pub(crate) negate: bool,
    pub(crate) fold_case: bool,
}

impl Comparator {
    /// Look up the operator table. `None` means the operand kinds are not
    /// valid for `op`.
    pub(crate) fn resolve(
        op: CompareOp,
        lhs: OperandKind,
        rhs: OperandKind,
        fold_case: bool,
    ) -> Option<Self> {
        use CompareOp as Op;
        use OperandKind as K;

        let kind = match (op, lhs, rhs) {
            (Op::Eq | Op::Neq, K::Bool, K::Bool) => CmpKind::BoolEq,
            (Op::Eq | Op::Neq, K::Int, K::Int) => CmpKind::IntEq,
            (Op::Lt, K::Int, K::Int) => CmpKind::IntLt,
            (Op::Lte, K::Int, K::Int) => CmpKind::IntLte,
            (Op::Gt, K::Int, K::Int) => CmpKind::IntGt,
            (Op::Gte, K::Int, K::Int) => CmpKind::IntGte,
            (Op::In | Op::NotIn, K::Int, K::IntList) => CmpKind::IntIn,
            (Op::Eq | Op::Neq, K::String, K::String) => CmpKind::StrEq,
            (
                Op::Eq | Op::Neq | Op::In | Op::NotIn | Op::Matches | Op::NotMatches,
                K::String,
                K::StringSet,
            ) => CmpKind::StrIn,
            (Op::In | Op::NotIn, K::String, K::StringArray) => CmpKind::ArrayContains,
            (Op::Eq | Op::Neq, K::StringArray, K::String) => CmpKind::AnyStrEq,
            (
                Op::Eq | Op::Neq | Op::In | Op::NotIn | Op::Matches | Op::NotMatches,
                K::StringArray,
                K::StringSet,
            ) => CmpKind::AnyStrIn,
            _ => return None,
        };
        Some(Self {
            kind,
            negate: op.is_negated(),
            fold_case,
        })
    }

    /// Apply the comparison. Operands whose runtime shape does not match
    /// the resolved kinds never compare true.
    pub(crate) fn apply(&self, lhs: &Resolved<'_>, rhs: &Resolved<'_>) -> bool {
        self.raw(lhs, rhs).is_some_and(|r| r != self.negate)
    }

    fn raw(&self, lhs: &Resolved<'_>, rhs: &Resolved<'_>) -> Option<bool> {
        Some(match self.kind {
            CmpKind::BoolEq => value(lhs)?.as_bool()? == value(rhs)?.as_bool()?,
            CmpKind::IntEq => int(lhs)? == int(rhs)?,
            CmpKind::IntLt => int(lhs)? < int(rhs)?,
            CmpKind::IntLte => int(lhs)? <= int(rhs)?,
            CmpKind::IntGt => int(lhs)? > int(rhs)?,
            CmpKind::IntGte => int(lhs)? >= int(rhs)?,
            CmpKind::IntIn => {
                let Resolved::Ints(list) = rhs else {
                    return None;
                };
                list.contains(&int(lhs)?)
            }
            CmpKind::StrEq => self.str_eq(value(lhs)?.as_str()?, value(rhs)?.as_str()?),
            CmpKind::StrIn => strings(rhs)?.contains(value(lhs)?.as_str()?),
            CmpKind::AnyStrEq => {
                let needle = value(rhs)?.as_str()?;
                value(lhs)?.strings().any(|s| self.str_eq(s, needle))
            }
            CmpKind::AnyStrIn => {
                let set = strings(rhs)?;
                value(lhs)?.strings().any(|s| set.contains(s))
            }
            CmpKind::ArrayContains => {
                let needle = value(lhs)?.as_str()?;
                value(rhs)?.strings().any(|s| self.str_eq(s, needle))
            }
        })
    }

    fn str_eq(&self, a: &str, b: &str) -> bool {
        if self.fold_case {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }
}

fn value<'r>(operand: &'r Resolved<'_>) -> Option<&'r FieldValue> {
    match operand {
        Resolved::Value(v) => Some(v.as_ref()),
        Resolved::Ints(_) | Resolved::Strings(_) => None,
    }
}

fn int(operand: &Resolved<'_>) -> Option<i64> {
    value(operand)?.as_int()
}

fn strings<'r>(operand: &'r Resolved<'_>) -> Option<&'r StringValues> {
    match operand {
        Resolved::Strings(s) => Some(s),
        Resolved::Value(_) | Resolved::Ints(_) => None,
    }
}

/// Mirror an order operator so that `3 < x` can be evaluated as `x > 3`.
pub(crate) fn mirror(op: CompareOp) -> Option<CompareOp> {
    match op {
        CompareOp::Eq | CompareOp::Neq => Some(op),
        CompareOp::Lt => Some(CompareOp::Gt),
        CompareOp::Lte => Some(CompareOp::Gte),
        CompareOp::Gt => Some(CompareOp::Lt),
        CompareOp::Gte => Some(CompareOp::Lte),
        CompareOp::In | CompareOp::NotIn | CompareOp::Matches | CompareOp::NotMatches => None,
    }
}
