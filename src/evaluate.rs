use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::operators::{Comparator, OperandKind, Resolved, StringValues};
use crate::types::{CompareOp, Event, FieldError, FieldValue, ValueKind};
use crate::variables::{Variable, VariableProvider};

/// Per-evaluation state: the event under evaluation and the results of the
/// field reads already done on it. Each field accessor runs at most once per
/// context, however many rules read the field, and failures are remembered
/// as well as values.
pub(crate) struct EvalContext<'e> {
    event: &'e dyn Event,
    fields: RefCell<HashMap<String, Result<FieldValue, FieldError>>>,
}

impl<'e> EvalContext<'e> {
    pub(crate) fn new(event: &'e dyn Event) -> Self {
        Self {
            event,
            fields: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn event(&self) -> &'e dyn Event {
        self.event
    }

    pub(crate) fn field(&self, name: &str) -> Result<FieldValue, FieldError> {
        if let Some(result) = self.fields.borrow().get(name) {
            return result.clone();
        }
        let result = self.event.field(name);
        self.fields
            .borrow_mut()
            .insert(name.to_owned(), result.clone());
        result
    }

    /// A field value already read successfully during this evaluation,
    /// without calling the accessor.
    pub(crate) fn cached(&self, name: &str) -> Option<FieldValue> {
        self.fields.borrow().get(name)?.as_ref().ok().cloned()
    }
}

/// A variable bound at compile time.
#[derive(Clone)]
pub(crate) enum VariableRef {
    /// Read-only variable computed from the event.
    Computed { name: String, variable: Variable },
    /// Variable written by `set` actions, read from a provider.
    Stored {
        name: String,
        key: String,
        kind: ValueKind,
        provider: Arc<dyn VariableProvider>,
    },
}

impl VariableRef {
    fn kind(&self) -> ValueKind {
        match self {
            VariableRef::Computed { variable, .. } => variable.kind(),
            VariableRef::Stored { kind, .. } => *kind,
        }
    }

    /// Unset variables and values of the wrong kind read as the zero value.
    fn read(&self, event: &dyn Event) -> FieldValue {
        match self {
            VariableRef::Computed { variable, .. } => (variable.getter)(event),
            VariableRef::Stored {
                key,
                kind,
                provider,
                ..
            } => provider
                .get(event, key)
                .filter(|v| v.kind() == *kind)
                .unwrap_or_else(|| kind.zero_value()),
        }
    }
}

impl fmt::Debug for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableRef::Computed { name, variable } => f
                .debug_struct("Computed")
                .field("name", name)
                .field("kind", &variable.kind())
                .finish(),
            VariableRef::Stored { name, kind, .. } => f
                .debug_struct("Stored")
                .field("name", name)
                .field("kind", kind)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Value(FieldValue),
    Ints(Vec<i64>),
    Strings(StringValues),
    Field {
        name: String,
        kind: ValueKind,
        fold_case: bool,
    },
    Variable(VariableRef),
    Node(Box<Node>),
}

impl Operand {
    pub(crate) fn kind(&self) -> OperandKind {
        match self {
            Operand::Value(v) => v.kind().into(),
            Operand::Ints(_) => OperandKind::IntList,
            Operand::Strings(_) => OperandKind::StringSet,
            Operand::Field { kind, .. } => (*kind).into(),
            Operand::Variable(var) => var.kind().into(),
            Operand::Node(_) => OperandKind::Bool,
        }
    }

    pub(crate) fn is_constant(&self) -> bool {
        match self {
            Operand::Value(_) | Operand::Ints(_) | Operand::Strings(_) => true,
            Operand::Node(node) => node.is_constant(),
            Operand::Field { .. } | Operand::Variable(_) => false,
        }
    }

    pub(crate) fn fold_case(&self) -> bool {
        matches!(self, Operand::Field { fold_case: true, .. })
    }

    fn constant(&self) -> Option<Resolved<'_>> {
        match self {
            Operand::Value(v) => Some(Resolved::Value(Cow::Borrowed(v))),
            Operand::Ints(v) => Some(Resolved::Ints(v)),
            Operand::Strings(v) => Some(Resolved::Strings(v)),
            Operand::Node(node) => node
                .constant_value()
                .map(|b| Resolved::Value(Cow::Owned(FieldValue::Bool(b)))),
            Operand::Field { .. } | Operand::Variable(_) => None,
        }
    }

    fn resolve<'a>(&'a self, ctx: &EvalContext<'_>) -> Result<Resolved<'a>, FieldError> {
        match self {
            Operand::Field { name, kind, .. } => {
                let value = ctx.field(name)?;
                if value.kind() != *kind {
                    return Err(FieldError::TypeMismatch {
                        field: name.clone(),
                        expected: *kind,
                        found: value.kind(),
                    });
                }
                Ok(Resolved::Value(Cow::Owned(value)))
            }
            Operand::Variable(var) => Ok(Resolved::Value(Cow::Owned(var.read(ctx.event())))),
            Operand::Node(node) => Ok(Resolved::Value(Cow::Owned(FieldValue::Bool(
                node.eval(ctx)?,
            )))),
            Operand::Value(v) => Ok(Resolved::Value(Cow::Borrowed(v))),
            Operand::Ints(v) => Ok(Resolved::Ints(v)),
            Operand::Strings(v) => Ok(Resolved::Strings(v)),
        }
    }

    /// Resolve knowing only one field. Anything depending on another field
    /// or on a variable is unknown.
    fn resolve_partial<'a>(&'a self, field: &str, value: &'a FieldValue) -> Option<Resolved<'a>> {
        match self {
            Operand::Field { name, kind, .. } if name == field && value.kind() == *kind => {
                Some(Resolved::Value(Cow::Borrowed(value)))
            }
            Operand::Node(node) => node
                .partial(field, value)
                .map(|b| Resolved::Value(Cow::Owned(FieldValue::Bool(b)))),
            other => other.constant(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Ints(v) => {
                let items: Vec<String> = v.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Operand::Strings(v) => write!(f, "{v}"),
            Operand::Field { name, .. } => f.write_str(name),
            Operand::Variable(VariableRef::Computed { name, .. })
            | Operand::Variable(VariableRef::Stored { name, .. }) => write!(f, "${{{name}}}"),
            Operand::Node(node) => write!(f, "({node})"),
        }
    }
}

/// A compiled boolean expression. Immutable once built; comparisons carry
/// their resolved [`Comparator`].
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Const(bool),
    /// A boolean field or variable used as a condition.
    Truthy(Operand),
    Compare {
        op: CompareOp,
        lhs: Operand,
        rhs: Operand,
        cmp: Comparator,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

impl Node {
    /// Evaluate against an event. The right side of `&&` and `||` is only
    /// evaluated when the left side does not decide the result.
    ///
    /// # Errors
    ///
    /// Field accessor failures propagate; callers treat them as a non-match.
    pub(crate) fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool, FieldError> {
        match self {
            Node::Const(b) => Ok(*b),
            Node::Truthy(operand) => Ok(is_true(&operand.resolve(ctx)?)),
            Node::Compare { lhs, rhs, cmp, .. } => {
                let lhs = lhs.resolve(ctx)?;
                let rhs = rhs.resolve(ctx)?;
                Ok(cmp.apply(&lhs, &rhs))
            }
            Node::And(a, b) => Ok(a.eval(ctx)? && b.eval(ctx)?),
            Node::Or(a, b) => Ok(a.eval(ctx)? || b.eval(ctx)?),
            Node::Not(inner) => Ok(!inner.eval(ctx)?),
        }
    }

    /// Three-valued evaluation knowing only `field == value`. `None` means
    /// the result depends on something else.
    pub(crate) fn partial(&self, field: &str, value: &FieldValue) -> Option<bool> {
        match self {
            Node::Const(b) => Some(*b),
            Node::Truthy(operand) => operand.resolve_partial(field, value).map(|r| is_true(&r)),
            Node::Compare { lhs, rhs, cmp, .. } => {
                let lhs = lhs.resolve_partial(field, value)?;
                let rhs = rhs.resolve_partial(field, value)?;
                Some(cmp.apply(&lhs, &rhs))
            }
            Node::And(a, b) => match (a.partial(field, value), b.partial(field, value)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Node::Or(a, b) => match (a.partial(field, value), b.partial(field, value)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Node::Not(inner) => inner.partial(field, value).map(|b| !b),
        }
    }

    /// Whether the value is known at compile time.
    pub(crate) fn is_constant(&self) -> bool {
        self.constant_value().is_some()
    }

    pub(crate) fn constant_value(&self) -> Option<bool> {
        match self {
            Node::Const(b) => Some(*b),
            Node::Truthy(operand) => operand.constant().map(|r| is_true(&r)),
            Node::Compare { lhs, rhs, cmp, .. } => {
                Some(cmp.apply(&lhs.constant()?, &rhs.constant()?))
            }
            Node::And(a, b) => Some(a.constant_value()? && b.constant_value()?),
            Node::Or(a, b) => Some(a.constant_value()? || b.constant_value()?),
            Node::Not(inner) => inner.constant_value().map(|b| !b),
        }
    }

    /// Every event field the expression may read.
    pub(crate) fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Const(_) => {}
            Node::Truthy(operand) => operand_fields(operand, out),
            Node::Compare { lhs, rhs, .. } => {
                operand_fields(lhs, out);
                operand_fields(rhs, out);
            }
            Node::And(a, b) | Node::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            Node::Not(inner) => inner.collect_fields(out),
        }
    }
}

fn operand_fields(operand: &Operand, out: &mut BTreeSet<String>) {
    match operand {
        Operand::Field { name, .. } => {
            out.insert(name.clone());
        }
        Operand::Node(node) => node.collect_fields(out),
        Operand::Value(_) | Operand::Ints(_) | Operand::Strings(_) | Operand::Variable(_) => {}
    }
}

fn is_true(resolved: &Resolved<'_>) -> bool {
    matches!(resolved, Resolved::Value(v) if v.as_bool() == Some(true))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(b) => write!(f, "{b}"),
            Node::Truthy(operand) => write!(f, "{operand}"),
            Node::Compare { op, lhs, rhs, .. } => write!(f, "{lhs} {op} {rhs}"),
            Node::And(a, b) => write!(f, "({a} && {b})"),
            Node::Or(a, b) => write!(f, "({a} || {b})"),
            Node::Not(inner) => write!(f, "!{inner}"),
        }
    }
}
