use std::fmt;
use std::ops::Not;

/// Comparison operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    /// `=~`: the right side is a glob pattern.
    Matches,
    /// `!~`
    NotMatches,
}

impl CompareOp {
    /// Whether the operator is the negated form of another one.
    #[must_use]
    pub fn is_negated(self) -> bool {
        matches!(self, CompareOp::Neq | CompareOp::NotIn | CompareOp::NotMatches)
    }
}

/// A literal written in rule source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
    /// `~"/etc/*"`: a glob pattern where `*` matches any run of characters.
    Pattern(String),
    /// `r"^/tmp/[a-z]+$"`
    Regex(String),
}

/// Parsed expression AST. Identifiers are resolved during compilation into
/// fields, constants or macros.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Array(Vec<Expr>),
    Ident(String),
    /// `${name}` or `${scope.name}`
    Variable(String),
    Compare {
        lhs: Box<Expr>,
        op: CompareOp,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Matches => "=~",
            CompareOp::NotMatches => "!~",
        };
        f.write_str(op)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::String(v) => write!(f, "\"{v}\""),
            Literal::Pattern(v) => write!(f, "~\"{v}\""),
            Literal::Regex(v) => write!(f, "r\"{v}\""),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Array(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Variable(name) => write!(f, "${{{name}}}"),
            Expr::Compare { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::And(a, b) => write!(f, "({a} && {b})"),
            Expr::Or(a, b) => write!(f, "({a} || {b})"),
            Expr::Not(inner) => write!(f, "!{inner}"),
        }
    }
}

impl Expr {
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl From<Literal> for Expr {
    fn from(lit: Literal) -> Self {
        Expr::Literal(lit)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Literal::Int(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Literal(Literal::Bool(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Literal(Literal::String(v.to_owned()))
    }
}

/// Intermediate builder for field comparison expressions.
/// Created by [`field()`]; requires a comparison method to produce a valid [`Expr`].
#[derive(Debug, Clone)]
pub struct FieldExpr {
    path: String,
}

impl FieldExpr {
    fn compare(self, op: CompareOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Compare {
            lhs: Box::new(Expr::Ident(self.path)),
            op,
            rhs: Box::new(rhs.into()),
        }
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    #[must_use]
    pub fn neq(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Neq, value)
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Gte, value)
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Lte, value)
    }

    /// `field in [values...]`
    #[must_use]
    pub fn in_list<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Expr>,
    {
        self.compare(
            CompareOp::In,
            Expr::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `field =~ ~"pattern"`
    #[must_use]
    pub fn matches(self, pattern: &str) -> Expr {
        self.compare(
            CompareOp::Matches,
            Expr::Literal(Literal::Pattern(pattern.to_owned())),
        )
    }
}

#[must_use]
pub fn field(path: &str) -> FieldExpr {
    FieldExpr {
        path: path.to_owned(),
    }
}

/// Reference a macro, constant or boolean field by name.
#[must_use]
pub fn ident(name: &str) -> Expr {
    Expr::Ident(name.to_owned())
}

#[must_use]
pub fn variable(name: &str) -> Expr {
    Expr::Variable(name.to_owned())
}
