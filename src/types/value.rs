use std::collections::BTreeSet;
use std::fmt;

/// The closed set of value kinds an expression node can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    String,
    StringArray,
    /// A constant set of strings and patterns; only produced by literals,
    /// macros and constants.
    StringSet,
}

impl ValueKind {
    /// The value read from an unset variable of this kind.
    #[must_use]
    pub fn zero_value(self) -> FieldValue {
        match self {
            ValueKind::Bool => FieldValue::Bool(false),
            ValueKind::Int => FieldValue::Int(0),
            ValueKind::String => FieldValue::String(String::new()),
            ValueKind::StringArray => FieldValue::StringArray(Vec::new()),
            ValueKind::StringSet => FieldValue::StringSet(BTreeSet::new()),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::String => "string",
            ValueKind::StringArray => "string array",
            ValueKind::StringSet => "string set",
        };
        f.write_str(name)
    }
}

/// A typed value read from an event field, a variable or a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringArray(Vec<String>),
    StringSet(BTreeSet<String>),
}

impl FieldValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::StringArray(_) => ValueKind::StringArray,
            FieldValue::StringSet(_) => ValueKind::StringSet,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Iterate the strings held by an array or set value.
    pub fn strings(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            FieldValue::String(v) => Box::new(std::iter::once(v.as_str())),
            FieldValue::StringArray(v) => Box::new(v.iter().map(String::as_str)),
            FieldValue::StringSet(v) => Box::new(v.iter().map(String::as_str)),
            FieldValue::Bool(_) | FieldValue::Int(_) => Box::new(std::iter::empty()),
        }
    }

    /// The hashable form of a scalar value, used as a discarder key.
    /// Arrays and sets have no scalar form.
    #[must_use]
    pub fn to_scalar(&self) -> Option<ScalarValue> {
        match self {
            FieldValue::Bool(v) => Some(ScalarValue::Bool(*v)),
            FieldValue::Int(v) => Some(ScalarValue::Int(*v)),
            FieldValue::String(v) => Some(ScalarValue::String(v.clone())),
            FieldValue::StringArray(_) | FieldValue::StringSet(_) => None,
        }
    }
}

/// A scalar value that can be hashed and ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl From<ScalarValue> for FieldValue {
    fn from(v: ScalarValue) -> Self {
        match v {
            ScalarValue::Bool(b) => FieldValue::Bool(b),
            ScalarValue::Int(i) => FieldValue::Int(i),
            ScalarValue::String(s) => FieldValue::String(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::StringArray(v)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        FieldValue::StringArray(v.into_iter().map(str::to_owned).collect())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "\"{v}\""),
            FieldValue::StringArray(v) => {
                let items: Vec<String> = v.iter().map(|s| format!("\"{s}\"")).collect();
                write!(f, "[{}]", items.join(", "))
            }
            FieldValue::StringSet(v) => {
                let items: Vec<String> = v.iter().map(|s| format!("\"{s}\"")).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::String(v) => write!(f, "\"{v}\""),
        }
    }
}
