use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::parse::ParseError;
use crate::CompileError;

/// Unified error type covering parsing, compilation, configuration and I/O.
///
/// Returned by convenience constructors like
/// [`EngineConfig::from_file()`](crate::EngineConfig::from_file) and
/// [`RuleSetBuilder::compile()`](crate::RuleSetBuilder::compile).
#[derive(Debug, Error)]
pub enum VigilError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Load(#[from] LoadErrors),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// A non-fatal problem found while loading policies. The offending
/// definition is skipped; everything else still loads.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("rule '{id}' from policy '{policy}' collides with the definition from policy '{existing}'")]
    RuleIdCollision {
        id: String,
        policy: String,
        existing: String,
    },

    #[error("macro '{id}' from policy '{policy}' collides with the definition from policy '{existing}'")]
    MacroIdCollision {
        id: String,
        policy: String,
        existing: String,
    },

    #[error("rule id '{id}' is reserved")]
    ReservedRuleId { id: String },

    #[error("rule '{id}' targets disabled event type '{event_type}'")]
    EventTypeDisabled { id: String, event_type: String },

    #[error("rule '{id}': {source}")]
    Rule {
        id: String,
        #[source]
        source: CompileError,
    },

    #[error("macro '{id}': {source}")]
    Macro {
        id: String,
        #[source]
        source: CompileError,
    },

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy '{policy}': {source}")]
    Yaml {
        policy: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid policy '{policy}': {source}")]
    Parse {
        policy: String,
        #[source]
        source: ParseError,
    },
}

impl LoadError {
    /// The rule or macro id the error is attributed to, if any.
    #[must_use]
    pub fn definition_id(&self) -> Option<&str> {
        match self {
            LoadError::RuleIdCollision { id, .. }
            | LoadError::MacroIdCollision { id, .. }
            | LoadError::ReservedRuleId { id }
            | LoadError::EventTypeDisabled { id, .. }
            | LoadError::Rule { id, .. }
            | LoadError::Macro { id, .. } => Some(id),
            LoadError::Io { .. } | LoadError::Yaml { .. } | LoadError::Parse { .. } => None,
        }
    }
}

/// Every non-fatal error of one load, in the order they were found.
#[derive(Debug, Default)]
pub struct LoadErrors {
    errors: Vec<LoadError>,
}

impl LoadErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadError> {
        self.errors.iter()
    }
}

impl Extend<LoadError> for LoadErrors {
    fn extend<T: IntoIterator<Item = LoadError>>(&mut self, iter: T) {
        self.errors.extend(iter);
    }
}

impl IntoIterator for LoadErrors {
    type Item = LoadError;
    type IntoIter = std::vec::IntoIter<LoadError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a LoadErrors {
    type Item = &'a LoadError;
    type IntoIter = std::slice::Iter<'a, LoadError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl fmt::Display for LoadErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} policy load error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_message() {
        let err = LoadError::RuleIdCollision {
            id: "R1".into(),
            policy: "custom".into(),
            existing: "default".into(),
        };
        assert_eq!(
            err.to_string(),
            "rule 'R1' from policy 'custom' collides with the definition from policy 'default'"
        );
        assert_eq!(err.definition_id(), Some("R1"));
    }

    #[test]
    fn errors_display_one_per_line() {
        let mut errors = LoadErrors::new();
        errors.push(LoadError::ReservedRuleId { id: "ruleset_loaded".into() });
        errors.push(LoadError::EventTypeDisabled {
            id: "r".into(),
            event_type: "dns".into(),
        });
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "2 policy load error(s)\n  - rule id 'ruleset_loaded' is reserved\n  - rule 'r' targets disabled event type 'dns'"
        );
    }

    #[test]
    fn wraps_compile_errors() {
        let err = LoadError::Rule {
            id: "r".into(),
            source: CompileError::NoEventType,
        };
        assert_eq!(err.to_string(), "rule 'r': rule reads no event-specific field");
        let err = VigilError::from(CompileError::NoEventType);
        assert!(matches!(err, VigilError::Compile(_)));
    }
}
