//! Policies and the providers they are loaded from.
//!
//! A policy is a named, versioned batch of rule and macro definitions. On
//! disk it is a YAML document with the `.policy` extension:
//!
//! ```yaml
//! version: "1.2"
//! macros:
//!   - id: secrets
//!     values: [/etc/shadow, /etc/gshadow]
//! rules:
//!   - id: secret_open
//!     expression: open.filename in secrets
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LoadError, LoadErrors};
use crate::parse::parse_policy;
use crate::types::{MacroDefinition, PolicyInfo, RuleDefinition};

/// Extension of policy files picked up by [`DirectoryProvider`].
pub const POLICY_EXTENSION: &str = "policy";

/// Name of the policy loaded before every other file of a directory.
pub const DEFAULT_POLICY: &str = "default.policy";

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub info: PolicyInfo,
    pub rules: Vec<RuleDefinition>,
    pub macros: Vec<MacroDefinition>,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    macros: Vec<MacroDefinition>,
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

impl Policy {
    #[must_use]
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            info: PolicyInfo {
                name: name.to_owned(),
                source: source.to_owned(),
                version: String::new(),
            },
            rules: Vec::new(),
            macros: Vec::new(),
        }
    }

    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.info.version = version.to_owned();
        self
    }

    #[must_use]
    pub fn rule(mut self, definition: RuleDefinition) -> Self {
        self.rules.push(definition);
        self
    }

    #[must_use]
    pub fn macro_def(mut self, definition: MacroDefinition) -> Self {
        self.macros.push(definition);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Parse a YAML policy document.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Yaml`] when the document is not a valid policy.
    pub fn from_yaml(name: &str, source: &str, text: &str) -> Result<Self, LoadError> {
        let file: PolicyFile = serde_yaml::from_str(text).map_err(|source| LoadError::Yaml {
            policy: name.to_owned(),
            source,
        })?;
        let version = match file.version {
            Some(serde_yaml::Value::String(s)) => s,
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        Ok(Self {
            info: PolicyInfo {
                name: name.to_owned(),
                source: source.to_owned(),
                version,
            },
            rules: file.rules,
            macros: file.macros,
        })
    }

    /// Parse a text policy made of `rule <id>: <expr>` and
    /// `macro <id>: <expr>` lines.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Parse`] on invalid syntax.
    pub fn from_text(name: &str, source: &str, text: &str) -> Result<Self, LoadError> {
        let parsed = parse_policy(text).map_err(|source| LoadError::Parse {
            policy: name.to_owned(),
            source,
        })?;
        let mut policy = Self::new(name, source);
        policy.rules = parsed
            .rules
            .iter()
            .map(|d| RuleDefinition::new(&d.id, &d.expression))
            .collect();
        policy.macros = parsed
            .macros
            .iter()
            .map(|d| MacroDefinition::new(&d.id, &d.expression))
            .collect();
        Ok(policy)
    }

    /// Read a YAML policy file. The policy is named after the file stem.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] or [`LoadError::Yaml`].
    pub fn from_file(path: &Path, source: &str) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_yaml(&name, source, &text)
    }
}

/// A source of policies, queried on every load.
pub trait PolicyProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Every policy this provider can read, and what went wrong with the
    /// others.
    fn load_policies(&self) -> (Vec<Policy>, LoadErrors);
}

/// Policies held in memory.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    name: String,
    policies: Vec<Policy>,
}

impl StaticProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            policies: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }
}

impl PolicyProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_policies(&self) -> (Vec<Policy>, LoadErrors) {
        (self.policies.clone(), LoadErrors::new())
    }
}

/// One YAML policy file.
#[derive(Debug, Clone)]
pub struct FileProvider {
    name: String,
    path: PathBuf,
}

impl FileProvider {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }
}

impl PolicyProvider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_policies(&self) -> (Vec<Policy>, LoadErrors) {
        let mut errors = LoadErrors::new();
        match Policy::from_file(&self.path, &self.name) {
            Ok(policy) => (vec![policy], errors),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to load policy");
                errors.push(err);
                (Vec::new(), errors)
            }
        }
    }
}

/// Every `.policy` file of a directory: `default.policy` first, then the
/// others in lexical order. Dotfiles and other extensions are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    name: String,
    dir: PathBuf,
}

impl DirectoryProvider {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("dir:{}", dir.display()),
            dir,
        }
    }

    fn policy_files(&self) -> Result<Vec<PathBuf>, LoadError> {
        let io_error = |source| LoadError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(POLICY_EXTENSION) {
                continue;
            }
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| {
            let is_default = |p: &PathBuf| p.file_name().is_some_and(|n| n == DEFAULT_POLICY);
            is_default(b).cmp(&is_default(a)).then_with(|| a.cmp(b))
        });
        Ok(files)
    }
}

impl PolicyProvider for DirectoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_policies(&self) -> (Vec<Policy>, LoadErrors) {
        let mut errors = LoadErrors::new();
        let files = match self.policy_files() {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(path = %self.dir.display(), error = %err, "failed to list policies");
                errors.push(err);
                return (Vec::new(), errors);
            }
        };

        let mut policies = Vec::with_capacity(files.len());
        for path in files {
            match Policy::from_file(&path, &self.name) {
                Ok(policy) => {
                    tracing::info!(
                        policy = policy.name(),
                        path = %path.display(),
                        rules = policy.rules.len(),
                        "loaded policy"
                    );
                    policies.push(policy);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to load policy");
                    errors.push(err);
                }
            }
        }
        (policies, errors)
    }
}
