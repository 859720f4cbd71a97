use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::discarders::DEFAULT_CAPACITY;
use crate::error::VigilError;
use crate::types::{Limit, Opts};

/// Engine settings, read from YAML.
///
/// ```yaml
/// policies_dir: /etc/vigil/policies
/// default_rate_limit: { burst: 40, rate: 20.0 }
/// discarder_cache_capacity: 8192
/// supported_discarders: [open.filename, exec.filename]
/// enabled_event_types: [open, exec]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_policies_dir")]
    pub policies_dir: PathBuf,
    #[serde(default)]
    pub default_rate_limit: Limit,
    #[serde(default = "default_discarder_cache_capacity")]
    pub discarder_cache_capacity: usize,
    /// Fields discarders may be learned on. Absent means every scalar field.
    #[serde(default)]
    pub supported_discarders: Option<Vec<String>>,
    /// Event types rules may target. Absent means all.
    #[serde(default)]
    pub enabled_event_types: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policies_dir: default_policies_dir(),
            default_rate_limit: Limit::default(),
            discarder_cache_capacity: default_discarder_cache_capacity(),
            supported_discarders: None,
            enabled_event_types: None,
        }
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns [`VigilError::Yaml`] on invalid YAML.
    pub fn from_yaml(text: &str) -> Result<Self, VigilError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// # Errors
    ///
    /// Returns [`VigilError::Io`] or [`VigilError::Yaml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VigilError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Narrow `opts` with the discarder and event type restrictions.
    pub(crate) fn apply_to(&self, mut opts: Opts) -> Opts {
        if let Some(fields) = &self.supported_discarders {
            opts = opts.with_supported_discarders(fields.iter().cloned());
        }
        if let Some(event_types) = &self.enabled_event_types {
            opts = opts.with_event_types_enabled(event_types.iter().cloned());
        }
        opts
    }
}

fn default_policies_dir() -> PathBuf {
    PathBuf::from("/etc/vigil/policies")
}

fn default_discarder_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}
