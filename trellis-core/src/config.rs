//! Runtime Configuration
//!
//! A [`RuntimeConfig`] is handed to [`Runtime::with_config`](crate::reactive::Runtime::with_config)
//! when a tree mounts. It can be built in code or loaded from JSON:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "label": "todo-list", "max_flush_passes": 10 }"#)?;
//! let rt = Runtime::with_config(config)?;
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Number of effect passes a single flush may take before the runaway guard trips.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 25;

/// Errors raised while loading or validating a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("max_flush_passes must be at least 1")]
    ZeroFlushPasses,
}

/// Settings for one component tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name attached to every log record emitted by this tree.
    pub label: String,

    /// Upper bound on effect passes per flush.
    pub max_flush_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: "tree".to_string(),
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
        }
    }
}

impl RuntimeConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }

    /// Parse and validate a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flush_passes == 0 {
            return Err(ConfigError::ZeroFlushPasses);
        }
        Ok(())
    }
}
