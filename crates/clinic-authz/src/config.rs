//! Authorization configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [authz]
//! policy_path = "/etc/clinic/rules.toml"
//! resolver_timeout = "2s"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compiler::CompiledPolicy;
use crate::error::CompileError;

/// Authorization engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Rule file to load instead of the embedded clinic rules.
    pub policy_path: Option<PathBuf>,

    /// Upper bound for one clinician lookup.
    /// An expired lookup ends the evaluation with an internal error.
    #[serde(with = "humantime_serde")]
    pub resolver_timeout: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            resolver_timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl AuthzConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "resolver_timeout must be > 0".to_string(),
            ));
        }
        if let Some(path) = &self.policy_path
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::InvalidValue(
                "policy_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Compiles the configured rule source.
    pub fn compile_policy(&self) -> Result<CompiledPolicy, CompileError> {
        match &self.policy_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading access rules from file");
                CompiledPolicy::from_file(path)
            }
            None => CompiledPolicy::clinic(),
        }
    }
}
