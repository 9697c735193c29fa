//! Configuration file loading for jsinvoke
//!
//! Handles loading and parsing configuration using the config crate. Files
//! and the embedded example provide the base; `JSINVOKE_*` environment
//! variables override individual keys.

use std::path::Path;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config as RawConfig, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};

impl Config {
    /// Load configuration from a file, applying environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        Self::build(
            RawConfig::builder()
                .add_source(File::from(path))
                .add_source(environment()),
        )
    }

    /// Load the embedded defaults, applying environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(
            RawConfig::builder()
                .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml))
                .add_source(environment()),
        )
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        Self::build(RawConfig::builder().add_source(File::from_str(content, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen address is empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.pool_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "pool_size {} is too large",
                self.pool_size
            )));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limit must be a non-negative number, got {}",
                self.rate_limit
            )));
        }
        if let Some(ref dir) = self.library_dir
            && dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("library_dir is empty".to_string()));
        }

        Ok(())
    }
}

/// `JSINVOKE_POOL_SIZE`, `JSINVOKE_LIMITS__MEMORY_LIMIT`, ...
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
