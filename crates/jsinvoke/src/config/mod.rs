use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::library::LibrarySource;
use crate::types::SandboxLimits;

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../jsinvoke.example.toml");

/// Prefix of environment variables overriding configuration keys
pub const ENV_PREFIX: &str = "JSINVOKE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for jsinvoke
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP service listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Number of pooled isolates
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Maximum number of concurrently executing scripts.
    ///
    /// May differ from `pool_size`: with more slots than isolates, admitted
    /// requests additionally wait on the pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Executions started per second; `0` disables rate limiting
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,

    /// Token bucket size (defaults to the rate limit, at least 1)
    #[serde(default)]
    pub burst: Option<u32>,

    /// Bound on the wait for admission plus an isolate, in milliseconds.
    /// Unset or `0` waits indefinitely.
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,

    /// Directory of helper scripts (uses the embedded helpers if not specified)
    #[serde(default)]
    pub library_dir: Option<PathBuf>,

    /// Per-isolate engine limits
    #[serde(default)]
    pub limits: SandboxLimits,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the script library is loaded from
    pub fn library_source(&self) -> LibrarySource {
        match &self.library_dir {
            Some(dir) => LibrarySource::Directory(dir.clone()),
            None => LibrarySource::Embedded,
        }
    }

    /// Acquire timeout, if one is configured
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Token bucket size actually used
    pub fn effective_burst(&self) -> u32 {
        self.burst.unwrap_or_else(|| {
            // Saturating float-to-int cast
            self.rate_limit.ceil().max(1.0) as u32
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_pool_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    10
}

fn default_rate_limit() -> f64 {
    1000.0
}
