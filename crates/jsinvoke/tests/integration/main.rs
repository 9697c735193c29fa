//! Integration tests for jsinvoke
//!
//! Everything runs in-process against real QuickJS isolates; no external
//! services are needed.

use std::fs;
use std::path::PathBuf;

use jsinvoke::config::Config;

mod config_loading;
mod library_loading;
mod pipeline;
mod pool_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Absolute path of a fixture
pub(crate) fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(FIXTURES_PATH).join(name)
}

/// Helper to get fixture file content
pub(crate) fn fixture_text(name: &str) -> String {
    let path = fixture_path(name);
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", path.display()))
}

/// A small config with rate limiting off, so tests are not slowed down
pub(crate) fn test_config(pool_size: usize, concurrency: usize) -> Config {
    Config {
        pool_size,
        concurrency,
        rate_limit: 0.0,
        ..Config::default()
    }
}
