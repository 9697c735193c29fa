use std::path::PathBuf;

use jsinvoke::config::{Config, ConfigError};
use jsinvoke::types::SandboxLimits;

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.listen, "127.0.0.1:0");
    assert_eq!(config.pool_size, 2);
    assert_eq!(config.concurrency, 2);
    assert_eq!(config.rate_limit, 100.0);
    assert_eq!(config.effective_burst(), 5);
    assert_eq!(
        config.acquire_timeout(),
        Some(std::time::Duration::from_secs(2))
    );
    assert_eq!(
        config.library_dir,
        Some(PathBuf::from("tests/fixtures/library"))
    );
    assert_eq!(
        config.limits,
        SandboxLimits::new()
            .with_memory_limit(64 * SandboxLimits::MB)
            .with_stack_limit(512)
    );
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.pool_size, 1);
    assert_eq!(config.concurrency, 10);
    assert_eq!(config.rate_limit, 1000.0);
    assert_eq!(config.acquire_timeout(), None);
}

#[test]
fn test_load_invalid_zero_pool() {
    let path = format!("{}/configs/invalid_zero_pool.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_negative_rate() {
    let path = format!("{}/configs/invalid_negative_rate.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_syntax() {
    let path = format!("{}/configs/invalid_syntax.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_missing_file() {
    let path = format!("{}/configs/does_not_exist.toml", FIXTURES_PATH);
    assert!(Config::from_file(&path).is_err());
}
