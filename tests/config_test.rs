use pgbreaker::config::{self, PoolConfig};
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
host: db.internal
user: app
password: hunter2
database: orders
pool_size: 8
fail_rate: 0.25
universe: 20
timeout_ms: 1500
regeneration_cooldown_ms: 10000
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pool.yaml");
    fs::write(&config_path, yaml).unwrap();

    let options = config::load_from_yaml(&config_path).unwrap();
    assert_eq!(options.host.as_deref(), Some("db.internal"));
    assert_eq!(options.pool_size, 8);

    let config = PoolConfig::normalize(&options, None);
    assert_eq!(
        config.url.as_deref(),
        Some("user=app dbname=orders host=db.internal password=hunter2")
    );
    assert_eq!(config.pool_size, 8);
    assert_eq!(config.fail_rate, 0.25);
    assert_eq!(config.universe, 20);
    assert_eq!(config.timeout, Duration::from_millis(1500));
    assert_eq!(config.regeneration_cooldown, Duration::from_secs(10));
}

/// Test that a broken YAML file is reported rather than defaulted
#[test]
fn test_invalid_yaml_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pool.yaml");
    fs::write(&config_path, "pool_size: [not, a, number]\n").unwrap();

    assert!(config::load_from_yaml(&config_path).is_err());
    assert!(config::load_config(Some("/nonexistent/pool.yaml")).is_err());
}

/// Test loading configuration from environment variables
///
/// Kept as a single test so no other test observes the variables.
#[test]
fn test_load_env_config() {
    let names = [
        "DATABASE_URL",
        "PG_HOST",
        "POOL_SIZE",
        "POOL_FAIL_RATE",
        "POOL_UNIVERSE",
        "POOL_TIMEOUT_MS",
        "POOL_REGENERATION_COOLDOWN_MS",
    ];
    let saved: Vec<(&str, Option<String>)> =
        names.iter().map(|name| (*name, env::var(name).ok())).collect();

    env::remove_var("PG_HOST");
    env::set_var("DATABASE_URL", "postgres://app@localhost/orders");
    env::set_var("POOL_SIZE", "4");
    env::set_var("POOL_FAIL_RATE", "0.75");
    env::set_var("POOL_UNIVERSE", "2");
    env::set_var("POOL_TIMEOUT_MS", "250");
    env::set_var("POOL_REGENERATION_COOLDOWN_MS", "500");

    let options = config::load_config(None).unwrap();
    let config = PoolConfig::normalize(&options, None);

    assert_eq!(config.url.as_deref(), Some("postgres://app@localhost/orders"));
    assert_eq!(config.pool_size, 4);
    assert_eq!(config.fail_rate, 0.75);
    // Raised to the pool size
    assert_eq!(config.universe, 4);
    assert_eq!(config.timeout, Duration::from_millis(250));
    assert_eq!(config.regeneration_cooldown, Duration::from_millis(500));

    env::set_var("POOL_SIZE", "lots");
    assert!(config::load_from_env().is_err());

    for (name, value) in saved {
        cleanup_env(name, value);
    }
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
