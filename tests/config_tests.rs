use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use zonecentral::{
    config::CentralConfig,
    error::ConfigError,
    serial::SerialScheme,
};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_pools_from_file() {
    let file = write_config(
        r#"
rpc_timeout_ms = 2500
serial_scheme = "date"
max_domains_per_tenant = 0

[propagation]
max_attempts = 7
target_timeout_ms = 800

[[pools]]
id = "5f0c7a7e-4f1c-4b9e-8d39-2f43c1b1a001"
name = "primary"
threshold_percentage = 50

[[pools.targets]]
name = "ns1"
address = "192.0.2.1:53"

[[pools.targets]]
name = "ns2"
address = "192.0.2.2:53"
"#,
    );

    let config = CentralConfig::load(file.path()).unwrap();
    assert_eq!(config.rpc_timeout, Duration::from_millis(2500));
    assert_eq!(config.serial_scheme, SerialScheme::DateBased);
    assert_eq!(config.max_domains_per_tenant, None);
    assert_eq!(config.propagation.max_attempts, 7);
    assert_eq!(config.propagation.target_timeout, Duration::from_millis(800));

    assert_eq!(config.pools.len(), 1);
    let pool = &config.pools[0];
    assert_eq!(config.default_pool_id, pool.id);
    assert_eq!(pool.threshold_percentage, 50);
    assert_eq!(pool.quorum(), 1);
    assert_eq!(pool.targets.len(), 2);
    assert!(pool.targets.iter().all(|t| t.pool_id == pool.id));
}

#[test]
fn test_load_rejects_invalid_threshold() {
    let file = write_config(
        r#"
[[pools]]
name = "broken"
threshold_percentage = 0

[[pools.targets]]
name = "ns1"
address = "192.0.2.1:53"
"#,
    );

    assert!(matches!(
        CentralConfig::load(file.path()),
        Err(ConfigError::InvalidThreshold(_))
    ));
}

#[test]
fn test_load_reports_syntax_errors() {
    let file = write_config("rpc_timeout_ms = ");
    assert!(matches!(
        CentralConfig::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    assert!(matches!(
        CentralConfig::load("/nonexistent/zonecentral.toml"),
        Err(ConfigError::Io(_))
    ));
}
