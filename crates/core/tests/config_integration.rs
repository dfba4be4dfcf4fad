//! Configuration integration tests
//!
//! - the shipped example file parses and validates
//! - partial files merge with defaults
//! - malformed input is reported as the right error

use overlay_cnm_core::config::CnmConfig;
use overlay_cnm_core::error::{CnmError, ConfigError};

const EXAMPLE: &str = include_str!("../../../overlay-cnm.toml.example");

#[test]
fn example_config_parses_and_validates() {
    let config = CnmConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.driver.name, "Contrail");
    assert_eq!(config.driver.socket_path, "/run/docker/plugins/contrail.sock");
    assert_eq!(config.agent.url, "http://127.0.0.1:9091");
}

#[test]
fn example_config_matches_defaults_for_budgets() {
    let config = CnmConfig::parse(EXAMPLE).expect("should parse");
    let defaults = CnmConfig::default();

    assert_eq!(
        config.driver.pipe_poll_timeout_ms,
        defaults.driver.pipe_poll_timeout_ms
    );
    assert_eq!(
        config.host.create_retry_timeout_ms,
        defaults.host.create_retry_timeout_ms
    );
    assert_eq!(
        config.host.adapter_wait_interval_ms,
        defaults.host.adapter_wait_interval_ms
    );
}

#[test]
fn example_config_seeds_one_network() {
    let config = CnmConfig::parse(EXAMPLE).expect("should parse");
    assert_eq!(config.controller.networks.len(), 1);

    let seed = &config.controller.networks[0];
    assert_eq!(seed.tenant, "acme");
    assert_eq!(seed.name, "web");
    assert_eq!(seed.subnets[0].cidr, "10.0.0.0/24");
    assert_eq!(seed.subnets[0].gateway.as_deref(), Some("10.0.0.1"));
}

#[test]
fn only_one_section_present() {
    let config = CnmConfig::parse("[extension]\nenabled = true\n").expect("should parse");
    assert!(config.extension.enabled);
    assert!(config.extension.running);
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn wrong_type_is_parse_error() {
    let err = CnmConfig::parse("[driver]\npipe_poll_timeout_ms = \"soon\"\n")
        .expect_err("string for integer should fail");
    assert!(matches!(
        err,
        CnmError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[tokio::test]
async fn load_from_disk_applies_validation() {
    let dir = std::env::temp_dir().join(format!("overlay_cnm_cfg_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("should create temp dir");
    let path = dir.join("cnm.toml");
    std::fs::write(&path, "[general]\nlog_format = \"xml\"\n").expect("should write");

    let err = CnmConfig::load(&path).await.expect_err("xml is not a log format");
    assert!(matches!(
        err,
        CnmError::Config(ConfigError::InvalidValue { .. })
    ));

    let _ = std::fs::remove_dir_all(&dir);
}
