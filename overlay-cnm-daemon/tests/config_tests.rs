//! Configuration loading through the daemon's override chain.
//!
//! Precedence is file < environment < command line.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serial_test::serial;
use tempfile::TempDir;

use overlay_cnm_core::config::CnmConfig;
use overlay_cnm_daemon::cli::DaemonCli;
use overlay_cnm_daemon::load_config;

fn example_config() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("overlay-cnm.toml.example");
    fs::read_to_string(path).expect("should read example config")
}

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("overlay-cnm.toml");
    fs::write(&path, contents).expect("should write config");
    path
}

#[test]
fn test_example_config_is_valid() {
    // Given: The shipped example configuration
    let config = CnmConfig::parse(&example_config()).expect("should parse example");

    // Then: It validates and seeds one controller network
    config.validate().expect("example should validate");
    assert_eq!(config.driver.name, "Contrail");
    assert_eq!(config.controller.networks.len(), 1);
    assert_eq!(config.controller.networks[0].subnets[0].cidr, "10.0.0.0/24");
}

#[tokio::test]
#[serial]
async fn test_cli_overrides_environment_and_file() {
    // Given: A file, an env override and a CLI override for the same field
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_config(&dir, &example_config());

    // SAFETY: env mutation is serialized across this file
    unsafe {
        std::env::set_var("CNM_GENERAL_LOG_LEVEL", "warn");
        std::env::set_var("CNM_AGENT_URL", "http://192.0.2.1:9091");
    }

    let cli = DaemonCli::parse_from([
        "overlay-cnm-daemon",
        "--config",
        path.to_str().expect("utf-8 path"),
        "--log-level",
        "debug",
    ]);

    // When: Loading through the daemon chain
    let config = load_config(&cli).await;

    unsafe {
        std::env::remove_var("CNM_GENERAL_LOG_LEVEL");
        std::env::remove_var("CNM_AGENT_URL");
    }

    // Then: CLI beats env, env beats file
    let config = config.expect("should load config");
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.agent.url, "http://192.0.2.1:9091");
    assert_eq!(config.driver.adapter, "eth0");
}

#[tokio::test]
#[serial]
async fn test_missing_file_is_config_error() {
    let dir = TempDir::new().expect("should create temp dir");
    let cli = DaemonCli::parse_from([
        "overlay-cnm-daemon",
        "--config",
        dir.path().join("absent.toml").to_str().expect("utf-8 path"),
    ]);

    let err = load_config(&cli).await.expect_err("missing file should fail");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
#[serial]
async fn test_invalid_cli_override_fails_validation() {
    // Given: A valid file but an unknown log format on the command line
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_config(&dir, &example_config());
    let cli = DaemonCli::parse_from([
        "overlay-cnm-daemon",
        "--config",
        path.to_str().expect("utf-8 path"),
        "--log-format",
        "xml",
    ]);

    // When/Then: Validation rejects it as a configuration failure
    let err = load_config(&cli).await.expect_err("xml format should fail");
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("log_format"), "got: {err}");
}
