//! Orchestrator assembly and startup gating tests.

use overlay_cnm_core::config::{CnmConfig, NetworkSeed, SubnetSeed};
use overlay_cnm_daemon::Orchestrator;
use overlay_cnm_server::ServerState;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> CnmConfig {
    let mut config = CnmConfig::default();
    config.driver.socket_path = dir
        .path()
        .join("plugins")
        .join("cnm.sock")
        .to_string_lossy()
        .into_owned();
    config.driver.plugin_dir = dir.path().join("spec").to_string_lossy().into_owned();
    config.general.pid_file = String::new();
    config.metrics.enabled = false;
    config
}

#[tokio::test]
async fn test_start_enables_extension_and_serves() {
    // Given: An extension that is running but disabled
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.extension.enabled = false;
    config.extension.running = true;
    let socket = std::path::PathBuf::from(&config.driver.socket_path);

    let mut orchestrator = Orchestrator::build_from_config(config).expect("should build");
    assert_eq!(orchestrator.server_state(), ServerState::NotServing);

    // When: Starting
    orchestrator.start().await.expect("should start");

    // Then: The socket and discovery file exist until stop
    assert_eq!(orchestrator.server_state(), ServerState::Serving);
    assert!(socket.exists(), "socket should exist while serving");
    let spec_file = dir.path().join("spec").join("Contrail.spec");
    assert!(spec_file.exists(), "discovery file should exist");

    orchestrator.stop().await.expect("should stop");
    assert!(!socket.exists(), "socket should be removed");
    assert!(!spec_file.exists(), "discovery file should be removed");

    // Stopping twice is harmless
    orchestrator.stop().await.expect("second stop should be a no-op");
}

#[tokio::test]
async fn test_stopped_extension_aborts_with_vrouter_code() {
    // Given: A forwarding extension that is not running
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.extension.running = false;
    let socket = std::path::PathBuf::from(&config.driver.socket_path);

    let mut orchestrator = Orchestrator::build_from_config(config).expect("should build");

    // When: Starting
    let err = orchestrator.start().await.expect_err("should refuse to start");

    // Then: Exit code 3 and no socket was ever created
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("Extension is stopped"), "got: {err}");
    assert!(!socket.exists());
    assert_eq!(orchestrator.server_state(), ServerState::NotServing);
}

#[tokio::test]
async fn test_unusable_plugin_dir_aborts_with_startup_code() {
    // Given: A plugin directory path occupied by a regular file
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.extension.enabled = true;
    std::fs::write(&config.driver.plugin_dir, "not a dir").expect("should write file");

    let mut orchestrator = Orchestrator::build_from_config(config).expect("should build");

    let err = orchestrator.start().await.expect_err("should fail to start");
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_held_pid_file_aborts_before_serving() {
    // Given: A PID file another instance still holds
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    let pid_path = dir.path().join("overlay-cnm.pid");
    std::fs::write(&pid_path, "4242\n").expect("should write PID file");
    config.general.pid_file = pid_path.to_string_lossy().into_owned();
    let socket = std::path::PathBuf::from(&config.driver.socket_path);

    let mut orchestrator = Orchestrator::build_from_config(config).expect("should build");

    // When: Running
    let err = orchestrator.run().await.expect_err("should refuse to run");

    // Then: Startup failure, the foreign PID file is kept, nothing was served
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("4242"), "got: {err}");
    assert!(pid_path.exists());
    assert!(!socket.exists());
    assert_eq!(orchestrator.server_state(), ServerState::NotServing);
}

#[test]
fn test_bad_controller_seed_is_config_error() {
    // Given: A seeded network with an unparsable subnet
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.controller.networks = vec![NetworkSeed {
        tenant: "acme".to_owned(),
        name: "web".to_owned(),
        subnets: vec![SubnetSeed {
            cidr: "not-a-cidr".to_owned(),
            gateway: None,
            dns: Vec::new(),
        }],
    }];

    // When: Building
    let err = Orchestrator::build_from_config(config)
        .err()
        .expect("bad seed should fail");

    // Then: It is a configuration failure
    assert_eq!(err.exit_code(), 2);
}
