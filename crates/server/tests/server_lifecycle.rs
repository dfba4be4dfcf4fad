//! Protocol server over a real Unix socket, backed by the driver core and
//! the in-process collaborators.

use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use hyper::Request;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::UnixStream;

use overlay_cnm_core::error::ServerError;
use overlay_cnm_core::model::Subnet;
use overlay_cnm_core::naming::NamingScheme;
use overlay_cnm_core::polling::PollingPolicy;
use overlay_cnm_driver::simulator::{RecordingPorts, SimulatedController, SimulatedHost};
use overlay_cnm_driver::{DriverCore, DriverCoreBuilder, HostRepository};
use overlay_cnm_server::{CnmServer, ServerConfig, ServerState};

type Repo = HostRepository<SimulatedHost, SimulatedHost>;
type Core = DriverCore<SimulatedController, Repo, Repo, RecordingPorts>;

struct Harness {
    server: CnmServer<Core>,
    config: ServerConfig,
    socket: PathBuf,
    spec_file: PathBuf,
    _dir: tempfile::TempDir,
}

fn driver() -> Arc<Core> {
    let host = Arc::new(
        SimulatedHost::new().with_interface("eth0", vec![Ipv4Addr::new(192, 168, 1, 10)]),
    );
    let repo = Arc::new(
        HostRepository::new(Arc::clone(&host), host, NamingScheme::default(), "eth0")
            .with_create_policy(PollingPolicy::one_shot())
            .with_adapter_policy(PollingPolicy::one_shot()),
    );
    let controller = SimulatedController::new().with_network(
        "acme",
        "web",
        vec![Subnet {
            cidr: "10.0.0.0/24".parse().expect("should parse cidr"),
            default_gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dns_servers: Vec::new(),
        }],
    );
    let core = DriverCoreBuilder::new()
        .controller(Arc::new(controller))
        .networks(Arc::clone(&repo))
        .endpoints(repo)
        .ports(Arc::new(RecordingPorts::new()))
        .build()
        .expect("should build driver core");
    Arc::new(core)
}

fn harness_with(plugin_dir: impl FnOnce(&Path) -> PathBuf) -> Harness {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let socket = dir.path().join("run").join("cnm.sock");
    let plugin_dir = plugin_dir(dir.path());
    let config = ServerConfig {
        socket_path: socket.clone(),
        plugin_dir: plugin_dir.clone(),
        name: "Contrail".to_owned(),
        poll: PollingPolicy::timeout(Duration::from_secs(2), Duration::from_millis(10)),
    };
    Harness {
        server: CnmServer::new(driver(), config.clone()),
        config,
        socket,
        spec_file: plugin_dir.join("Contrail.spec"),
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(|root| root.join("plugins"))
}

/// Sends one protocol request over the socket and returns status and JSON body.
async fn call(socket: &Path, path: &str, body: &str) -> (u16, Value) {
    let stream = UnixStream::connect(socket).await.expect("should connect");
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .expect("should complete the http handshake");
    tokio::spawn(connection);

    let request = Request::post(path)
        .header(HOST, "localhost")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .expect("should build request");
    let response = sender
        .send_request(request)
        .await
        .expect("should receive a response");

    let status = response.status().as_u16();
    assert_eq!(
        response.headers()[CONTENT_TYPE],
        "application/vnd.docker.plugins.v1.2+json"
    );
    let payload = to_bytes(Body::new(response.into_body()), usize::MAX)
        .await
        .expect("should read response body");
    let json = if payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&payload).expect("body should be json")
    };
    (status, json)
}

fn create_network_body() -> String {
    json!({
        "NetworkID": "net-1",
        "Options": { "com.docker.network.generic": { "tenant": "acme", "network": "web" } },
        "IPv4Data": [ { "AddressSpace": "", "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24" } ],
        "IPv6Data": []
    })
    .to_string()
}

fn endpoint_body(endpoint: &str) -> String {
    json!({ "NetworkID": "net-1", "EndpointID": endpoint }).to_string()
}

#[tokio::test]
async fn start_publishes_and_stop_releases_everything() {
    // Given
    let mut h = harness();
    assert_eq!(h.server.state(), ServerState::NotServing);

    // When
    h.server.start().await.expect("start should succeed");

    // Then: the socket is owner-only and the discovery file points at it
    assert_eq!(h.server.state(), ServerState::Serving);
    let mode = std::fs::metadata(&h.socket)
        .expect("socket should exist")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
    let spec = std::fs::read_to_string(&h.spec_file).expect("discovery file should exist");
    assert_eq!(spec, format!("unix://{}", h.socket.display()));

    assert!(matches!(
        h.server.start().await,
        Err(ServerError::AlreadyServing)
    ));

    // When
    h.server.stop().await.expect("stop should succeed");

    // Then
    assert_eq!(h.server.state(), ServerState::NotServing);
    assert!(!h.spec_file.exists());
    assert!(!h.socket.exists());
    assert!(UnixStream::connect(&h.socket).await.is_err());
    assert!(matches!(h.server.stop().await, Err(ServerError::NotServing)));
}

#[tokio::test]
async fn server_can_be_restarted_over_a_stale_socket() {
    let mut h = harness();
    std::fs::create_dir_all(h.socket.parent().expect("socket has a parent"))
        .expect("should create run dir");
    std::fs::write(&h.socket, b"stale").expect("should write stale file");

    h.server.start().await.expect("first start");
    h.server.stop().await.expect("first stop");
    h.server.start().await.expect("second start");

    let (status, body) = call(&h.socket, "/Plugin.Activate", "{}").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "Implements": ["NetworkDriver"] }));
    h.server.stop().await.expect("second stop");
}

#[tokio::test]
async fn second_server_cannot_take_over_a_live_socket() {
    // Given: a serving server
    let mut first = harness();
    first.server.start().await.expect("first start");

    // When: another server is started on the same socket
    let mut second = CnmServer::new(driver(), first.config.clone());
    let err = second.start().await.expect_err("live socket must not be taken over");

    // Then: the second server refuses and the first keeps serving
    assert!(matches!(
        err,
        ServerError::Startup {
            stage: "socket already in use",
            ..
        }
    ));
    assert_eq!(second.state(), ServerState::NotServing);
    assert!(first.spec_file.exists());
    let (status, _) = call(&first.socket, "/Plugin.Activate", "{}").await;
    assert_eq!(status, 200);

    first.server.stop().await.expect("first stop");
    assert!(!first.socket.exists());
    assert!(matches!(second.stop().await, Err(ServerError::NotServing)));
}

#[tokio::test]
async fn failed_start_leaves_nothing_behind() {
    // Given: the plugin directory path is occupied by a regular file
    let mut h = harness_with(|root| {
        let blocker = root.join("plugins");
        std::fs::write(&blocker, b"not a dir").expect("should create blocker");
        blocker
    });

    // When
    let err = h.server.start().await.expect_err("discovery file cannot be written");

    // Then
    assert!(matches!(
        err,
        ServerError::Startup {
            stage: "writing discovery file",
            ..
        }
    ));
    assert_eq!(h.server.state(), ServerState::NotServing);
    assert!(!h.socket.exists());
}

#[tokio::test]
async fn protocol_calls_drive_the_endpoint_lifecycle() {
    let mut h = harness();
    h.server.start().await.expect("start should succeed");
    let socket = h.socket.clone();

    let (status, body) = call(&socket, "/NetworkDriver.GetCapabilities", "").await;
    assert_eq!((status, body), (200, json!({ "Scope": "local" })));

    let (status, body) = call(&socket, "/NetworkDriver.CreateNetwork", &create_network_body()).await;
    assert_eq!((status, body), (200, json!({})));

    // Runtime-assigned address: only the MAC comes back
    let create = json!({
        "NetworkID": "net-1",
        "EndpointID": "ep1",
        "Interface": { "Address": "10.0.0.42/24" }
    });
    let (status, body) = call(&socket, "/NetworkDriver.CreateEndpoint", &create.to_string()).await;
    assert_eq!(status, 200);
    assert!(body["Interface"].get("Address").is_none());
    let mac = body["Interface"]["MacAddress"]
        .as_str()
        .expect("mac should be returned")
        .to_owned();
    assert_eq!(mac.split(':').count(), 6);

    // Driver-assigned address is returned as CIDR
    let (status, body) = call(&socket, "/NetworkDriver.CreateEndpoint", &endpoint_body("ep2")).await;
    assert_eq!(status, 200);
    let address = body["Interface"]["Address"].as_str().expect("address");
    assert!(address.starts_with("10.0.0.") && address.ends_with("/24"));

    let (status, body) = call(&socket, "/NetworkDriver.EndpointOperInfo", &endpoint_body("ep1")).await;
    assert_eq!(status, 200);
    assert!(body["Value"]["hnsid"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(
        body["Value"]["com.docker.network.endpoint.macaddress"],
        mac.replace(':', "-").to_uppercase()
    );

    let join = json!({ "NetworkID": "net-1", "EndpointID": "ep1", "SandboxKey": "/var/run/netns/x" });
    let (status, body) = call(&socket, "/NetworkDriver.Join", &join.to_string()).await;
    assert_eq!(
        (status, body),
        (200, json!({ "Gateway": "10.0.0.1", "DisableGatewayService": true }))
    );

    let (status, _) = call(&socket, "/NetworkDriver.Leave", &endpoint_body("ep1")).await;
    assert_eq!(status, 200);

    // Network still has endpoints
    let network = json!({ "NetworkID": "net-1" }).to_string();
    let (status, body) = call(&socket, "/NetworkDriver.DeleteNetwork", &network).await;
    assert_eq!(
        (status, body),
        (500, json!({ "Err": "cannot delete network with active endpoints" }))
    );

    for endpoint in ["ep1", "ep2"] {
        let (status, _) = call(&socket, "/NetworkDriver.DeleteEndpoint", &endpoint_body(endpoint)).await;
        assert_eq!(status, 200);
    }
    let (status, _) = call(&socket, "/NetworkDriver.DeleteNetwork", &network).await;
    assert_eq!(status, 200);

    h.server.stop().await.expect("stop should succeed");
}

#[tokio::test]
async fn protocol_errors_are_reported_in_err_field() {
    let mut h = harness();
    h.server.start().await.expect("start should succeed");
    let socket = h.socket.clone();

    for path in ["/NetworkDriver.AllocateNetwork", "/NetworkDriver.FreeNetwork"] {
        let (status, body) = call(&socket, path, "{}").await;
        assert_eq!((status, body), (500, json!({ "Err": "not implemented" })));
    }

    let missing = json!({ "NetworkID": "net-1", "IPv4Data": [] }).to_string();
    let (status, body) = call(&socket, "/NetworkDriver.CreateNetwork", &missing).await;
    assert_eq!((status, body), (500, json!({ "Err": "Generic options missing" })));

    let (status, body) = call(&socket, "/NetworkDriver.CreateNetwork", "{not json").await;
    assert_eq!(status, 400);
    assert!(body["Err"].as_str().is_some_and(|e| e.starts_with("failed to decode request")));

    let (status, body) = call(&socket, "/NetworkDriver.Join", &endpoint_body("ghost")).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "Err": "endpoint ghost not found" }));

    for path in [
        "/NetworkDriver.DiscoverNew",
        "/NetworkDriver.DiscoverDelete",
        "/NetworkDriver.ProgramExternalConnectivity",
        "/NetworkDriver.RevokeExternalConnectivity",
    ] {
        let (status, body) = call(&socket, path, "{}").await;
        assert_eq!((status, body), (200, json!({})));
    }

    h.server.stop().await.expect("stop should succeed");
}
