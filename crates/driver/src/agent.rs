//! HTTP client for the dataplane agent's port table.
//!
//! - `POST {url}/port` with a [`PortRequest`] body
//! - `DELETE {url}/port/{vif_uuid}`
//!
//! Anything but `200 OK` is a failure of that call.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use overlay_cnm_core::config::AgentConfig;
use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::model::PortBinding;
use overlay_cnm_core::ports::PortAssociation;

/// Body of `POST /port`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortRequest<'a> {
    pub time: String,
    pub instance_id: &'a str,
    pub id: &'a str,
    pub system_name: &'a str,
    pub mac_address: String,
    pub display_name: &'a str,
    pub ip_address: String,
    pub vn_id: &'a str,
    pub ip6_address: &'a str,
    #[serde(rename = "type")]
    pub port_type: u8,
    pub rx_vlan_id: i32,
    pub tx_vlan_id: i32,
    pub vm_project_id: &'a str,
}

impl<'a> PortRequest<'a> {
    pub fn from_binding(port: &'a PortBinding) -> Self {
        Self {
            time: chrono::Utc::now().to_rfc3339(),
            instance_id: &port.vm_uuid,
            id: &port.vif_uuid,
            system_name: &port.interface_name,
            mac_address: port.mac.to_string(),
            display_name: &port.container_id,
            ip_address: port.ip.to_string(),
            vn_id: &port.network_uuid,
            ip6_address: "",
            port_type: 0,
            rx_vlan_id: -1,
            tx_vlan_id: -1,
            vm_project_id: "",
        }
    }
}

/// [`PortAssociation`] backed by the agent's REST API.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    /// # Errors
    ///
    /// [`DriverError::PortAssociation`] if the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DriverError::PortAssociation(format!("failed to build client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), DriverError> {
        let response = request
            .send()
            .await
            .map_err(|e| DriverError::PortAssociation(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DriverError::PortAssociation(format!(
                "Send request failed with status code = {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

impl PortAssociation for AgentClient {
    async fn add_port(&self, port: &PortBinding) -> Result<(), DriverError> {
        let body = PortRequest::from_binding(port);
        debug!(vif_uuid = %port.vif_uuid, "POST /port");
        self.send(self.http.post(format!("{}/port", self.base_url)).json(&body))
            .await
    }

    async fn delete_port(&self, vif_uuid: &str) -> Result<(), DriverError> {
        debug!(vif_uuid, "DELETE /port");
        self.send(self.http.delete(format!("{}/port/{vif_uuid}", self.base_url)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{delete, post};
    use tokio::sync::Mutex;

    use overlay_cnm_core::model::MacAddress;

    #[derive(Default)]
    struct AgentState {
        added: Vec<serde_json::Value>,
        deleted: Vec<String>,
    }

    async fn spawn_agent(status: HttpStatus) -> (String, Arc<Mutex<AgentState>>) {
        let state = Arc::new(Mutex::new(AgentState::default()));
        let app = Router::new()
            .route(
                "/port",
                post(
                    move |State(s): State<Arc<Mutex<AgentState>>>,
                          axum::Json(body): axum::Json<serde_json::Value>| async move {
                        s.lock().await.added.push(body);
                        status
                    },
                ),
            )
            .route(
                "/port/{vif}",
                delete(
                    move |State(s): State<Arc<Mutex<AgentState>>>, Path(vif): Path<String>| async move {
                        s.lock().await.deleted.push(vif);
                        status
                    },
                ),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), state)
    }

    fn client(url: &str) -> AgentClient {
        AgentClient::new(&AgentConfig {
            url: format!("{url}/"),
            request_timeout_secs: 5,
        })
        .expect("should build client")
    }

    fn binding() -> PortBinding {
        PortBinding {
            vm_uuid: "vm-1".to_owned(),
            vif_uuid: "vif-1".to_owned(),
            interface_name: "Container NIC 1a2b3c4d".to_owned(),
            mac: MacAddress::new([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
            container_id: "ep1".to_owned(),
            ip: Ipv4Addr::new(10, 0, 0, 2),
            network_uuid: "vn-1".to_owned(),
        }
    }

    #[test]
    fn port_request_uses_agent_field_names() {
        let port = binding();
        let json = serde_json::to_value(PortRequest::from_binding(&port)).expect("should serialize");
        assert_eq!(json["instance-id"], "vm-1");
        assert_eq!(json["id"], "vif-1");
        assert_eq!(json["system-name"], "Container NIC 1a2b3c4d");
        assert_eq!(json["mac-address"], "02:aa:bb:cc:dd:ee");
        assert_eq!(json["display-name"], "ep1");
        assert_eq!(json["ip-address"], "10.0.0.2");
        assert_eq!(json["vn-id"], "vn-1");
        assert_eq!(json["ip6-address"], "");
        assert_eq!(json["type"], 0);
        assert_eq!(json["rx-vlan-id"], -1);
        assert_eq!(json["tx-vlan-id"], -1);
        assert_eq!(json["vm-project-id"], "");
        assert!(json["time"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn add_and_delete_port_hit_the_agent() {
        let (url, state) = spawn_agent(HttpStatus::OK).await;
        let client = client(&url);
        assert_eq!(client.base_url(), url);

        client.add_port(&binding()).await.expect("add should succeed");
        client.delete_port("vif-1").await.expect("delete should succeed");

        let state = state.lock().await;
        assert_eq!(state.added.len(), 1);
        assert_eq!(state.added[0]["id"], "vif-1");
        assert_eq!(state.deleted, vec!["vif-1".to_owned()]);
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let (url, _) = spawn_agent(HttpStatus::CREATED).await;
        let err = client(&url)
            .add_port(&binding())
            .await
            .expect_err("201 is not success for the agent");
        assert!(err.to_string().contains("Send request failed with status code = 201"));
    }

    #[tokio::test]
    async fn unreachable_agent_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .delete_port("vif-1")
            .await
            .expect_err("nothing listens");
        assert!(matches!(err, DriverError::PortAssociation(_)));
    }
}
