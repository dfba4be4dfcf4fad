//! Request routing: one handler per protocol call.
//!
//! Every handler decodes its body, dispatches to at most one
//! [`NetworkDriver`] operation and encodes either the response or an
//! `{"Err": ...}` body. Decode failures answer 400, everything else 500.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use overlay_cnm_core::metrics as m;
use overlay_cnm_core::ports::NetworkDriver;

use crate::protocol::{
    ActivateResponse, CONTENT_TYPE, CapabilitiesResponse, CreateEndpointRequest,
    CreateEndpointResponse, CreateNetworkRequest, Empty, EndpointInterface, EndpointRequest,
    ErrorResponse, HandlerError, INFO_HOST_ID_KEY, INFO_MAC_KEY, InfoResponse, JoinResponse,
    NetworkRequest,
};

/// Shared handler state.
pub struct AppState<D> {
    driver: Arc<D>,
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

/// Builds the protocol router over `driver`.
pub fn router<D: NetworkDriver>(driver: Arc<D>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network::<D>))
        .route("/NetworkDriver.AllocateNetwork", post(|| unsupported("AllocateNetwork")))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network::<D>))
        .route("/NetworkDriver.FreeNetwork", post(|| unsupported("FreeNetwork")))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint::<D>))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint::<D>))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info::<D>))
        .route("/NetworkDriver.Join", post(join::<D>))
        .route("/NetworkDriver.Leave", post(leave::<D>))
        .route("/NetworkDriver.DiscoverNew", post(|| ignored("DiscoverNew")))
        .route("/NetworkDriver.DiscoverDelete", post(|| ignored("DiscoverDelete")))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(|| ignored("ProgramExternalConnectivity")),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(|| ignored("RevokeExternalConnectivity")),
        )
        .with_state(AppState { driver })
}

async fn activate() -> Response {
    respond(
        "Activate",
        Ok(ActivateResponse {
            implements: vec!["NetworkDriver"],
        }),
    )
}

async fn capabilities() -> Response {
    respond("GetCapabilities", Ok(CapabilitiesResponse { scope: "local" }))
}

async fn unsupported(operation: &'static str) -> Response {
    record_request(operation);
    respond::<Empty>(operation, Err(HandlerError::NotImplemented))
}

async fn ignored(operation: &'static str) -> Response {
    record_request(operation);
    respond(operation, Ok(Empty {}))
}

async fn create_network<D: NetworkDriver>(
    State(state): State<AppState<D>>,
    body: Bytes,
) -> Response {
    handle("CreateNetwork", &body, |req: CreateNetworkRequest| async move {
        let selector = req.selector()?;
        state
            .driver
            .create_network(
                &req.network_id,
                &selector.tenant,
                &selector.network,
                &selector.subnet,
            )
            .await?;
        Ok(Empty {})
    })
    .await
}

async fn delete_network<D: NetworkDriver>(
    State(state): State<AppState<D>>,
    body: Bytes,
) -> Response {
    handle("DeleteNetwork", &body, |req: NetworkRequest| async move {
        state.driver.delete_network(&req.network_id).await?;
        Ok(Empty {})
    })
    .await
}

async fn create_endpoint<D: NetworkDriver>(
    State(state): State<AppState<D>>,
    body: Bytes,
) -> Response {
    handle("CreateEndpoint", &body, |req: CreateEndpointRequest| async move {
        let requested = req.requested_ip()?;
        let endpoint = state
            .driver
            .create_endpoint(&req.network_id, &req.endpoint_id, requested)
            .await?;
        // The runtime keeps an address it assigned itself.
        let address = match requested {
            Some(_) => String::new(),
            None => format!("{}/{}", endpoint.container.ip, endpoint.container.prefix_len),
        };
        Ok(CreateEndpointResponse {
            interface: EndpointInterface {
                address,
                address_ipv6: String::new(),
                mac_address: endpoint.container.mac.to_string(),
            },
        })
    })
    .await
}

async fn delete_endpoint<D: NetworkDriver>(
    State(state): State<AppState<D>>,
    body: Bytes,
) -> Response {
    handle("DeleteEndpoint", &body, |req: EndpointRequest| async move {
        state
            .driver
            .delete_endpoint(&req.network_id, &req.endpoint_id)
            .await?;
        Ok(Empty {})
    })
    .await
}

async fn endpoint_info<D: NetworkDriver>(
    State(state): State<AppState<D>>,
    body: Bytes,
) -> Response {
    handle("EndpointOperInfo", &body, |req: EndpointRequest| async move {
        let endpoint = state.driver.endpoint(&req.endpoint_id).await?;
        let value = HashMap::from([
            (INFO_HOST_ID_KEY, endpoint.local_id),
            (INFO_MAC_KEY, endpoint.mac.to_host_format()),
        ]);
        Ok(InfoResponse { value })
    })
    .await
}

async fn join<D: NetworkDriver>(State(state): State<AppState<D>>, body: Bytes) -> Response {
    handle("Join", &body, |req: EndpointRequest| async move {
        let endpoint = state.driver.endpoint(&req.endpoint_id).await?;
        Ok(JoinResponse {
            gateway: endpoint.gateway.to_string(),
            disable_gateway_service: true,
        })
    })
    .await
}

async fn leave<D: NetworkDriver>(State(state): State<AppState<D>>, body: Bytes) -> Response {
    handle("Leave", &body, |req: EndpointRequest| async move {
        state.driver.endpoint(&req.endpoint_id).await?;
        Ok(Empty {})
    })
    .await
}

fn record_request(operation: &'static str) {
    metrics::counter!(m::REQUESTS_TOTAL, m::LABEL_OPERATION => operation).increment(1);
}

async fn handle<Req, Resp, F, Fut>(operation: &'static str, body: &[u8], op: F) -> Response
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp, HandlerError>>,
{
    let started = Instant::now();
    record_request(operation);
    debug!(operation, request = %String::from_utf8_lossy(body), "protocol request");

    let result = match serde_json::from_slice::<Req>(body) {
        Ok(req) => op(req).await,
        Err(e) => Err(HandlerError::BadRequest(format!(
            "failed to decode request: {e}"
        ))),
    };
    let response = respond(operation, result);

    metrics::histogram!(m::REQUEST_DURATION_SECONDS, m::LABEL_OPERATION => operation)
        .record(started.elapsed().as_secs_f64());
    response
}

fn respond<Resp: Serialize>(operation: &'static str, result: Result<Resp, HandlerError>) -> Response {
    let (status, body) = match result.and_then(|resp| {
        serde_json::to_vec(&resp)
            .map_err(|e| HandlerError::Invalid(format!("failed to encode response: {e}")))
    }) {
        Ok(body) => {
            debug!(operation, response = %String::from_utf8_lossy(&body), "protocol response");
            (StatusCode::OK, body)
        }
        Err(e) => {
            metrics::counter!(m::REQUEST_ERRORS_TOTAL, m::LABEL_OPERATION => operation)
                .increment(1);
            warn!(operation, error = %e, "protocol request failed");
            let status = match e {
                HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = serde_json::to_vec(&ErrorResponse { err: e.to_string() })
                .unwrap_or_default();
            (status, body)
        }
    };
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}
