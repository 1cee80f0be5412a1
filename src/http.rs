//! HTTP control API
//!
//! A small JSON API over one [`Interface`], served by the daemon:
//!
//! - `GET /healthz`: liveness of the device
//! - `GET /peers`: current peers
//! - `POST /peers`: add a peer (`{public_key, preshared_key?, allowed_ips}`)
//! - `DELETE /peers`: remove a peer (`{public_key}`)
//! - `GET /public-key`: the device public key

use crate::error::{ErrorKind, WgEmbedError};
use crate::iface::Interface;
use crate::wireguard::Peer;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{error, info};

/// Build the API router for `iface`
pub fn router(iface: Arc<Interface>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/peers", get(list_peers).post(add_peer).delete(remove_peer))
        .route("/public-key", get(public_key))
        .with_state(iface)
}

/// JSON view of a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerView {
    /// Base64 public key
    pub public_key: String,
    /// Current endpoint
    pub endpoint: Option<String>,
    /// Allowed IP ranges
    pub allowed_ips: Vec<String>,
    /// Persistent keepalive in seconds
    pub persistent_keepalive: Option<u64>,
    /// Last handshake, seconds since the Unix epoch
    pub last_handshake: Option<u64>,
    /// Bytes received
    pub rx_bytes: u64,
    /// Bytes sent
    pub tx_bytes: u64,
}

impl From<&Peer> for PeerView {
    fn from(peer: &Peer) -> Self {
        Self {
            public_key: peer.public_key.to_base64(),
            endpoint: peer.endpoint.map(|e| e.to_string()),
            allowed_ips: peer.allowed_ips.iter().map(|n| n.to_string()).collect(),
            persistent_keepalive: peer.persistent_keepalive_interval.map(|d| d.as_secs()),
            last_handshake: peer
                .last_handshake
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            rx_bytes: peer.rx_bytes,
            tx_bytes: peer.tx_bytes,
        }
    }
}

/// Body of `POST /peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerRequest {
    /// Base64 public key
    pub public_key: String,
    /// Base64 preshared key
    #[serde(default)]
    pub preshared_key: Option<String>,
    /// Allowed IP ranges (CIDR notation)
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Body of `DELETE /peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePeerRequest {
    /// Base64 public key
    pub public_key: String,
}

#[derive(Serialize)]
struct PublicKeyResponse {
    public_key: String,
}

struct ApiError(WgEmbedError);

impl From<WgEmbedError> for ApiError {
    fn from(err: WgEmbedError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Liveness => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("HTTP request failed: {}", self.0);
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint
async fn healthz(State(iface): State<Arc<Interface>>) -> Result<impl IntoResponse, ApiError> {
    iface.ping().await?;
    Ok((StatusCode::OK, "OK"))
}

async fn list_peers(State(iface): State<Arc<Interface>>) -> Result<Json<Vec<PeerView>>, ApiError> {
    let peers = iface.list_peers().await?;
    Ok(Json(peers.iter().map(PeerView::from).collect()))
}

async fn add_peer(
    State(iface): State<Arc<Interface>>,
    Json(request): Json<AddPeerRequest>,
) -> Result<StatusCode, ApiError> {
    iface
        .add_peer(
            &request.public_key,
            request.preshared_key.as_deref(),
            &request.allowed_ips,
        )
        .await?;
    info!("Added peer {} via HTTP API", request.public_key);
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_peer(
    State(iface): State<Arc<Interface>>,
    Json(request): Json<RemovePeerRequest>,
) -> Result<StatusCode, ApiError> {
    iface.remove_peer(&request.public_key).await?;
    info!("Removed peer {} via HTTP API", request.public_key);
    Ok(StatusCode::NO_CONTENT)
}

async fn public_key(
    State(iface): State<Arc<Interface>>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    let public_key = iface.public_key().await?;
    Ok(Json(PublicKeyResponse { public_key }))
}
