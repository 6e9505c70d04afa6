use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::PeerService;
use super::protocol::*;

/// Routes for the HTTP half of the peer RPC surface.
pub fn router(service: Arc<dyn PeerService>) -> Router {
    Router::new()
        .route(ENDPOINT_REQUEST_ENTRY, post(handle_request_entry))
        .route(ENDPOINT_REPLY_ENTRY, post(handle_reply_entry))
        .route(ENDPOINT_STATE, get(handle_query_state))
        .layer(Extension(service))
}

pub async fn handle_request_entry(
    Extension(service): Extension<Arc<dyn PeerService>>,
    Json(msg): Json<RequestEntry>,
) -> StatusCode {
    tracing::debug!(
        "Received request_entry from {} (ts={})",
        msg.requester,
        msg.timestamp
    );
    service.request_entry(msg);
    StatusCode::ACCEPTED
}

pub async fn handle_reply_entry(
    Extension(service): Extension<Arc<dyn PeerService>>,
    Json(msg): Json<ReplyEntry>,
) -> StatusCode {
    tracing::debug!(
        "Received reply_entry from {} (for ts={})",
        msg.responder,
        msg.request_timestamp
    );
    service.reply_entry(msg);
    StatusCode::ACCEPTED
}

pub async fn handle_query_state(
    Extension(service): Extension<Arc<dyn PeerService>>,
) -> Json<StateSnapshot> {
    Json(service.query_state())
}

/// Receives heartbeat datagrams until `token` is cancelled.
pub async fn heartbeat_listener(
    socket: Arc<UdpSocket>,
    service: Arc<dyn PeerService>,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; 2048];

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, src)) => match bincode::deserialize::<Heartbeat>(&buf[..len]) {
                Ok(msg) => service.heartbeat(msg),
                Err(e) => {
                    tracing::warn!("Failed to deserialize heartbeat from {}: {}", src, e);
                }
            },
            Err(e) => {
                tracing::error!("Failed to receive UDP packet: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    tracing::debug!("Heartbeat listener stopped");
}
