use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::coordinator::Peer;
use super::protocol::*;
use crate::error::MutexError;
use crate::transport::PeerService;
use crate::transport::protocol::StateSnapshot;

/// Peer RPC routes plus the application control routes.
pub fn router(peer: Arc<Peer>) -> Router {
    let service: Arc<dyn PeerService> = peer.clone();

    Router::new()
        .route(ENDPOINT_ACQUIRE, post(handle_acquire))
        .route(ENDPOINT_RELEASE, post(handle_release))
        .route(ENDPOINT_APP_STATE, get(handle_app_state))
        .layer(Extension(peer))
        .merge(crate::transport::handlers::router(service))
}

pub async fn handle_acquire(
    Extension(peer): Extension<Arc<Peer>>,
) -> (StatusCode, Json<AcquireResponse>) {
    match peer.acquire().await {
        Ok(()) => (
            StatusCode::OK,
            Json(AcquireResponse {
                acquired: true,
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                MutexError::AlreadyPending => StatusCode::CONFLICT,
                MutexError::AcquisitionTimeout => StatusCode::REQUEST_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!("Acquire via control API failed: {}", e);
            (
                status,
                Json(AcquireResponse {
                    acquired: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_release(
    Extension(peer): Extension<Arc<Peer>>,
) -> (StatusCode, Json<ReleaseResponse>) {
    match peer.release_entry() {
        Ok(()) => (StatusCode::OK, Json(ReleaseResponse { released: true })),
        Err(_) => (
            StatusCode::CONFLICT,
            Json(ReleaseResponse { released: false }),
        ),
    }
}

pub async fn handle_app_state(Extension(peer): Extension<Arc<Peer>>) -> Json<StateSnapshot> {
    Json(peer.query_state())
}
