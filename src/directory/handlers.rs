use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use super::Directory;
use super::memory::InMemoryDirectory;
use super::protocol::{ENDPOINT_NAMES, ListResponse, LookupResponse, RegisterRequest};
use crate::mutex::types::PeerName;

/// Registry server routes.
pub fn router(directory: Arc<InMemoryDirectory>) -> Router {
    Router::new()
        .route(ENDPOINT_NAMES, get(handle_list))
        .route(
            &format!("{ENDPOINT_NAMES}/:name"),
            get(handle_lookup).put(handle_register).delete(handle_remove),
        )
        .layer(Extension(directory))
}

pub async fn handle_register(
    Extension(directory): Extension<Arc<InMemoryDirectory>>,
    Path(name): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> StatusCode {
    let name = PeerName::new(name);
    match directory.register(&name, req.address).await {
        Ok(()) => {
            tracing::info!("Registered {} at {}", name, req.address);
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Failed to register {}: {}", name, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_lookup(
    Extension(directory): Extension<Arc<InMemoryDirectory>>,
    Path(name): Path<String>,
) -> Result<Json<LookupResponse>, StatusCode> {
    let name = PeerName::new(name);
    match directory.lookup(&name).await {
        Ok(address) => Ok(Json(LookupResponse { name, address })),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn handle_list(
    Extension(directory): Extension<Arc<InMemoryDirectory>>,
) -> (StatusCode, Json<ListResponse>) {
    match directory.list().await {
        Ok(peers) => (StatusCode::OK, Json(ListResponse { peers })),
        Err(e) => {
            tracing::error!("Failed to list registry: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ListResponse::default()),
            )
        }
    }
}

pub async fn handle_remove(
    Extension(directory): Extension<Arc<InMemoryDirectory>>,
    Path(name): Path<String>,
) -> StatusCode {
    let name = PeerName::new(name);
    match directory.remove(&name).await {
        Ok(()) => {
            tracing::info!("Removed {} from registry", name);
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Failed to remove {}: {}", name, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
