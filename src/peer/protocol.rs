//! Application control API.

use serde::{Deserialize, Serialize};

/// `POST`: block until the critical section is held or acquisition fails.
pub const ENDPOINT_ACQUIRE: &str = "/app/acquire";
/// `POST`: leave the critical section.
pub const ENDPOINT_RELEASE: &str = "/app/release";
/// `GET`: the peer's `StateSnapshot`.
pub const ENDPOINT_APP_STATE: &str = "/app/state";

#[derive(Debug, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub acquired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: bool,
}
