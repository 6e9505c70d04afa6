//! Registry HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::membership::types::PeerAddress;
use crate::mutex::types::PeerName;

/// `PUT` registers, `GET` looks up and `DELETE` removes `{ENDPOINT_NAMES}/:name`.
pub const ENDPOINT_NAMES: &str = "/names";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub address: PeerAddress,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupResponse {
    pub name: PeerName,
    pub address: PeerAddress,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListResponse {
    pub peers: HashMap<PeerName, PeerAddress>,
}
