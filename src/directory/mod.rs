//! Name Registry
//!
//! Maps peer names to network addresses. Peers `register` themselves on
//! startup, poll with `lookup`/`list` to discover each other, and `remove`
//! themselves on clean shutdown.
//!
//! ## Implementations
//! - **`memory`**: `InMemoryDirectory`, a `DashMap`-backed registry. It is the
//!   state behind the registry server and the directory used in simulations.
//! - **`client`**: `HttpDirectory`, the HTTP client peers use at runtime.
//! - **`handlers`**: axum handlers serving an `InMemoryDirectory` over HTTP.

pub mod client;
pub mod handlers;
pub mod memory;
pub mod protocol;


use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::membership::types::PeerAddress;
use crate::mutex::types::PeerName;

pub use client::HttpDirectory;
pub use memory::InMemoryDirectory;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn register(&self, name: &PeerName, address: PeerAddress) -> Result<()>;

    /// Fails with `PeerNotFound` when the name is not registered.
    async fn lookup(&self, name: &PeerName) -> Result<PeerAddress>;

    async fn list(&self) -> Result<HashMap<PeerName, PeerAddress>>;

    async fn remove(&self, name: &PeerName) -> Result<()>;
}
