//! Peer RPC Boundary
//!
//! Two traits split the wire from the protocol:
//! - **`PeerService`**: the four inbound RPCs a peer answers. The coordinator
//!   implements it; servers dispatch to it by method name.
//! - **`PeerTransport`**: the outbound side, used to call those RPCs on other
//!   peers.
//!
//! ## Implementations
//! - **`http`**: JSON over HTTP for `request_entry`, `reply_entry` and
//!   `query_state`, bincode over UDP for `heartbeat`.
//! - **`handlers`**: the axum routes and the UDP receive loop feeding a
//!   `PeerService`.
//! - **`local`**: in-process delivery between peers of one simulation, with
//!   crash and delivery-hold controls.

pub mod handlers;
pub mod http;
pub mod local;
pub mod protocol;


use async_trait::async_trait;

use crate::error::Result;
use crate::membership::types::PeerAddress;
use protocol::{Heartbeat, ReplyEntry, RequestEntry, StateSnapshot};

pub use http::HttpTransport;
pub use local::LocalTransport;

/// Inbound RPC surface of a peer.
///
/// The three oneway methods return immediately; any follow-up network work is
/// spawned. They must never block on the peer's own outstanding request.
pub trait PeerService: Send + Sync {
    fn request_entry(&self, msg: RequestEntry);

    fn reply_entry(&self, msg: ReplyEntry);

    fn heartbeat(&self, msg: Heartbeat);

    fn query_state(&self) -> StateSnapshot;
}

/// Outbound calls to a remote `PeerService`.
///
/// An `Err` means the call did not reach the peer (refused, timed out, or
/// rejected); callers decide whether that warrants eviction.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn request_entry(&self, to: &PeerAddress, msg: RequestEntry) -> Result<()>;

    async fn reply_entry(&self, to: &PeerAddress, msg: ReplyEntry) -> Result<()>;

    async fn heartbeat(&self, to: &PeerAddress, msg: Heartbeat) -> Result<()>;

    async fn query_state(&self, to: &PeerAddress) -> Result<StateSnapshot>;
}
