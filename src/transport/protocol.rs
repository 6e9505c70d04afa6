//! Peer RPC Protocol
//!
//! Endpoints and payloads of the four peer RPCs. `request_entry`,
//! `reply_entry` and `query_state` travel as JSON over HTTP; `heartbeat` is a
//! bincode-encoded UDP datagram.

use serde::{Deserialize, Serialize};

use crate::mutex::types::{CoreSnapshot, MutexState, PeerName, RequestKey};

/// Oneway: ask for permission to enter the critical section.
pub const ENDPOINT_REQUEST_ENTRY: &str = "/rpc/request_entry";
/// Oneway: grant a previously received request.
pub const ENDPOINT_REPLY_ENTRY: &str = "/rpc/reply_entry";
/// Returns the peer's `StateSnapshot`.
pub const ENDPOINT_STATE: &str = "/rpc/state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub timestamp: u64,
    pub requester: PeerName,
}

impl RequestEntry {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.timestamp, self.requester.clone())
    }
}

/// Permission for the request stamped `request_timestamp`.
///
/// The requester drops replies whose timestamp does not match its outstanding
/// request, which makes late replies for abandoned rounds harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEntry {
    pub responder: PeerName,
    pub request_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sender: PeerName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub name: PeerName,
    pub state: MutexState,
    pub clock: u64,
    pub pending_timestamp: Option<u64>,
    pub received_count: usize,
    pub required_count: usize,
    pub deferred_count: usize,
    pub active_peers: Vec<PeerName>,
    pub known_peers: Vec<PeerName>,
}

impl StateSnapshot {
    pub fn new(
        name: PeerName,
        core: CoreSnapshot,
        active_peers: Vec<PeerName>,
        known_peers: Vec<PeerName>,
    ) -> Self {
        Self {
            name,
            state: core.state,
            clock: core.clock,
            pending_timestamp: core.pending_timestamp,
            received_count: core.received_count,
            required_count: core.required_count,
            deferred_count: core.deferred_count,
            active_peers,
            known_peers,
        }
    }
}
