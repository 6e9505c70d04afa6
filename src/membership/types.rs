use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;

use crate::mutex::types::PeerName;

/// Where a peer can be reached.
///
/// Protocol RPCs (`request_entry`, `reply_entry`, `query_state`) go over HTTP to
/// `rpc_addr`; heartbeats are UDP datagrams sent to `heartbeat_addr`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub rpc_addr: SocketAddr,
    pub heartbeat_addr: SocketAddr,
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc={} hb={}", self.rpc_addr, self.heartbeat_addr)
    }
}

/// A row of the membership table.
///
/// `address` is `None` while a peer is known only from its heartbeats and the
/// directory has not resolved it yet. `missed_checks` counts consecutive
/// liveness checks that found the peer silent.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub name: PeerName,
    pub address: Option<PeerAddress>,
    pub last_heartbeat: Option<Instant>,
    pub active: bool,
    pub missed_checks: u32,
}

impl PeerEntry {
    pub fn discovered(name: PeerName, address: PeerAddress) -> Self {
        Self {
            name,
            address: Some(address),
            last_heartbeat: None,
            active: false,
            missed_checks: 0,
        }
    }
}

/// What a received heartbeat did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Already active, timestamp refreshed.
    Refreshed,
    /// Known but inactive (evicted or never heard from), now active again.
    Rejoined,
    /// Never seen before, added without an address.
    Discovered,
}
