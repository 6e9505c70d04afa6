use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Globally unique peer name.
///
/// Names are totally ordered lexicographically; the order breaks ties between
/// requests carrying the same logical timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerName(pub String);

impl PeerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for PeerName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Lamport clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock(u64);

impl LogicalClock {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Advances the clock and returns the new value.
    ///
    /// With a received timestamp the clock becomes `max(local, received) + 1`,
    /// otherwise it is incremented by one.
    pub fn tick(&mut self, received: Option<u64>) -> u64 {
        self.0 = match received {
            Some(ts) => self.0.max(ts).saturating_add(1),
            None => self.0.saturating_add(1),
        };
        self.0
    }
}

/// Priority of a request: timestamp first, then peer name.
///
/// Field order matters, the derived `Ord` compares `timestamp` before `peer`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub timestamp: u64,
    pub peer: PeerName,
}

impl RequestKey {
    pub fn new(timestamp: u64, peer: impl Into<PeerName>) -> Self {
        Self {
            timestamp,
            peer: peer.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutexState {
    Released,
    Wanted,
    Held,
}

impl fmt::Display for MutexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MutexState::Released => "RELEASED",
            MutexState::Wanted => "WANTED",
            MutexState::Held => "HELD",
        };
        f.write_str(label)
    }
}

/// Outcome of comparing an incoming request against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    GrantNow,
    Defer,
}

/// Bookkeeping for an outstanding request. Exists only while `WANTED`.
///
/// `received` is always a subset of `required`; `required` only shrinks.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub round: u64,
    pub key: RequestKey,
    pub required: BTreeSet<PeerName>,
    pub received: BTreeSet<PeerName>,
}

impl PendingRequest {
    pub fn is_satisfied(&self) -> bool {
        self.received.is_superset(&self.required)
    }
}

/// Result of feeding a reply into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// No request outstanding, wrong round, or responder not required.
    Stale,
    /// Counted, more replies are still missing.
    Partial,
    /// Counted, every required peer has now replied.
    Complete,
}

/// Read-only view of the core used by `query_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub state: MutexState,
    pub clock: u64,
    pub pending_timestamp: Option<u64>,
    pub received_count: usize,
    pub required_count: usize,
    pub deferred_count: usize,
}
