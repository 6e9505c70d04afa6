//! Ricart-Agrawala state machine.
//!
//! Pure and synchronous: no I/O, no timers, no locking. The coordinator owns one
//! `MutexCore` behind its core lock and performs every call while holding it.

use super::types::*;
use crate::error::{MutexError, Result};

use std::collections::BTreeSet;

pub struct MutexCore {
    name: PeerName,
    state: MutexState,
    clock: LogicalClock,
    /// Key of the current request, kept from `WANTED` until release.
    own_key: Option<RequestKey>,
    pending: Option<PendingRequest>,
    /// Postponed replies, ordered by priority.
    deferred: BTreeSet<RequestKey>,
    /// Round of the latest request; also tags the `HELD` period it leads to.
    round: u64,
}

impl MutexCore {
    pub fn new(name: PeerName) -> Self {
        Self {
            name,
            state: MutexState::Released,
            clock: LogicalClock::default(),
            own_key: None,
            pending: None,
            deferred: BTreeSet::new(),
            round: 0,
        }
    }

    pub fn name(&self) -> &PeerName {
        &self.name
    }

    pub fn state(&self) -> MutexState {
        self.state
    }

    pub fn clock(&self) -> u64 {
        self.clock.value()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Overrides the clock value. Used to force timestamp collisions in tests.
    #[cfg(test)]
    pub fn set_clock(&mut self, value: u64) {
        self.clock = LogicalClock::new(value);
    }

    pub fn tick(&mut self, received: Option<u64>) -> u64 {
        self.clock.tick(received)
    }

    /// `RELEASED -> WANTED`. Snapshots `active` (minus ourselves) as the
    /// required set of the new round.
    pub fn begin_request(&mut self, active: BTreeSet<PeerName>) -> Result<PendingRequest> {
        if self.state != MutexState::Released {
            return Err(MutexError::AlreadyPending);
        }

        let timestamp = self.clock.tick(None);
        let key = RequestKey::new(timestamp, self.name.clone());
        let mut required = active;
        required.remove(&self.name);

        self.round += 1;
        self.state = MutexState::Wanted;
        self.own_key = Some(key.clone());

        let pending = PendingRequest {
            round: self.round,
            key,
            required,
            received: BTreeSet::new(),
        };
        self.pending = Some(pending.clone());

        Ok(pending)
    }

    /// True iff a request is outstanding and every required peer replied.
    pub fn try_grant(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(PendingRequest::is_satisfied)
    }

    /// True iff `round` is the request currently waiting for replies.
    pub fn is_waiting(&self, round: u64) -> bool {
        self.state == MutexState::Wanted && self.round == round
    }

    /// `WANTED -> HELD` for `round`, provided the grant condition holds.
    pub fn enter_held(&mut self, round: u64) -> bool {
        if !self.is_waiting(round) || !self.try_grant() {
            return false;
        }

        self.state = MutexState::Held;
        self.pending = None;
        true
    }

    /// Abandons the outstanding request of `round` and returns the deferred
    /// requests that must now be answered.
    pub fn abort_request(&mut self, round: u64) -> Option<Vec<RequestKey>> {
        if !self.is_waiting(round) {
            return None;
        }

        self.state = MutexState::Released;
        self.pending = None;
        self.own_key = None;
        Some(self.drain_deferred())
    }

    /// `HELD -> RELEASED`. Returns the deferred requests, in priority order.
    pub fn release(&mut self) -> Result<Vec<RequestKey>> {
        if self.state != MutexState::Held {
            return Err(MutexError::NotHeld);
        }

        self.state = MutexState::Released;
        self.own_key = None;
        Ok(self.drain_deferred())
    }

    /// Releases only if the current `HELD` period belongs to `round`.
    ///
    /// Used by the auto-release timer so that a timer armed for an earlier
    /// hold can never release a later one.
    pub fn release_round(&mut self, round: u64) -> Result<Vec<RequestKey>> {
        if self.round != round {
            return Err(MutexError::NotHeld);
        }
        self.release()
    }

    /// The priority rule: the smaller `(timestamp, name)` wins.
    pub fn decide_incoming_request(&self, other: &RequestKey) -> Decision {
        match self.state {
            MutexState::Released => Decision::GrantNow,
            MutexState::Held => Decision::Defer,
            MutexState::Wanted => match &self.own_key {
                Some(own) if other < own => Decision::GrantNow,
                Some(_) => Decision::Defer,
                None => Decision::GrantNow,
            },
        }
    }

    /// Applies the Lamport update for an incoming request, decides, and queues
    /// it when deferred.
    pub fn receive_request(&mut self, other: RequestKey) -> Decision {
        self.clock.tick(Some(other.timestamp));
        let decision = self.decide_incoming_request(&other);
        if decision == Decision::Defer {
            self.defer(other);
        }
        decision
    }

    /// Queues `key`, dropping any older entry from the same peer.
    fn defer(&mut self, key: RequestKey) {
        self.deferred.retain(|queued| queued.peer != key.peer);
        self.deferred.insert(key);
    }

    /// Counts a reply for the request stamped `request_timestamp`.
    pub fn record_reply(&mut self, from: &PeerName, request_timestamp: u64) -> ReplyOutcome {
        let Some(pending) = self.pending.as_mut() else {
            return ReplyOutcome::Stale;
        };

        if pending.key.timestamp != request_timestamp || !pending.required.contains(from) {
            return ReplyOutcome::Stale;
        }

        pending.received.insert(from.clone());

        if pending.is_satisfied() {
            ReplyOutcome::Complete
        } else {
            ReplyOutcome::Partial
        }
    }

    /// Drops `name` from the required set of the outstanding request.
    ///
    /// Returns true if the grant condition holds after the removal.
    pub fn evict(&mut self, name: &PeerName) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };

        if !pending.required.remove(name) {
            return false;
        }
        pending.received.remove(name);
        pending.is_satisfied()
    }

    fn drain_deferred(&mut self) -> Vec<RequestKey> {
        std::mem::take(&mut self.deferred).into_iter().collect()
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            state: self.state,
            clock: self.clock.value(),
            pending_timestamp: self.own_key.as_ref().map(|key| key.timestamp),
            received_count: self.pending.as_ref().map_or(0, |p| p.received.len()),
            required_count: self.pending.as_ref().map_or(0, |p| p.required.len()),
            deferred_count: self.deferred.len(),
        }
    }
}
