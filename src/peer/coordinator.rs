//! Request Coordinator
//!
//! Drives the mutex state machine against the rest of the cluster.
//!
//! ## Responsibilities
//! - **Acquire**: snapshot the active peers, fan out `request_entry`, wait for
//!   every reply (or for evictions to shrink the quorum) up to the acquisition
//!   timeout.
//! - **Answer**: grant or defer incoming requests by `(timestamp, name)`
//!   priority, count replies for the current round only.
//! - **Release**: leave the critical section manually or when the auto-release
//!   timer fires, then answer every deferred requester.
//!
//! All mutable protocol state lives in one `MutexCore` behind `core`. That lock
//! is never held across an `.await`, and when the membership table is consulted
//! under it the order is always core first, membership second.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TimingConfig;
use crate::directory::Directory;
use crate::error::{MutexError, Result};
use crate::membership::detector::{EvictionHandler, FailureDetector};
use crate::membership::service::Membership;
use crate::mutex::state::MutexCore;
use crate::mutex::types::{Decision, MutexState, PeerName, ReplyOutcome, RequestKey};
use crate::transport::protocol::{Heartbeat, ReplyEntry, RequestEntry, StateSnapshot};
use crate::transport::{PeerService, PeerTransport};

struct Guarded {
    core: MutexCore,
    /// Timer that ends the current `HELD` period.
    auto_release: Option<AbortHandle>,
}

/// Abandons a `WANTED` round whose `acquire` future is dropped before it
/// settles, e.g. when an HTTP client disconnects or a caller times out.
struct PendingRound<'a> {
    peer: &'a Peer,
    round: u64,
    settled: bool,
}

impl<'a> PendingRound<'a> {
    fn new(peer: &'a Peer, round: u64) -> Self {
        Self {
            peer,
            round,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for PendingRound<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let deferred = self.peer.lock_core().core.abort_request(self.round);
        let Some(deferred) = deferred else {
            return;
        };

        tracing::warn!(
            "[{}] Request cancelled by caller, answering {} deferred requests",
            self.peer.name,
            deferred.len()
        );
        if tokio::runtime::Handle::try_current().is_ok() {
            self.peer.flush_deferred(deferred);
        }
    }
}

pub struct Peer {
    name: PeerName,
    timing: TimingConfig,
    core: Mutex<Guarded>,
    membership: Arc<Membership>,
    detector: Arc<FailureDetector>,
    transport: Arc<dyn PeerTransport>,
    /// Raised whenever the outstanding request may have become grantable.
    granted: Notify,
}

impl Peer {
    pub fn new(
        name: PeerName,
        timing: TimingConfig,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn PeerTransport>,
        roster: Vec<PeerName>,
    ) -> Arc<Self> {
        let membership = Arc::new(Membership::new(name.clone()));
        let detector = Arc::new(FailureDetector::new(
            membership.clone(),
            directory,
            transport.clone(),
            timing.clone(),
            roster,
        ));

        Arc::new(Self {
            core: Mutex::new(Guarded {
                core: MutexCore::new(name.clone()),
                auto_release: None,
            }),
            name,
            timing,
            membership,
            detector,
            transport,
            granted: Notify::new(),
        })
    }

    /// Starts discovery, heartbeat and liveness loops bound to `token`.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let handler: Arc<dyn EvictionHandler> = self.clone();
        self.detector.start(handler, token)
    }

    pub fn name(&self) -> &PeerName {
        &self.name
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn state(&self) -> MutexState {
        self.lock_core().core.state()
    }

    fn lock_core(&self) -> MutexGuard<'_, Guarded> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn set_clock(&self, value: u64) {
        self.lock_core().core.set_clock(value);
    }

    // --- Application API ---

    /// Blocks the caller until the critical section is held (`true`) or the
    /// acquisition timeout elapses (`false`).
    pub async fn request_entry(self: &Arc<Self>) -> bool {
        match self.acquire().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[{}] Request failed: {}", self.name, e);
                false
            }
        }
    }

    /// Like `request_entry`, but reports why acquisition failed.
    pub async fn acquire(self: &Arc<Self>) -> Result<()> {
        let pending = {
            let mut guarded = self.lock_core();
            let active = self.membership.active_peers();
            guarded.core.begin_request(active)?
        };
        let round = pending.round;
        let timestamp = pending.key.timestamp;

        tracing::info!(
            "[{}] Requesting critical section (ts={}, asking {} peers)",
            self.name,
            timestamp,
            pending.required.len()
        );

        let mut pending_round = PendingRound::new(self, round);

        for peer in pending.required {
            self.send_request(peer, timestamp);
        }

        let deadline = Instant::now() + self.timing.acquire_timeout();

        loop {
            let notified = self.granted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guarded = self.lock_core();
                if self.enter_held(&mut guarded, round) {
                    pending_round.settle();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let deferred = {
            let mut guarded = self.lock_core();
            pending_round.settle();
            if self.enter_held(&mut guarded, round) {
                return Ok(());
            }
            guarded.core.abort_request(round)
        };

        tracing::warn!(
            "[{}] Gave up on critical section after {:?} (ts={})",
            self.name,
            self.timing.acquire_timeout(),
            timestamp
        );
        if let Some(deferred) = deferred {
            self.flush_deferred(deferred);
        }
        Err(MutexError::AcquisitionTimeout)
    }

    /// Leaves the critical section and answers every deferred request.
    /// Not holding is reported as `NotHeld` and changes nothing.
    pub fn release_entry(&self) -> Result<()> {
        let deferred = {
            let mut guarded = self.lock_core();
            let deferred = match guarded.core.release() {
                Ok(deferred) => deferred,
                Err(e) => {
                    tracing::warn!("[{}] Release ignored: not in critical section", self.name);
                    return Err(e);
                }
            };
            if let Some(timer) = guarded.auto_release.take() {
                timer.abort();
            }
            deferred
        };

        tracing::info!(
            "[{}] Left critical section, answering {} deferred requests",
            self.name,
            deferred.len()
        );
        self.flush_deferred(deferred);
        Ok(())
    }

    /// Leaves the protocol for good: releases a hold or abandons an outstanding
    /// request, then waits up to `rpc_timeout` for the deferred replies to go
    /// out.
    pub async fn shutdown(&self) {
        let deferred = {
            let mut guarded = self.lock_core();
            match guarded.core.state() {
                MutexState::Held => {
                    if let Some(timer) = guarded.auto_release.take() {
                        timer.abort();
                    }
                    guarded.core.release().unwrap_or_default()
                }
                MutexState::Wanted => {
                    let round = guarded.core.round();
                    guarded.core.abort_request(round).unwrap_or_default()
                }
                MutexState::Released => Vec::new(),
            }
        };

        if deferred.is_empty() {
            return;
        }

        tracing::info!(
            "[{}] Shutting down, answering {} deferred requests",
            self.name,
            deferred.len()
        );
        let deadline = Instant::now() + self.timing.rpc_timeout();
        for reply in self.flush_deferred(deferred) {
            if tokio::time::timeout_at(deadline, reply).await.is_err() {
                tracing::warn!("[{}] Deferred replies still in flight at shutdown", self.name);
                break;
            }
        }
    }

    // --- Internal transitions ---

    /// `WANTED -> HELD` under the core lock, arming the auto-release timer.
    fn enter_held(self: &Arc<Self>, guarded: &mut Guarded, round: u64) -> bool {
        if !guarded.core.enter_held(round) {
            return false;
        }

        let peer = self.clone();
        let max_hold = self.timing.max_hold();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(max_hold).await;
            peer.auto_release(round);
        });
        if let Some(previous) = guarded.auto_release.replace(timer.abort_handle()) {
            previous.abort();
        }

        tracing::info!(
            "[{}] Entered critical section (auto-release in {:?})",
            self.name,
            max_hold
        );
        true
    }

    fn auto_release(&self, round: u64) {
        let deferred = {
            let mut guarded = self.lock_core();
            match guarded.core.release_round(round) {
                Ok(deferred) => {
                    guarded.auto_release = None;
                    deferred
                }
                Err(_) => {
                    tracing::debug!("[{}] Auto-release for round {} is stale", self.name, round);
                    return;
                }
            }
        };

        tracing::info!(
            "[{}] Critical section auto-released after {:?}, answering {} deferred requests",
            self.name,
            self.timing.max_hold(),
            deferred.len()
        );
        self.flush_deferred(deferred);
    }

    // --- Outbound ---

    /// Fire-and-forget `request_entry`. Failure evicts the peer.
    fn send_request(self: &Arc<Self>, to: PeerName, timestamp: u64) {
        let peer = self.clone();
        let msg = RequestEntry {
            timestamp,
            requester: self.name.clone(),
        };

        tokio::spawn(async move {
            let Some(address) = peer.membership.address_of(&to) else {
                tracing::warn!("[{}] No address for {}, evicting", peer.name, to);
                peer.evict(&to);
                return;
            };

            let sent = tokio::time::timeout(
                peer.timing.rpc_timeout(),
                peer.transport.request_entry(&address, msg),
            )
            .await;

            let failure = match sent {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(_) => MutexError::network(&to, "request timed out"),
            };
            tracing::warn!("[{}] Request to {} failed: {}", peer.name, to, failure);
            peer.evict(&to);
        });
    }

    /// Fire-and-forget `reply_entry`, optionally after `delay`.
    fn send_reply(&self, to: PeerName, request_timestamp: u64, delay: Duration) -> JoinHandle<()> {
        let membership = self.membership.clone();
        let transport = self.transport.clone();
        let rpc_timeout = self.timing.rpc_timeout();
        let msg = ReplyEntry {
            responder: self.name.clone(),
            request_timestamp,
        };

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let Some(address) = membership.address_of(&to) else {
                tracing::warn!("Cannot reply to {}: address unknown", to);
                return;
            };

            match tokio::time::timeout(rpc_timeout, transport.reply_entry(&address, msg)).await {
                Ok(Ok(())) => tracing::debug!("Reply sent to {}", to),
                Ok(Err(e)) => tracing::warn!("Reply to {} failed: {}", to, e),
                Err(_) => tracing::warn!("Reply to {} timed out", to),
            }
        })
    }

    fn flush_deferred(&self, deferred: Vec<RequestKey>) -> Vec<JoinHandle<()>> {
        deferred
            .into_iter()
            .map(|key| self.send_reply(key.peer, key.timestamp, Duration::ZERO))
            .collect()
    }

    // --- Inbound ---

    fn on_request_entry(&self, msg: RequestEntry) {
        let key = msg.key();

        let decision = {
            let mut guarded = self.lock_core();
            if !self.membership.is_reachable(&msg.requester) {
                guarded.core.tick(Some(msg.timestamp));
                tracing::debug!(
                    "[{}] Ignoring request from inactive or unresolved peer {}",
                    self.name,
                    msg.requester
                );
                return;
            }
            guarded.core.receive_request(key)
        };

        match decision {
            Decision::GrantNow => {
                tracing::info!(
                    "[{}] Granting {} (ts={})",
                    self.name,
                    msg.requester,
                    msg.timestamp
                );
                self.send_reply(msg.requester, msg.timestamp, self.timing.response_delay());
            }
            Decision::Defer => {
                tracing::info!(
                    "[{}] Deferring {} (ts={})",
                    self.name,
                    msg.requester,
                    msg.timestamp
                );
            }
        }
    }

    fn on_reply_entry(&self, msg: ReplyEntry) {
        let outcome = {
            let mut guarded = self.lock_core();
            guarded
                .core
                .record_reply(&msg.responder, msg.request_timestamp)
        };

        match outcome {
            ReplyOutcome::Stale => {
                tracing::debug!(
                    "[{}] Ignoring stale reply from {} (for ts={})",
                    self.name,
                    msg.responder,
                    msg.request_timestamp
                );
            }
            ReplyOutcome::Partial => {
                tracing::info!("[{}] Reply from {}", self.name, msg.responder);
            }
            ReplyOutcome::Complete => {
                tracing::info!(
                    "[{}] Reply from {}, all required replies received",
                    self.name,
                    msg.responder
                );
                self.granted.notify_waiters();
            }
        }
    }
}

impl EvictionHandler for Peer {
    /// Marks the peer dead and removes it from the outstanding quorum; wakes
    /// the requester if that was the last missing permission.
    fn evict(&self, name: &PeerName) {
        if self.membership.deactivate(name) {
            tracing::warn!("[{}] Evicted {}", self.name, name);
        }

        let grantable = self.lock_core().core.evict(name);
        if grantable {
            tracing::info!(
                "[{}] All remaining live peers have replied after evicting {}",
                self.name,
                name
            );
            self.granted.notify_waiters();
        }
    }
}

impl PeerService for Peer {
    fn request_entry(&self, msg: RequestEntry) {
        self.on_request_entry(msg);
    }

    fn reply_entry(&self, msg: ReplyEntry) {
        self.on_reply_entry(msg);
    }

    fn heartbeat(&self, msg: Heartbeat) {
        self.detector.receive_heartbeat(&msg.sender);
    }

    fn query_state(&self) -> StateSnapshot {
        let core = self.lock_core().core.snapshot();
        StateSnapshot::new(
            self.name.clone(),
            core,
            self.membership.active_peers().into_iter().collect(),
            self.membership.known_peers().into_iter().collect(),
        )
    }
}
