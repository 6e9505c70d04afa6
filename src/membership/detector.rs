//! Heartbeat Failure Detector
//!
//! Three loops keep the membership table current:
//! - **Heartbeat send**: every `heartbeat_interval`, a fire-and-forget
//!   heartbeat to every peer with a known address. Send failures are ignored;
//!   only the liveness check evicts.
//! - **Liveness check**: every `liveness_check_interval`, peers silent for
//!   longer than `heartbeat_timeout` on `failure_threshold` consecutive checks
//!   are handed to the `EvictionHandler`.
//! - **Discovery**: every `discovery_interval`, the directory is polled and
//!   addresses are refreshed.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::service::Membership;
use super::types::HeartbeatOutcome;
use crate::config::TimingConfig;
use crate::directory::Directory;
use crate::error::{MutexError, Result};
use crate::mutex::types::PeerName;
use crate::transport::PeerTransport;
use crate::transport::protocol::Heartbeat;

/// Reacts to a peer being declared dead.
pub trait EvictionHandler: Send + Sync {
    fn evict(&self, name: &PeerName);
}

pub struct FailureDetector {
    membership: Arc<Membership>,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn PeerTransport>,
    timing: TimingConfig,
    /// Names to look up on each discovery round; empty means `list()`.
    roster: Vec<PeerName>,
}

impl FailureDetector {
    pub fn new(
        membership: Arc<Membership>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn PeerTransport>,
        timing: TimingConfig,
        roster: Vec<PeerName>,
    ) -> Self {
        Self {
            membership,
            directory,
            transport,
            timing,
            roster,
        }
    }

    /// Spawns the three loops. They stop when `token` is cancelled.
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn EvictionHandler>,
        token: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting failure detector...");

        let heartbeat_handle = {
            let detector = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                detector.heartbeat_loop(token).await;
            })
        };

        let liveness_handle = {
            let detector = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                detector.liveness_loop(handler, token).await;
            })
        };

        let discovery_handle = {
            let detector = self.clone();
            tokio::spawn(async move {
                detector.discovery_loop(token).await;
            })
        };

        vec![heartbeat_handle, liveness_handle, discovery_handle]
    }

    async fn heartbeat_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.timing.heartbeat_interval());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.send_heartbeats().await,
            }
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    async fn liveness_loop(self: Arc<Self>, handler: Arc<dyn EvictionHandler>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.timing.liveness_check_interval());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.check_liveness(handler.as_ref());
                }
            }
        }
        tracing::debug!("Liveness loop stopped");
    }

    async fn discovery_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.timing.discovery_interval());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.discover().await {
                        tracing::warn!("Discovery round failed: {}", e);
                    }
                }
            }
        }
        tracing::debug!("Discovery loop stopped");
    }

    /// One heartbeat to every addressed peer, active or not, so that evicted
    /// peers can learn we are still here.
    pub async fn send_heartbeats(&self) {
        let msg = Heartbeat {
            sender: self.membership.local_name().clone(),
        };

        for (name, address) in self.membership.addresses() {
            if let Err(e) = self.transport.heartbeat(&address, msg.clone()).await {
                tracing::trace!("Heartbeat to {} failed: {}", name, e);
            }
        }
    }

    /// Records a heartbeat. A peer that was inactive or unknown gets its
    /// address re-resolved, since a restarted peer may have moved.
    pub fn receive_heartbeat(&self, sender: &PeerName) -> HeartbeatOutcome {
        if sender == self.membership.local_name() {
            return HeartbeatOutcome::Refreshed;
        }

        let outcome = self.membership.record_heartbeat(sender, Instant::now());

        match outcome {
            HeartbeatOutcome::Refreshed => {
                tracing::trace!("Heartbeat from {}", sender);
            }
            HeartbeatOutcome::Rejoined | HeartbeatOutcome::Discovered => {
                tracing::info!("Peer {} is active", sender);
                self.spawn_address_refresh(sender.clone());
            }
        }

        outcome
    }

    fn spawn_address_refresh(&self, name: PeerName) {
        let directory = self.directory.clone();
        let membership = self.membership.clone();

        tokio::spawn(async move {
            match directory.lookup(&name).await {
                Ok(address) => {
                    membership.upsert_address(&name, address);
                }
                Err(e) => {
                    tracing::debug!("Could not resolve {}: {}", name, e);
                }
            }
        });
    }

    /// One liveness pass; returns the peers handed to `handler`.
    pub fn check_liveness(&self, handler: &dyn EvictionHandler) -> Vec<PeerName> {
        let expired = self.membership.collect_expired(
            Instant::now(),
            self.timing.heartbeat_timeout(),
            self.timing.failure_threshold,
        );

        for name in &expired {
            tracing::warn!(
                "Peer {} missed heartbeats for longer than {:?}",
                name,
                self.timing.heartbeat_timeout()
            );
            handler.evict(name);
        }

        expired
    }

    /// One discovery round against the directory.
    pub async fn discover(&self) -> Result<()> {
        if self.roster.is_empty() {
            let listed = self.directory.list().await?;
            for (name, address) in listed {
                self.membership.upsert_address(&name, address);
            }
            return Ok(());
        }

        for name in &self.roster {
            match self.directory.lookup(name).await {
                Ok(address) => {
                    self.membership.upsert_address(name, address);
                }
                Err(MutexError::PeerNotFound(_)) => {
                    self.membership.clear_address(name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
