use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{HeartbeatOutcome, PeerAddress, PeerEntry};
use crate::mutex::types::PeerName;

/// Table of known peers and their liveness.
///
/// Independent of the mutex state. Callers that also hold the coordinator's
/// core lock must take it before touching this table.
pub struct Membership {
    local: PeerName,
    members: DashMap<PeerName, PeerEntry>,
}

impl Membership {
    pub fn new(local: PeerName) -> Self {
        Self {
            local,
            members: DashMap::new(),
        }
    }

    pub fn local_name(&self) -> &PeerName {
        &self.local
    }

    /// Records an address learned from the directory.
    ///
    /// Returns true if the peer was not known before. The local peer is never
    /// added to its own table.
    pub fn upsert_address(&self, name: &PeerName, address: PeerAddress) -> bool {
        if name == &self.local {
            return false;
        }

        match self.members.get_mut(name) {
            Some(mut existing) => {
                if existing.address != Some(address) {
                    tracing::info!("Peer {} address updated: {}", name, address);
                    existing.address = Some(address);
                }
                false
            }
            None => {
                tracing::info!("Discovered peer {} at {}", name, address);
                self.members
                    .insert(name.clone(), PeerEntry::discovered(name.clone(), address));
                true
            }
        }
    }

    /// Forgets the address of a peer that left the directory.
    pub fn clear_address(&self, name: &PeerName) {
        if let Some(mut entry) = self.members.get_mut(name)
            && entry.address.take().is_some()
        {
            tracing::info!("Peer {} no longer registered", name);
        }
    }

    pub fn record_heartbeat(&self, sender: &PeerName, now: Instant) -> HeartbeatOutcome {
        match self.members.get_mut(sender) {
            Some(mut entry) => {
                entry.last_heartbeat = Some(now);
                entry.missed_checks = 0;
                if entry.active {
                    HeartbeatOutcome::Refreshed
                } else {
                    entry.active = true;
                    HeartbeatOutcome::Rejoined
                }
            }
            None => {
                self.members.insert(
                    sender.clone(),
                    PeerEntry {
                        name: sender.clone(),
                        address: None,
                        last_heartbeat: Some(now),
                        active: true,
                        missed_checks: 0,
                    },
                );
                HeartbeatOutcome::Discovered
            }
        }
    }

    /// Marks a peer inactive. Returns true if it was active.
    pub fn deactivate(&self, name: &PeerName) -> bool {
        match self.members.get_mut(name) {
            Some(mut entry) if entry.active => {
                entry.active = false;
                entry.missed_checks = 0;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, name: &PeerName) -> bool {
        self.members
            .get(name)
            .is_some_and(|entry| entry.active)
    }

    /// Active with a known address: a peer we can both hear and answer.
    pub fn is_reachable(&self, name: &PeerName) -> bool {
        self.members
            .get(name)
            .is_some_and(|entry| entry.active && entry.address.is_some())
    }

    /// Peers a new request must ask: active and reachable.
    pub fn active_peers(&self) -> BTreeSet<PeerName> {
        self.members
            .iter()
            .filter(|entry| entry.active && entry.address.is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn known_peers(&self) -> BTreeSet<PeerName> {
        self.members
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn address_of(&self, name: &PeerName) -> Option<PeerAddress> {
        self.members.get(name).and_then(|entry| entry.address)
    }

    /// Every peer with a known address, active or not.
    pub fn addresses(&self) -> Vec<(PeerName, PeerAddress)> {
        self.members
            .iter()
            .filter_map(|entry| entry.address.map(|addr| (entry.key().clone(), addr)))
            .collect()
    }

    pub fn get(&self, name: &PeerName) -> Option<PeerEntry> {
        self.members.get(name).map(|entry| entry.value().clone())
    }

    /// One liveness check pass.
    ///
    /// Every active peer silent for longer than `timeout` accrues a miss; the
    /// peers whose misses reach `threshold` are returned for eviction. Peers
    /// never heard from are measured from the first check that sees them.
    pub fn collect_expired(&self, now: Instant, timeout: Duration, threshold: u32) -> Vec<PeerName> {
        let mut expired = Vec::new();

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            if !member.active {
                continue;
            }

            let Some(last_heartbeat) = member.last_heartbeat else {
                member.last_heartbeat = Some(now);
                continue;
            };

            let elapsed = now.duration_since(last_heartbeat);
            if elapsed <= timeout {
                continue;
            }

            member.missed_checks += 1;
            tracing::debug!(
                "Peer {} silent for {:?} ({} missed checks)",
                member.name,
                elapsed,
                member.missed_checks
            );

            if member.missed_checks >= threshold {
                expired.push(member.name.clone());
            }
        }

        expired
    }
}
