use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use super::Directory;
use crate::error::{MutexError, Result};
use crate::membership::types::PeerAddress;
use crate::mutex::types::PeerName;

#[derive(Default)]
pub struct InMemoryDirectory {
    entries: DashMap<PeerName, PeerAddress>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn register(&self, name: &PeerName, address: PeerAddress) -> Result<()> {
        if let Some(previous) = self.entries.insert(name.clone(), address)
            && previous != address
        {
            tracing::info!("Re-registered {}: {} -> {}", name, previous, address);
        }
        Ok(())
    }

    async fn lookup(&self, name: &PeerName) -> Result<PeerAddress> {
        self.entries
            .get(name)
            .map(|entry| *entry.value())
            .ok_or_else(|| MutexError::PeerNotFound(name.clone()))
    }

    async fn list(&self) -> Result<HashMap<PeerName, PeerAddress>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    async fn remove(&self, name: &PeerName) -> Result<()> {
        self.entries.remove(name);
        Ok(())
    }
}
