//! In-process transport.
//!
//! Routes calls straight into the target's `PeerService`, keyed by RPC
//! address. Used to run whole clusters inside one runtime: `detach` simulates
//! a crash (calls fail as network errors), `hold`/`deliver_held` freeze and
//! replay oneway traffic to force specific interleavings.

use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::*;
use super::{PeerService, PeerTransport};
use crate::error::{MutexError, Result};
use crate::membership::types::PeerAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestEntry(RequestEntry),
    ReplyEntry(ReplyEntry),
    Heartbeat(Heartbeat),
}

#[derive(Default)]
pub struct LocalTransport {
    endpoints: DashMap<SocketAddr, Arc<dyn PeerService>>,
    /// `Some` while delivery is on hold.
    held: Mutex<Option<Vec<(SocketAddr, Message)>>>,
    sent: Mutex<Vec<(SocketAddr, Message)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, address: &PeerAddress, service: Arc<dyn PeerService>) {
        self.endpoints.insert(address.rpc_addr, service);
    }

    /// Makes the peer unreachable, as if its process had died.
    pub fn detach(&self, address: &PeerAddress) {
        self.endpoints.remove(&address.rpc_addr);
    }

    /// Queues oneway messages instead of delivering them.
    pub fn hold(&self) {
        let mut held = lock(&self.held);
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Resumes normal delivery and delivers everything queued, in order.
    /// Returns the number of messages delivered.
    pub fn deliver_held(&self) -> usize {
        let queued = lock(&self.held).take().unwrap_or_default();
        let mut delivered = 0;
        for (to, msg) in queued {
            if let Some(service) = self.service(&to) {
                dispatch(service.as_ref(), msg);
                delivered += 1;
            }
        }
        delivered
    }

    /// Every oneway message accepted so far, with its destination.
    pub fn sent(&self) -> Vec<(SocketAddr, Message)> {
        lock(&self.sent).clone()
    }

    fn service(&self, to: &SocketAddr) -> Option<Arc<dyn PeerService>> {
        self.endpoints.get(to).map(|entry| entry.value().clone())
    }

    fn send(&self, to: &PeerAddress, msg: Message) -> Result<()> {
        let Some(service) = self.service(&to.rpc_addr) else {
            return Err(MutexError::network(to.rpc_addr, "connection refused"));
        };

        lock(&self.sent).push((to.rpc_addr, msg.clone()));

        {
            let mut held = lock(&self.held);
            if let Some(queue) = held.as_mut() {
                queue.push((to.rpc_addr, msg));
                return Ok(());
            }
        }

        dispatch(service.as_ref(), msg);
        Ok(())
    }
}

fn dispatch(service: &dyn PeerService, msg: Message) {
    match msg {
        Message::RequestEntry(msg) => service.request_entry(msg),
        Message::ReplyEntry(msg) => service.reply_entry(msg),
        Message::Heartbeat(msg) => service.heartbeat(msg),
    }
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn request_entry(&self, to: &PeerAddress, msg: RequestEntry) -> Result<()> {
        self.send(to, Message::RequestEntry(msg))
    }

    async fn reply_entry(&self, to: &PeerAddress, msg: ReplyEntry) -> Result<()> {
        self.send(to, Message::ReplyEntry(msg))
    }

    async fn heartbeat(&self, to: &PeerAddress, msg: Heartbeat) -> Result<()> {
        self.send(to, Message::Heartbeat(msg))
    }

    async fn query_state(&self, to: &PeerAddress) -> Result<StateSnapshot> {
        self.service(&to.rpc_addr)
            .map(|service| service.query_state())
            .ok_or_else(|| MutexError::network(to.rpc_addr, "connection refused"))
    }
}
