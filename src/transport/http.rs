use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

use super::PeerTransport;
use super::protocol::*;
use crate::error::{MutexError, Result};
use crate::membership::types::PeerAddress;

/// Production transport.
///
/// Heartbeats leave from the same UDP socket the peer listens on, so the
/// receiver sees a stable source address.
pub struct HttpTransport {
    http_client: reqwest::Client,
    socket: Arc<UdpSocket>,
    rpc_timeout: Duration,
}

impl HttpTransport {
    pub fn new(socket: Arc<UdpSocket>, rpc_timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            socket,
            rpc_timeout,
        }
    }

    async fn post<T: Serialize>(&self, to: &PeerAddress, endpoint: &str, payload: &T) -> Result<()> {
        let url = format!("http://{}{}", to.rpc_addr, endpoint);
        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .timeout(self.rpc_timeout)
            .send()
            .await
            .map_err(|e| MutexError::network(to.rpc_addr, e))?;

        if !response.status().is_success() {
            return Err(MutexError::network(
                to.rpc_addr,
                format!("{} returned {}", endpoint, response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn request_entry(&self, to: &PeerAddress, msg: RequestEntry) -> Result<()> {
        self.post(to, ENDPOINT_REQUEST_ENTRY, &msg).await
    }

    async fn reply_entry(&self, to: &PeerAddress, msg: ReplyEntry) -> Result<()> {
        self.post(to, ENDPOINT_REPLY_ENTRY, &msg).await
    }

    async fn heartbeat(&self, to: &PeerAddress, msg: Heartbeat) -> Result<()> {
        let encoded = bincode::serialize(&msg)
            .map_err(|e| MutexError::network(to.heartbeat_addr, e))?;
        self.socket
            .send_to(&encoded, to.heartbeat_addr)
            .await
            .map_err(|e| MutexError::network(to.heartbeat_addr, e))?;
        Ok(())
    }

    async fn query_state(&self, to: &PeerAddress) -> Result<StateSnapshot> {
        let url = format!("http://{}{}", to.rpc_addr, ENDPOINT_STATE);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.rpc_timeout)
            .send()
            .await
            .map_err(|e| MutexError::network(to.rpc_addr, e))?;

        if !response.status().is_success() {
            return Err(MutexError::network(
                to.rpc_addr,
                format!("state query returned {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| MutexError::network(to.rpc_addr, e))
    }
}
