use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;

use super::Directory;
use super::protocol::{ENDPOINT_NAMES, ListResponse, LookupResponse, RegisterRequest};
use crate::error::{MutexError, Result};
use crate::membership::types::PeerAddress;
use crate::mutex::types::PeerName;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const ATTEMPTS: usize = 3;

/// Client for the registry served by `directory::handlers`.
pub struct HttpDirectory {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, name: Option<&PeerName>) -> String {
        match name {
            Some(name) => format!("{}{}/{}", self.base_url, ENDPOINT_NAMES, name),
            None => format!("{}{}", self.base_url, ENDPOINT_NAMES),
        }
    }

    /// Sends the request built by `build`, retrying transport errors with
    /// jittered exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 150u64;

        for attempt in 0..ATTEMPTS {
            match build(&self.http_client)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == ATTEMPTS {
                        return Err(MutexError::DirectoryUnavailable(e.to_string()));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(MutexError::DirectoryUnavailable(
            "retry attempts exhausted".to_string(),
        ))
    }
}

fn unexpected(status: StatusCode) -> MutexError {
    MutexError::DirectoryUnavailable(format!("unexpected status {status}"))
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(&self, name: &PeerName, address: PeerAddress) -> Result<()> {
        let url = self.url(Some(name));
        let payload = RegisterRequest { address };
        let response = self
            .send_with_retry(|client| client.put(&url).json(&payload))
            .await?;

        if !response.status().is_success() {
            return Err(unexpected(response.status()));
        }
        Ok(())
    }

    async fn lookup(&self, name: &PeerName) -> Result<PeerAddress> {
        let url = self.url(Some(name));
        let response = self.send_with_retry(|client| client.get(&url)).await?;

        match response.status() {
            StatusCode::OK => {
                let body: LookupResponse = response
                    .json()
                    .await
                    .map_err(|e| MutexError::DirectoryUnavailable(e.to_string()))?;
                Ok(body.address)
            }
            StatusCode::NOT_FOUND => Err(MutexError::PeerNotFound(name.clone())),
            status => Err(unexpected(status)),
        }
    }

    async fn list(&self) -> Result<HashMap<PeerName, PeerAddress>> {
        let url = self.url(None);
        let response = self.send_with_retry(|client| client.get(&url)).await?;

        if !response.status().is_success() {
            return Err(unexpected(response.status()));
        }
        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| MutexError::DirectoryUnavailable(e.to_string()))?;
        Ok(body.peers)
    }

    async fn remove(&self, name: &PeerName) -> Result<()> {
        let url = self.url(Some(name));
        let response = self.send_with_retry(|client| client.delete(&url)).await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(unexpected(response.status()));
        }
        Ok(())
    }
}
