//! Peer configuration.
//!
//! Values come from serde defaults, then an optional TOML file, then
//! `DMUTEX_`-prefixed environment variables (`DMUTEX_TIMING__MAX_HOLD_MS=5000`).
//! Command-line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::MutexError;
use crate::membership::types::PeerAddress;
use crate::mutex::types::PeerName;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Unique name of this peer.
    pub name: String,
    /// HTTP listener for protocol RPCs and application control.
    pub rpc_addr: SocketAddr,
    /// UDP socket for heartbeats.
    pub heartbeat_addr: SocketAddr,
    /// Base URL of the name registry.
    pub directory_url: String,
    /// Fixed roster of peer names. Empty means every name the directory lists.
    pub peers: Vec<String>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub timing: TimingConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "PeerA".to_string(),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            heartbeat_addr: SocketAddr::from(([127, 0, 0, 1], 5500)),
            directory_url: "http://127.0.0.1:9000".to_string(),
            peers: Vec::new(),
            log_level: "info".to_string(),
            timing: TimingConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DMUTEX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn peer_name(&self) -> PeerName {
        PeerName::new(self.name.clone())
    }

    pub fn address(&self) -> PeerAddress {
        PeerAddress {
            rpc_addr: self.rpc_addr,
            heartbeat_addr: self.heartbeat_addr,
        }
    }

    pub fn roster(&self) -> Vec<PeerName> {
        self.peers
            .iter()
            .filter(|name| **name != self.name)
            .map(|name| PeerName::new(name.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), MutexError> {
        if self.name.trim().is_empty() {
            return Err(MutexError::Config("peer name cannot be empty".to_string()));
        }
        if self.rpc_addr == self.heartbeat_addr {
            return Err(MutexError::Config(
                "rpc and heartbeat addresses must differ".to_string(),
            ));
        }
        self.timing.validate()
    }
}

/// Protocol timings. Durations are stored in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub liveness_check_interval_ms: u64,
    /// Consecutive silent liveness checks before a peer is evicted.
    pub failure_threshold: u32,
    pub max_hold_ms: u64,
    pub rpc_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub discovery_interval_ms: u64,
    /// Jitter applied before answering a request immediately.
    pub min_response_delay_ms: u64,
    pub max_response_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            heartbeat_timeout_ms: 20_000,
            liveness_check_interval_ms: 3_000,
            failure_threshold: 1,
            max_hold_ms: 10_000,
            rpc_timeout_ms: 5_000,
            acquire_timeout_ms: 30_000,
            discovery_interval_ms: 3_000,
            min_response_delay_ms: 0,
            max_response_delay_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Uniformly drawn delay before an immediate grant; zero when disabled.
    pub fn response_delay(&self) -> Duration {
        if self.max_response_delay_ms == 0 {
            return Duration::ZERO;
        }
        use rand::Rng;
        let ms = rand::thread_rng()
            .gen_range(self.min_response_delay_ms..=self.max_response_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), MutexError> {
        let periods = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("liveness_check_interval_ms", self.liveness_check_interval_ms),
            ("max_hold_ms", self.max_hold_ms),
            ("rpc_timeout_ms", self.rpc_timeout_ms),
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("discovery_interval_ms", self.discovery_interval_ms),
        ];
        for (key, value) in periods {
            if value == 0 {
                return Err(MutexError::Config(format!("{key} must be greater than 0")));
            }
        }

        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(MutexError::Config(
                "heartbeat_timeout_ms must exceed heartbeat_interval_ms".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(MutexError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.min_response_delay_ms > self.max_response_delay_ms {
            return Err(MutexError::Config(
                "min_response_delay_ms cannot exceed max_response_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
