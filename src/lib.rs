//! Distributed Mutex Library
//!
//! Ricart-Agrawala mutual exclusion between named peers, with a heartbeat
//! failure detector that evicts crashed peers from every quorum. The binary
//! (`main.rs`) wires these modules into a peer process or a registry server.
//!
//! ## Architecture Modules
//! - **`mutex`**: Lamport clock, request priority and the pure state machine.
//! - **`membership`**: peer table and the heartbeat/liveness/discovery loops.
//! - **`directory`**: name registry (trait, in-memory store, HTTP client and server).
//! - **`transport`**: peer RPC traits, HTTP/UDP wire and an in-process transport.
//! - **`peer`**: the running participant and its application control API.
//! - **`config`**: layered configuration.
//! - **`error`**: `MutexError`.

pub mod config;
pub mod directory;
pub mod error;
pub mod membership;
pub mod mutex;
pub mod peer;
pub mod transport;
