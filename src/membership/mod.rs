//! Membership & Failure Detection Module
//!
//! Tracks which peers exist, where they live and whether they are alive.
//!
//! ## Core Mechanisms
//! - **Membership table**: name -> {address, last heartbeat, active flag},
//!   populated by directory discovery and refreshed by heartbeats.
//! - **Heartbeats**: every peer periodically tells every other peer it is alive.
//! - **Eviction**: a peer silent past the heartbeat timeout is marked inactive
//!   and dropped from the quorum of any outstanding request. This trades strict
//!   exclusion for availability: if the silence was a partition rather than a
//!   crash, two peers can hold the critical section at once.

pub mod detector;
pub mod service;
pub mod types;
