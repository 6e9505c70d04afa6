//! Peer Runtime
//!
//! Ties the mutex state machine, the membership table and the transport into
//! one running participant.
//!
//! ## Components
//! - **`coordinator`**: `Peer`, the RequestEntry/ReleaseEntry API and the
//!   inbound handlers for every peer RPC.
//! - **`handlers`**: HTTP control surface for local applications
//!   (`/app/acquire`, `/app/release`, `/app/state`), merged with the peer RPC
//!   routes into one router.
//! - **`protocol`**: payloads of the control surface.
//!
//! ## Fault Model
//! A peer that stops answering is evicted and no longer counted toward any
//! quorum. An evicted peer that is only slow or partitioned may still believe
//! it holds the critical section, so safety holds only for crash failures that
//! the detector reports after the crash.

pub mod coordinator;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use coordinator::Peer;
