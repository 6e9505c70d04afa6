//! Mutual Exclusion Core
//!
//! The Ricart-Agrawala permission protocol reduced to its state: the
//! `RELEASED / WANTED / HELD` machine, the Lamport clock, the outstanding
//! request and the queue of postponed replies.
//!
//! ## Priority Rule
//! Requests are ordered by `RequestKey = (timestamp, peer name)`. A peer that is
//! `WANTED` grants an incoming request immediately only if the incoming key is
//! strictly smaller than its own; otherwise the reply is deferred until release.

pub mod state;
pub mod types;
