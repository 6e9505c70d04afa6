use thiserror::Error;

use crate::mutex::types::PeerName;

/// Errors surfaced by the mutex protocol, the transport and the directory.
#[derive(Error, Debug)]
pub enum MutexError {
    /// `RequestEntry` called while a request is pending or the section is held.
    #[error("a request is already pending or the critical section is held")]
    AlreadyPending,

    /// `ReleaseEntry` called while not holding the critical section.
    #[error("the critical section is not held")]
    NotHeld,

    /// Not every required peer replied before the acquisition deadline.
    #[error("timed out waiting for permission to enter the critical section")]
    AcquisitionTimeout,

    /// An outbound RPC failed or timed out.
    #[error("network failure talking to {peer}: {reason}")]
    NetworkFailure { peer: String, reason: String },

    /// The directory has no entry for this name.
    #[error("peer not found in directory: {0}")]
    PeerNotFound(PeerName),

    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MutexError {
    pub fn network(peer: impl ToString, reason: impl ToString) -> Self {
        MutexError::NetworkFailure {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MutexError>;
