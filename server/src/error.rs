//! Error types shared across the server crate.

use std::time::Duration;

/// Failures of the server's entry points and client factories.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or broken connections
    #[error("Network error: {0}")]
    Network(String),

    /// The hub is gone or refused the request
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("store error: {0}")]
    Internal(String),
}

/// Failures reading or writing framed packets.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("connection closed")]
    Closed,
}

/// Reasons a client-claimed consumption is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("spore with ID {0} does not exist")]
    SporeMissing(u64),

    #[error("player with ID {0} does not exist")]
    PlayerMissing(u64),

    #[error("player is too far from the object (distSq: {dist_sq}, thresholdSq: {threshold_sq})")]
    TooFar { dist_sq: f64, threshold_sq: f64 },

    #[error("player dropped the spore too recently (time: {elapsed:?}, min acceptable time: {min:?})")]
    DroppedTooRecently { elapsed: Duration, min: Duration },

    #[error("player not massive enough to consume the other player (our mass: {ours}, other mass: {other})")]
    NotMassiveEnough { ours: f64, other: f64 },
}
