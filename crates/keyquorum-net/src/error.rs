//! Error types for key server access and quorum coordination.

use keyquorum_core::{CoreError, ServerId};
use keyquorum_policy::{DenyReason, PolicyError};
use thiserror::Error;

/// Errors from the registry and coordinator.
#[derive(Debug, Error)]
pub enum NetError {
    /// Policy evaluation refused the requester. No server was contacted.
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    /// Not enough healthy servers with cached keys to encrypt.
    #[error("insufficient key servers: need {required}, have {available}")]
    InsufficientKeyServers { required: usize, available: usize },

    /// A key server did not answer in time or returned an error.
    #[error("key server {server_id} unreachable: {reason}")]
    KeyServerUnreachable { server_id: ServerId, reason: String },

    #[error("unknown key server: {0}")]
    UnknownServer(ServerId),

    /// Fewer than `threshold` valid shares were collected.
    #[error("quorum not reached: {collected}/{threshold} valid shares ({responded} of {total} servers answered)")]
    QuorumTimeout {
        collected: usize,
        threshold: usize,
        responded: usize,
        total: usize,
    },

    /// No `threshold`-subset of the collected shares opened the payload.
    #[error("share reconstruction failed: {0}")]
    ShareReconstructionFailure(String),

    /// The payload failed authentication. Never carries plaintext.
    #[error("integrity check failed")]
    IntegrityError,

    /// Transport-level failure talking to a key server.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("crypto error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for registry and coordinator operations.
pub type Result<T> = std::result::Result<T, NetError>;
