//! Error types for the service surface.

use keyquorum_core::{CoreError, EnvelopeId};
use keyquorum_net::NetError;
use keyquorum_policy::PolicyError;
use keyquorum_store::StoreError;
use thiserror::Error;

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Policy lifecycle or evaluation error.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Key server or quorum error.
    #[error("quorum error: {0}")]
    Net(NetError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Core(#[from] CoreError),

    #[error("envelope not found: {0}")]
    EnvelopeNotFound(EnvelopeId),
}

impl From<NetError> for ServiceError {
    fn from(err: NetError) -> Self {
        // Lift nested policy and crypto errors to their own variants.
        match err {
            NetError::Policy(e) => ServiceError::Policy(e),
            NetError::Core(e) => ServiceError::Core(e),
            other => ServiceError::Net(other),
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
