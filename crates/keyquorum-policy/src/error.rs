//! Error types for policy operations.

use keyquorum_core::{PolicyId, PolicyState};
use keyquorum_store::StoreError;
use thiserror::Error;

/// Errors from the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Parameters do not satisfy the schema of the policy kind.
    #[error("invalid policy parameters: {0}")]
    Validation(String),

    #[error("policy not found: {0}")]
    NotFound(PolicyId),

    /// A policy with this id already exists.
    #[error("policy already exists: {0}")]
    AlreadyExists(PolicyId),

    #[error("invalid state transition for {policy_id}: {from} -> {to}")]
    InvalidStateTransition {
        policy_id: PolicyId,
        from: PolicyState,
        to: PolicyState,
    },

    /// The policy was revoked. Terminal.
    #[error("policy revoked: {0}")]
    Revoked(PolicyId),

    /// The policy exists but has not been activated.
    #[error("policy not active: {0}")]
    NotActive(PolicyId),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
