//! Error types for keyquorum core primitives.

use thiserror::Error;

/// Errors raised by the pure cryptographic layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Threshold parameters are out of range.
    #[error("invalid threshold parameters: threshold={threshold}, total={total}")]
    InvalidThreshold { threshold: usize, total: usize },

    /// Shares could not be combined into a key.
    #[error("share reconstruction failed: {0}")]
    ReconstructionFailure(String),

    /// A share byte string is malformed.
    #[error("malformed share: {0}")]
    MalformedShare(String),

    /// AEAD authentication failed. Never carries plaintext.
    #[error("integrity check failed")]
    IntegrityError,

    /// Encryption failed.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// A wrapped share could not be unwrapped.
    #[error("unwrap error: {0}")]
    UnwrapError(String),

    /// Envelope violates a structural invariant.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Capability token signature or structure is invalid.
    #[error("invalid capability token: {0}")]
    InvalidCapability(String),

    /// Identity or key material could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
