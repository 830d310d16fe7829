//! # keyquorum core
//!
//! Pure primitives for threshold envelope encryption. This crate contains no
//! I/O, no storage and no networking.
//!
//! ## Key Types
//!
//! - [`ThresholdCodec`] - Shamir secret sharing of 256-bit data keys over GF(2^8)
//! - [`EnvelopeCipher`] - ChaCha20-Poly1305 sealing with a detached tag
//! - [`EncryptedEnvelope`] - ciphertext plus one wrapped share per key server
//! - [`wrap_share`] / [`unwrap_share`] - X25519 wrapping of shares to servers
//! - [`CapabilityToken`] - signed requester statement checked before release
//! - [`AccessPolicy`] - policy record with its validated [`PolicyRule`]
//!
//! ## Encryption Model
//!
//! ```text
//! plaintext --seal(DataKey)--> ciphertext + tag
//! DataKey --split(T, N)--> share_1 .. share_N
//! share_i --wrap(server_i public key)--> wrapped_share_i
//! ```
//!
//! Any `T` unwrapped shares reconstruct the data key; fewer reveal nothing
//! about it.

pub mod capability;
pub mod clock;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod gf256;
pub mod policy;
pub mod threshold;
pub mod types;
pub mod wrap;

pub use capability::CapabilityToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{
    DataKey, EncryptionNonce, Keypair, X25519PublicKey, X25519StaticSecret, KEY_LEN, NONCE_LEN,
    TAG_LEN,
};
pub use envelope::{
    EncryptedEnvelope, EnvelopeCipher, SealedPayload, WrappedShareEntry, ENVELOPE_VERSION,
};
pub use error::{CoreError, Result};
pub use policy::{AccessPolicy, PolicyKind, PolicyRule, PolicyState};
pub use threshold::{Share, ThresholdCodec, MAX_SHARES, SHARE_LEN};
pub use types::{EnvelopeId, Identity, PolicyId, ServerId};
pub use wrap::{unwrap_share, wrap_share};
