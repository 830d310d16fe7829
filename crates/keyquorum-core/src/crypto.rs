//! Cryptographic building blocks.
//!
//! X25519 key agreement for share wrapping, ChaCha20-Poly1305 with a detached
//! tag for payloads, and Ed25519 keypairs for requester identities.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};
use crate::types::Identity;

/// Length of a data key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of an AEAD nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Length of a Poly1305 tag in bytes.
pub const TAG_LEN: usize = 16;

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::InvalidKey(format!("x25519 key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &hex::encode(self.0)[..16])
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// Long-lived X25519 secret held by a key server.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(Zeroizing::new(*shared.as_bytes()))
    }
}

/// One-shot key pair used by the sender side of a wrap.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(Zeroizing::new(*shared.as_bytes()))
    }
}

/// Raw X25519 shared secret. Only ever used as KDF input.
pub struct SharedKey(Zeroizing<[u8; 32]>);

impl SharedKey {
    /// Derive a symmetric wrapping key bound to `context`.
    pub fn derive_key(&self, context: &[u8]) -> DataKey {
        let mut hasher = blake3::Hasher::new_derive_key("keyquorum-v1 share-wrap");
        hasher.update(&self.0[..]);
        hasher.update(context);
        DataKey::from_bytes(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit symmetric key. Zeroized on drop, never serialized.
#[derive(Clone)]
pub struct DataKey(Zeroizing<[u8; KEY_LEN]>);

impl DataKey {
    /// Generate a fresh key from the thread CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        // Non-short-circuiting compare.
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for DataKey {}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; NONCE_LEN]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// Encrypt `buffer` in place, returning the detached Poly1305 tag.
pub(crate) fn seal_in_place(
    key: &DataKey,
    nonce: &EncryptionNonce,
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; TAG_LEN]> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CoreError::EncryptionError(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce.0), aad, buffer)
        .map_err(|e| CoreError::EncryptionError(e.to_string()))?;

    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Decrypt `buffer` in place after verifying `tag`.
///
/// Any failure is reported as [`CoreError::IntegrityError`]; the buffer
/// contents are unspecified on error and must be discarded by the caller.
pub(crate) fn open_in_place(
    key: &DataKey,
    nonce: &EncryptionNonce,
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> Result<()> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CoreError::IntegrityError)?;
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(&nonce.0), aad, buffer, Tag::from_slice(tag))
        .map_err(|_| CoreError::IntegrityError)
}

/// Ed25519 keypair of a requester. The public half is the [`Identity`].
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity(self.signing_key.verifying_key().to_bytes())
    }

    pub(crate) fn sign(&self, message: &[u8]) -> ed25519_dalek::Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_agreement_matches_static() {
        let server = X25519StaticSecret::generate();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender = ephemeral.diffie_hellman(&server.public_key());
        let receiver = server.diffie_hellman(&ephemeral_public);

        assert_eq!(
            sender.derive_key(b"ctx").as_bytes(),
            receiver.derive_key(b"ctx").as_bytes()
        );
    }

    #[test]
    fn test_derived_key_depends_on_context() {
        let shared = SharedKey(Zeroizing::new([0x42; 32]));
        assert_ne!(shared.derive_key(b"a"), shared.derive_key(b"b"));
    }

    #[test]
    fn test_seal_open_in_place() {
        let key = DataKey::generate();
        let nonce = EncryptionNonce::generate();
        let mut buf = b"attack at dawn".to_vec();

        let tag = seal_in_place(&key, &nonce, b"aad", &mut buf).unwrap();
        assert_ne!(buf, b"attack at dawn");

        open_in_place(&key, &nonce, b"aad", &mut buf, &tag).unwrap();
        assert_eq!(buf, b"attack at dawn");
    }

    #[test]
    fn test_open_rejects_wrong_aad() {
        let key = DataKey::generate();
        let nonce = EncryptionNonce::generate();
        let mut buf = b"payload".to_vec();
        let tag = seal_in_place(&key, &nonce, b"policy-a", &mut buf).unwrap();

        let err = open_in_place(&key, &nonce, b"policy-b", &mut buf, &tag).unwrap_err();
        assert!(matches!(err, CoreError::IntegrityError));
    }

    #[test]
    fn test_data_key_debug_is_redacted() {
        let key = DataKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", key), "DataKey(..)");
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let a = Keypair::from_seed(&[9u8; 32]);
        let b = Keypair::from_seed(&[9u8; 32]);
        assert_eq!(a.identity(), b.identity());
    }
}
