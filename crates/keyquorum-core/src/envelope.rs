//! Envelope (hybrid) encryption.
//!
//! The payload is sealed under a random [`DataKey`] with ChaCha20-Poly1305.
//! The data key itself never appears in the envelope: only its threshold
//! shares do, each wrapped to one key server.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use zeroize::Zeroize;

use crate::crypto::{open_in_place, seal_in_place, DataKey, EncryptionNonce, TAG_LEN};
use crate::error::{CoreError, Result};
use crate::threshold::MAX_SHARES;
use crate::types::{EnvelopeId, PolicyId, ServerId};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const AAD_DOMAIN: &[u8] = b"keyquorum-v1 envelope";

/// Output of [`EnvelopeCipher::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub nonce: EncryptionNonce,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// AEAD encryption of payloads under a data key.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCipher;

impl EnvelopeCipher {
    /// Encrypt `plaintext` under a freshly generated nonce.
    pub fn seal(plaintext: &[u8], key: &DataKey, aad: &[u8]) -> Result<SealedPayload> {
        let nonce = EncryptionNonce::generate();
        let mut buffer = plaintext.to_vec();
        let tag = seal_in_place(key, &nonce, aad, &mut buffer)?;
        Ok(SealedPayload {
            nonce,
            ciphertext: buffer,
            tag,
        })
    }

    /// Decrypt and authenticate. Fails closed with [`CoreError::IntegrityError`].
    pub fn open(
        nonce: &EncryptionNonce,
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        key: &DataKey,
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        match open_in_place(key, nonce, aad, &mut buffer, tag) {
            Ok(()) => Ok(buffer),
            Err(e) => {
                buffer.zeroize();
                Err(e)
            }
        }
    }
}

/// One server's wrapped share inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedShareEntry {
    pub server_id: ServerId,
    pub wrapped_share: Bytes,
}

/// A threshold-encrypted payload. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub version: u8,
    pub policy_id: PolicyId,
    pub nonce: EncryptionNonce,
    pub ciphertext: Bytes,
    pub tag: [u8; TAG_LEN],
    pub wrapped_shares: Vec<WrappedShareEntry>,
    pub threshold: u32,
    pub total_shares: u32,
    /// Creation time (Unix milliseconds).
    pub created_at: i64,
}

impl EncryptedEnvelope {
    /// Associated data bound into the payload tag.
    ///
    /// Covers the policy and quorum parameters so an envelope cannot be
    /// relabelled to a different policy without failing authentication.
    pub fn associated_data(policy_id: &PolicyId, threshold: u32, total_shares: u32) -> Vec<u8> {
        let id = policy_id.as_str().as_bytes();
        let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 4 + id.len() + 8);
        aad.extend_from_slice(AAD_DOMAIN);
        aad.extend_from_slice(&(id.len() as u32).to_be_bytes());
        aad.extend_from_slice(id);
        aad.extend_from_slice(&threshold.to_be_bytes());
        aad.extend_from_slice(&total_shares.to_be_bytes());
        aad
    }

    /// Associated data for this envelope.
    pub fn aad(&self) -> Vec<u8> {
        Self::associated_data(&self.policy_id, self.threshold, self.total_shares)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.version != ENVELOPE_VERSION {
            return Err(CoreError::InvalidEnvelope(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.threshold == 0 || self.threshold > self.total_shares {
            return Err(CoreError::InvalidEnvelope(format!(
                "threshold {} out of range for {} shares",
                self.threshold, self.total_shares
            )));
        }
        if self.total_shares as usize > MAX_SHARES {
            return Err(CoreError::InvalidEnvelope(format!(
                "too many shares: {}",
                self.total_shares
            )));
        }
        if self.wrapped_shares.len() != self.total_shares as usize {
            return Err(CoreError::InvalidEnvelope(format!(
                "expected {} wrapped shares, found {}",
                self.total_shares,
                self.wrapped_shares.len()
            )));
        }
        let mut seen = HashSet::new();
        for entry in &self.wrapped_shares {
            if !seen.insert(&entry.server_id) {
                return Err(CoreError::InvalidEnvelope(format!(
                    "duplicate server {}",
                    entry.server_id
                )));
            }
        }
        Ok(())
    }

    /// Decrypt the payload with a reconstructed key.
    pub fn open(&self, key: &DataKey) -> Result<Vec<u8>> {
        EnvelopeCipher::open(&self.nonce, &self.ciphertext, &self.tag, key, &self.aad())
    }

    /// Content address of this envelope (Blake3 of its CBOR encoding).
    pub fn id(&self) -> Result<EnvelopeId> {
        Ok(EnvelopeId::from_bytes(*blake3::hash(&self.to_bytes()?).as_bytes()))
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}
