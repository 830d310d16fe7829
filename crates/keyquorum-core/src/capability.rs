//! Capability tokens: signed statements of requester identity.
//!
//! A token says "the holder of this Ed25519 key asks to use this policy until
//! `expires_at`". Both the local policy pre-check and every key server verify
//! it independently.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::crypto::Keypair;
use crate::error::{CoreError, Result};
use crate::types::{Identity, PolicyId};

const SIGN_DOMAIN: &[u8] = b"keyquorum-v1 capability";

/// Signed proof presented by a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub identity: Identity,
    pub policy_id: PolicyId,
    /// Unix milliseconds.
    pub issued_at: i64,
    /// Unix milliseconds, exclusive.
    pub expires_at: i64,
    pub signature: Signature,
}

impl CapabilityToken {
    /// Issue a token for `policy_id` valid for `ttl_ms` from `now`.
    pub fn issue(keypair: &Keypair, policy_id: &PolicyId, now: i64, ttl_ms: i64) -> Self {
        let identity = keypair.identity();
        let expires_at = now.saturating_add(ttl_ms);
        let message = signing_message(&identity, policy_id, now, expires_at);
        Self {
            identity,
            policy_id: policy_id.clone(),
            issued_at: now,
            expires_at,
            signature: keypair.sign(&message),
        }
    }

    /// Verify signature, subject, scope and validity window.
    pub fn verify(&self, requester: &Identity, policy_id: &PolicyId, now: i64) -> Result<()> {
        if &self.identity != requester {
            return Err(CoreError::InvalidCapability(
                "token identity does not match requester".into(),
            ));
        }
        if &self.policy_id != policy_id {
            return Err(CoreError::InvalidCapability(
                "token issued for a different policy".into(),
            ));
        }
        if now < self.issued_at || now >= self.expires_at {
            return Err(CoreError::InvalidCapability("token expired".into()));
        }

        let key = VerifyingKey::from_bytes(self.identity.as_bytes())
            .map_err(|_| CoreError::InvalidCapability("identity is not a valid key".into()))?;
        let message = signing_message(&self.identity, &self.policy_id, self.issued_at, self.expires_at);
        key.verify(&message, &self.signature)
            .map_err(|_| CoreError::InvalidCapability("bad signature".into()))
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

fn signing_message(identity: &Identity, policy_id: &PolicyId, issued_at: i64, expires_at: i64) -> Vec<u8> {
    let policy = policy_id.as_str().as_bytes();
    let mut msg = Vec::with_capacity(SIGN_DOMAIN.len() + 32 + 4 + policy.len() + 16);
    msg.extend_from_slice(SIGN_DOMAIN);
    msg.extend_from_slice(identity.as_bytes());
    msg.extend_from_slice(&(policy.len() as u32).to_be_bytes());
    msg.extend_from_slice(policy);
    msg.extend_from_slice(&issued_at.to_be_bytes());
    msg.extend_from_slice(&expires_at.to_be_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let kp = Keypair::generate();
        let policy = PolicyId::from("p1");
        let token = CapabilityToken::issue(&kp, &policy, 1_000, 60_000);
        token.verify(&kp.identity(), &policy, 2_000).unwrap();
    }

    #[test]
    fn test_wrong_requester_rejected() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let policy = PolicyId::from("p1");
        let token = CapabilityToken::issue(&kp, &policy, 0, 60_000);
        assert!(token.verify(&other.identity(), &policy, 10).is_err());
    }

    #[test]
    fn test_expired_rejected() {
        let kp = Keypair::generate();
        let policy = PolicyId::from("p1");
        let token = CapabilityToken::issue(&kp, &policy, 0, 100);
        assert!(token.verify(&kp.identity(), &policy, 99).is_ok());
        assert!(token.verify(&kp.identity(), &policy, 100).is_err());
    }

    #[test]
    fn test_forged_identity_rejected() {
        // Swapping in someone else's identity breaks the signature.
        let kp = Keypair::generate();
        let victim = Keypair::generate();
        let policy = PolicyId::from("p1");
        let mut token = CapabilityToken::issue(&kp, &policy, 0, 1_000);
        token.identity = victim.identity();
        assert!(token.verify(&victim.identity(), &policy, 1).is_err());
    }

    #[test]
    fn test_other_policy_rejected() {
        let kp = Keypair::generate();
        let token = CapabilityToken::issue(&kp, &PolicyId::from("p1"), 0, 1_000);
        assert!(token.verify(&kp.identity(), &PolicyId::from("p2"), 1).is_err());
    }

    #[test]
    fn test_cbor_roundtrip() {
        let kp = Keypair::generate();
        let token = CapabilityToken::issue(&kp, &PolicyId::from("p1"), 0, 1_000);
        let recovered = CapabilityToken::from_bytes(&token.to_bytes().unwrap()).unwrap();
        assert_eq!(token, recovered);
    }
}
