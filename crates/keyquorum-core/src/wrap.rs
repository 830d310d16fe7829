//! Wrapping key shares to individual key servers.
//!
//! A share is encrypted to a server's X25519 public key using an ephemeral
//! key agreement. The derived wrapping key and the AEAD associated data both
//! bind the policy id and server id, so a wrapped share is useless to any
//! other server or under any other policy.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{
    open_in_place, seal_in_place, EncryptionNonce, EphemeralKeyPair, X25519PublicKey,
    X25519StaticSecret, TAG_LEN,
};
use crate::error::{CoreError, Result};
use crate::threshold::Share;
use crate::types::{PolicyId, ServerId};

/// On-the-wire form of a wrapped share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WrappedSharePayload {
    ephemeral_public: X25519PublicKey,
    nonce: EncryptionNonce,
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
}

fn binding_context(policy_id: &PolicyId, server_id: &ServerId) -> Vec<u8> {
    let policy = policy_id.as_str().as_bytes();
    let server = server_id.as_str().as_bytes();
    let mut ctx = Vec::with_capacity(8 + policy.len() + server.len());
    ctx.extend_from_slice(&(policy.len() as u32).to_be_bytes());
    ctx.extend_from_slice(policy);
    ctx.extend_from_slice(&(server.len() as u32).to_be_bytes());
    ctx.extend_from_slice(server);
    ctx
}

/// Encrypt `share` so that only the holder of `server_public`'s secret can
/// recover it. Purely local: no network access.
pub fn wrap_share(
    share: &Share,
    server_public: &X25519PublicKey,
    policy_id: &PolicyId,
    server_id: &ServerId,
) -> Result<Vec<u8>> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let context = binding_context(policy_id, server_id);
    let wrap_key = ephemeral.diffie_hellman(server_public).derive_key(&context);

    let nonce = EncryptionNonce::generate();
    let mut ciphertext = share.to_bytes();
    let tag = seal_in_place(&wrap_key, &nonce, &context, &mut ciphertext)?;

    let payload = WrappedSharePayload {
        ephemeral_public,
        nonce,
        ciphertext,
        tag,
    };
    let mut buf = Vec::new();
    ciborium::into_writer(&payload, &mut buf)
        .map_err(|e| CoreError::SerializationError(e.to_string()))?;
    Ok(buf)
}

/// Recover a share with the server's static secret.
pub fn unwrap_share(
    wrapped: &[u8],
    server_secret: &X25519StaticSecret,
    policy_id: &PolicyId,
    server_id: &ServerId,
) -> Result<Share> {
    let mut payload: WrappedSharePayload = ciborium::from_reader(wrapped)
        .map_err(|e| CoreError::UnwrapError(format!("malformed wrapped share: {}", e)))?;

    let context = binding_context(policy_id, server_id);
    let wrap_key = server_secret
        .diffie_hellman(&payload.ephemeral_public)
        .derive_key(&context);

    open_in_place(
        &wrap_key,
        &payload.nonce,
        &context,
        &mut payload.ciphertext,
        &payload.tag,
    )
    .map_err(|_| CoreError::UnwrapError("authentication failed".into()))?;

    let share = Share::from_bytes(&payload.ciphertext);
    payload.ciphertext.zeroize();
    share
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DataKey;
    use crate::threshold::ThresholdCodec;

    fn one_share() -> Share {
        let key = DataKey::generate();
        ThresholdCodec::split(&key, 2, 3).unwrap().remove(1)
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let secret = X25519StaticSecret::generate();
        let share = one_share();
        let policy = PolicyId::from("p1");
        let server = ServerId::from("s1");

        let wrapped = wrap_share(&share, &secret.public_key(), &policy, &server).unwrap();
        let recovered = unwrap_share(&wrapped, &secret, &policy, &server).unwrap();
        assert_eq!(recovered, share);
    }

    #[test]
    fn test_wrong_server_secret_fails() {
        let secret = X25519StaticSecret::generate();
        let other = X25519StaticSecret::generate();
        let policy = PolicyId::from("p1");
        let server = ServerId::from("s1");

        let wrapped = wrap_share(&one_share(), &secret.public_key(), &policy, &server).unwrap();
        assert!(matches!(
            unwrap_share(&wrapped, &other, &policy, &server),
            Err(CoreError::UnwrapError(_))
        ));
    }

    #[test]
    fn test_wrapped_share_bound_to_policy_and_server() {
        let secret = X25519StaticSecret::generate();
        let policy = PolicyId::from("p1");
        let server = ServerId::from("s1");
        let wrapped = wrap_share(&one_share(), &secret.public_key(), &policy, &server).unwrap();

        assert!(unwrap_share(&wrapped, &secret, &PolicyId::from("p2"), &server).is_err());
        assert!(unwrap_share(&wrapped, &secret, &policy, &ServerId::from("s2")).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let secret = X25519StaticSecret::generate();
        let result = unwrap_share(
            b"not cbor at all",
            &secret,
            &PolicyId::from("p1"),
            &ServerId::from("s1"),
        );
        assert!(matches!(result, Err(CoreError::UnwrapError(_))));
    }
}
