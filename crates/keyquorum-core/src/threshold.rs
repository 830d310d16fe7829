//! Threshold secret sharing of data keys.
//!
//! Shamir's scheme over GF(2^8), applied independently to each byte of a
//! 256-bit key. A share is the evaluation of a random polynomial of degree
//! `T - 1` at a non-zero x-coordinate (its index); any `T` shares determine
//! the polynomial and hence the key, while `T - 1` shares are consistent
//! with every possible key.
//!
//! Reconstruction cannot detect a corrupted share. A wrong share yields a
//! wrong key, which the envelope AEAD tag then rejects.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::crypto::{DataKey, KEY_LEN};
use crate::error::{CoreError, Result};
use crate::gf256;

/// Encoded size of a share: one index byte plus the key-sized value.
pub const SHARE_LEN: usize = 1 + KEY_LEN;

/// Largest supported share count (x-coordinates are non-zero bytes).
pub const MAX_SHARES: usize = 255;

/// One point of a split data key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// x-coordinate, 1-based.
    pub index: u8,
    /// Per-byte y-coordinates.
    pub value: [u8; KEY_LEN],
}

impl Share {
    /// Encode as `index || value`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_LEN);
        out.push(self.index);
        out.extend_from_slice(&self.value);
        out
    }

    /// Decode from `index || value`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARE_LEN {
            return Err(CoreError::MalformedShare(format!(
                "expected {} bytes, got {}",
                SHARE_LEN,
                bytes.len()
            )));
        }
        if bytes[0] == 0 {
            return Err(CoreError::MalformedShare("index 0 is reserved".into()));
        }
        let mut value = [0u8; KEY_LEN];
        value.copy_from_slice(&bytes[1..]);
        Ok(Self {
            index: bytes[0],
            value,
        })
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share(index={})", self.index)
    }
}

/// Splits and reconstructs data keys. Stateless and network-free.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdCodec;

impl ThresholdCodec {
    /// Split `key` into `total` shares, any `threshold` of which reconstruct it.
    pub fn split(key: &DataKey, threshold: usize, total: usize) -> Result<Vec<Share>> {
        Self::split_with_rng(key, threshold, total, &mut rand::thread_rng())
    }

    /// Split using a caller-supplied CSPRNG.
    pub fn split_with_rng<R: RngCore + CryptoRng>(
        key: &DataKey,
        threshold: usize,
        total: usize,
        rng: &mut R,
    ) -> Result<Vec<Share>> {
        check_params(threshold, total)?;

        let mut shares: Vec<Share> = (1..=total)
            .map(|x| Share {
                index: x as u8,
                value: [0u8; KEY_LEN],
            })
            .collect();

        let mut coefficients = vec![0u8; threshold];
        for (byte_pos, &secret_byte) in key.as_bytes().iter().enumerate() {
            coefficients[0] = secret_byte;
            rng.fill_bytes(&mut coefficients[1..]);

            for share in shares.iter_mut() {
                share.value[byte_pos] = gf256::eval(&coefficients, share.index);
            }
        }
        coefficients.zeroize();

        Ok(shares)
    }

    /// Reconstruct a key from at least `threshold` shares of one split.
    ///
    /// Exact duplicates are ignored; the first `threshold` distinct shares
    /// are used, so the result does not depend on arrival order when given
    /// genuine shares. Two different values for the same index are rejected.
    pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<DataKey> {
        if threshold == 0 || threshold > MAX_SHARES {
            return Err(CoreError::InvalidThreshold {
                threshold,
                total: shares.len(),
            });
        }

        let mut selected: Vec<&Share> = Vec::with_capacity(threshold);
        for share in shares {
            if share.index == 0 {
                return Err(CoreError::ReconstructionFailure(
                    "share index 0 is reserved".into(),
                ));
            }
            match selected.iter().find(|s| s.index == share.index) {
                Some(existing) if existing.value == share.value => continue,
                Some(_) => {
                    return Err(CoreError::ReconstructionFailure(format!(
                        "conflicting values for share index {}",
                        share.index
                    )))
                }
                None => {
                    if selected.len() < threshold {
                        selected.push(share);
                    }
                }
            }
        }

        if selected.len() < threshold {
            return Err(CoreError::ReconstructionFailure(format!(
                "need {} distinct shares, got {}",
                threshold,
                selected.len()
            )));
        }

        let xs: Vec<u8> = selected.iter().map(|s| s.index).collect();
        let weights = gf256::lagrange_weights_at_zero(&xs);

        let mut key = [0u8; KEY_LEN];
        for (byte_pos, out) in key.iter_mut().enumerate() {
            *out = selected
                .iter()
                .zip(weights.iter())
                .fold(0u8, |acc, (share, &w)| {
                    gf256::add(acc, gf256::mul(w, share.value[byte_pos]))
                });
        }

        let data_key = DataKey::from_bytes(key);
        key.zeroize();
        Ok(data_key)
    }
}

fn check_params(threshold: usize, total: usize) -> Result<()> {
    if threshold == 0 || threshold > total || total > MAX_SHARES {
        return Err(CoreError::InvalidThreshold { threshold, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::Rng;

    #[test]
    fn test_split_reconstruct_exact_threshold() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 2, 3).unwrap();
        assert_eq!(shares.len(), 3);

        let recovered = ThresholdCodec::reconstruct(&shares[1..], 2).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn test_every_pair_of_three_reconstructs() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 2, 3).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let subset = vec![shares[i].clone(), shares[j].clone()];
                assert_eq!(ThresholdCodec::reconstruct(&subset, 2).unwrap(), key);
            }
        }
    }

    #[test]
    fn test_all_permutations_agree() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 3, 5).unwrap();
        let (s1, s2, s3) = (&shares[0], &shares[2], &shares[4]);
        let orders = [
            [s1, s2, s3],
            [s1, s3, s2],
            [s2, s1, s3],
            [s2, s3, s1],
            [s3, s1, s2],
            [s3, s2, s1],
        ];
        for order in orders {
            let subset: Vec<Share> = order.iter().map(|s| (*s).clone()).collect();
            assert_eq!(ThresholdCodec::reconstruct(&subset, 3).unwrap(), key);
        }
    }

    #[test]
    fn test_fewer_than_threshold_is_rejected() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 3, 5).unwrap();
        let err = ThresholdCodec::reconstruct(&shares[..2], 3).unwrap_err();
        assert!(matches!(err, CoreError::ReconstructionFailure(_)));
    }

    #[test]
    fn test_below_threshold_interpolation_never_yields_key() {
        // Interpolating T-1 shares as if they were a full quorum must not
        // reproduce the key.
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let total = rng.gen_range(2..=8usize);
            let threshold = rng.gen_range(2..=total);
            let key = DataKey::generate();
            let shares = ThresholdCodec::split(&key, threshold, total).unwrap();
            let subset: Vec<Share> = rand::seq::index::sample(&mut rng, total, threshold - 1)
                .into_iter()
                .map(|i| shares[i].clone())
                .collect();
            let guess = ThresholdCodec::reconstruct(&subset, threshold - 1).unwrap();
            assert_ne!(guess, key, "{} of {} shares with T = {}", subset.len(), total, threshold);
        }
    }

    #[test]
    fn test_single_share_is_independent_of_key_byte() {
        // With T = 2, share 1 at byte 0 is s + a1 for uniform a1. Holding a1
        // fixed, distinct secrets give distinct share bytes, so every share
        // byte value is consistent with every secret byte.
        let mut seen = [false; 256];
        for s in 0..=255u8 {
            let y = gf256::eval(&[s, 0x5a], 1);
            seen[y as usize] = true;
        }
        assert!(seen.iter().all(|&b| b));
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 2, 3).unwrap();
        let with_dupes = vec![
            shares[0].clone(),
            shares[0].clone(),
            shares[2].clone(),
            shares[2].clone(),
        ];
        assert_eq!(ThresholdCodec::reconstruct(&with_dupes, 2).unwrap(), key);
    }

    #[test]
    fn test_conflicting_index_rejected() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 2, 3).unwrap();
        let mut forged = shares[0].clone();
        forged.value[0] ^= 1;
        let err = ThresholdCodec::reconstruct(&[shares[0].clone(), forged], 2).unwrap_err();
        assert!(matches!(err, CoreError::ReconstructionFailure(_)));
    }

    #[test]
    fn test_corrupted_share_gives_wrong_key() {
        let key = DataKey::generate();
        let mut shares = ThresholdCodec::split(&key, 2, 3).unwrap();
        shares[0].value[5] ^= 0x80;
        let recovered = ThresholdCodec::reconstruct(&shares[..2], 2).unwrap();
        assert_ne!(recovered, key);
    }

    #[test]
    fn test_invalid_parameters() {
        let key = DataKey::generate();
        assert!(ThresholdCodec::split(&key, 0, 3).is_err());
        assert!(ThresholdCodec::split(&key, 4, 3).is_err());
        assert!(ThresholdCodec::split(&key, 2, 256).is_err());
    }

    #[test]
    fn test_share_bytes_roundtrip() {
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 1, 1).unwrap();
        let bytes = shares[0].to_bytes();
        assert_eq!(bytes.len(), SHARE_LEN);
        assert_eq!(Share::from_bytes(&bytes).unwrap(), shares[0]);
        assert!(Share::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn test_threshold_one_shares_equal_key() {
        // Degree-zero polynomial: every share carries the key itself.
        let key = DataKey::generate();
        let shares = ThresholdCodec::split(&key, 1, 3).unwrap();
        for share in &shares {
            assert_eq!(&share.value, key.as_bytes());
        }
    }

    proptest! {
        #[test]
        fn test_any_threshold_subset_reconstructs(
            total in 1usize..=10,
            threshold_seed in 0usize..10,
            rotate in 0usize..10,
            key_bytes in any::<[u8; 32]>(),
        ) {
            let threshold = threshold_seed % total + 1;
            let key = DataKey::from_bytes(key_bytes);
            let mut shares = ThresholdCodec::split(&key, threshold, total).unwrap();
            shares.rotate_left(rotate % total);
            let recovered = ThresholdCodec::reconstruct(&shares[..threshold], threshold).unwrap();
            prop_assert_eq!(recovered, key);
        }
    }
}
