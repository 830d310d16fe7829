//! Known-answer vectors.
//!
//! Field products come from FIPS-197 section 4.2. Share vectors are worked
//! by hand: each key byte uses the same polynomial, so every share value is
//! one byte repeated across the key width.

use rand::{CryptoRng, RngCore};

use keyquorum_core::{gf256, DataKey, Share, ThresholdCodec, KEY_LEN};

/// `(a, b, a * b)` in GF(2^8).
pub fn gf256_vectors() -> Vec<(u8, u8, u8)> {
    vec![
        (0x57, 0x83, 0xc1),
        (0x57, 0x02, 0xae),
        (0x57, 0x04, 0x47),
        (0x57, 0x08, 0x8e),
        (0x57, 0x10, 0x07),
        (0x57, 0x13, 0xfe),
        (0x53, 0xca, 0x01),
        (0xff, 0x00, 0x00),
        (0x01, 0xb6, 0xb6),
    ]
}

/// A split worked out by hand.
#[derive(Debug, Clone)]
pub struct ShareVector {
    pub name: &'static str,
    pub threshold: usize,
    /// Repeated across every key byte.
    pub secret: u8,
    /// Polynomial coefficients above the constant term, lowest degree first.
    pub coefficients: &'static [u8],
    /// `(index, value byte)` per share.
    pub shares: &'static [(u8, u8)],
}

impl ShareVector {
    pub fn key(&self) -> DataKey {
        DataKey::from_bytes([self.secret; KEY_LEN])
    }

    pub fn expected_shares(&self) -> Vec<Share> {
        self.shares
            .iter()
            .map(|&(index, byte)| Share {
                index,
                value: [byte; KEY_LEN],
            })
            .collect()
    }

    /// Split the vector's key with its coefficients fed through the RNG.
    pub fn split(&self) -> Vec<Share> {
        let mut rng = ScriptedCoefficients::new(self.coefficients);
        ThresholdCodec::split_with_rng(&self.key(), self.threshold, self.shares.len(), &mut rng)
            .unwrap_or_default()
    }
}

/// All share vectors.
pub fn share_vectors() -> Vec<ShareVector> {
    vec![
        ShareVector {
            name: "2-of-3 secret 0x42 slope 0x57",
            threshold: 2,
            secret: 0x42,
            coefficients: &[0x57],
            shares: &[(1, 0x15), (2, 0xec), (3, 0xbb)],
        },
        ShareVector {
            name: "3-of-4 f(x) = 1 + 2x + 3x^2",
            threshold: 3,
            secret: 0x01,
            coefficients: &[0x02, 0x03],
            shares: &[(1, 0x00), (2, 0x09), (3, 0x08), (4, 0x39)],
        },
        ShareVector {
            name: "1-of-2 constant",
            threshold: 1,
            secret: 0x7f,
            coefficients: &[],
            shares: &[(1, 0x7f), (2, 0x7f)],
        },
    ]
}

/// Check every vector: the split reproduces the listed shares, and every
/// threshold-sized subset reconstructs the key.
pub fn verify_share_vectors() -> Vec<(String, bool)> {
    share_vectors()
        .iter()
        .map(|v| {
            let expected = v.expected_shares();
            let split_ok = v.split() == expected;
            let key = v.key();
            let subsets_ok = subsets(expected.len(), v.threshold).iter().all(|idx| {
                let picked: Vec<Share> = idx.iter().map(|&i| expected[i].clone()).collect();
                ThresholdCodec::reconstruct(&picked, v.threshold)
                    .map(|k| k.as_bytes() == key.as_bytes())
                    .unwrap_or(false)
            });
            (v.name.to_string(), split_ok && subsets_ok)
        })
        .collect()
}

/// Every `k`-element subset of `0..n`, as sorted index lists.
pub fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
    fn walk(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            walk(i + 1, n, k, current, out);
            current.pop();
        }
    }
    let mut out = Vec::new();
    walk(0, n, k, &mut Vec::with_capacity(k), &mut out);
    out
}

/// Check a field product against [`gf256::mul`].
pub fn verify_gf256_vectors() -> bool {
    gf256_vectors()
        .iter()
        .all(|&(a, b, p)| gf256::mul(a, b) == p && gf256::mul(b, a) == p)
}

/// Deterministic "RNG" that writes a fixed coefficient pattern.
///
/// Only for reproducing known splits; it has no entropy.
pub struct ScriptedCoefficients {
    pattern: Vec<u8>,
}

impl ScriptedCoefficients {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
        }
    }
}

impl RngCore for ScriptedCoefficients {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if self.pattern.is_empty() {
            dest.fill(0);
            return;
        }
        for (i, b) in dest.iter_mut().enumerate() {
            *b = self.pattern[i % self.pattern.len()];
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for ScriptedCoefficients {}
