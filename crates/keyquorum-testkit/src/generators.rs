//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keyquorum_core::{DataKey, Identity, Keypair, PolicyId, KEY_LEN};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random identity.
pub fn identity() -> impl Strategy<Value = Identity> {
    any::<[u8; 32]>().prop_map(Identity::from_bytes)
}

/// Generate a random data key.
pub fn data_key() -> impl Strategy<Value = DataKey> {
    any::<[u8; KEY_LEN]>().prop_map(DataKey::from_bytes)
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a policy id in the service's format.
pub fn policy_id() -> impl Strategy<Value = PolicyId> {
    (
        prop_oneof![Just("allowlist"), Just("timelock"), Just("subscription")],
        "20[2-3][0-9][01][0-9][0-2][0-9]_[0-2][0-9][0-5][0-9][0-5][0-9]",
        "[0-9a-f]{8}",
    )
        .prop_map(|(kind, stamp, suffix)| PolicyId::new(format!("{}_{}_{}", kind, stamp, suffix)))
}

/// A threshold scheme and a decrypting subset of it.
#[derive(Debug, Clone)]
pub struct QuorumShape {
    pub threshold: usize,
    pub total: usize,
    /// Distinct 0-based share positions, at least `threshold` of them.
    pub subset: Vec<usize>,
}

/// Generate `1 <= T <= N <= max_total` with a shuffled subset of size `>= T`.
pub fn quorum_shape(max_total: usize) -> impl Strategy<Value = QuorumShape> {
    (1..=max_total)
        .prop_flat_map(|total| (1..=total, Just(total)))
        .prop_flat_map(|(threshold, total)| {
            (
                Just(threshold),
                Just(total),
                Just((0..total).collect::<Vec<_>>()).prop_shuffle(),
                threshold..=total,
            )
        })
        .prop_map(|(threshold, total, order, take)| QuorumShape {
            threshold,
            total,
            subset: order.into_iter().take(take).collect(),
        })
}

/// Generate a shape and a subset strictly below its threshold.
pub fn sub_threshold_shape(max_total: usize) -> impl Strategy<Value = QuorumShape> {
    (2..=max_total.max(2))
        .prop_flat_map(|total| (2..=total, Just(total)))
        .prop_flat_map(|(threshold, total)| {
            (
                Just(threshold),
                Just(total),
                Just((0..total).collect::<Vec<_>>()).prop_shuffle(),
                0..threshold,
            )
        })
        .prop_map(|(threshold, total, order, take)| QuorumShape {
            threshold,
            total,
            subset: order.into_iter().take(take).collect(),
        })
}
