//! # keyquorum testkit
//!
//! Testing utilities for keyquorum.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Known-answer vectors**: GF(2^8) products and hand-computed Shamir
//!   shares that any implementation must reproduce
//! - **Generators**: Proptest strategies for quorum shapes, payloads and parties
//! - **Fixtures**: An in-process key server fleet behind a ready [`SealService`]
//!
//! ## Known-Answer Vectors
//!
//! ```rust
//! use keyquorum_testkit::vectors::{share_vectors, verify_share_vectors};
//!
//! assert!(verify_share_vectors().iter().all(|(_, ok)| *ok));
//! assert!(!share_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keyquorum_testkit::generators::{quorum_shape, QuorumShape};
//!
//! proptest! {
//!     #[test]
//!     fn any_threshold_subset_reconstructs(shape in quorum_shape(10)) {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Test Fleets
//!
//! ```rust,ignore
//! use keyquorum_testkit::fixtures::{party, TestFleet};
//!
//! let fleet = TestFleet::new(3, 2).await?;
//! let alice = party(1);
//! let policy = fleet.allowlist_policy(&[&alice]).await?;
//! let envelope = fleet.service.encrypt(b"hello", &policy).await?;
//! let plaintext = fleet.service.decrypt(&envelope, &alice.identity(), &fleet.token(&alice, &policy)).await?;
//! ```
//!
//! [`SealService`]: keyquorum::SealService

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_party, party, TestFleet, FIXTURE_EPOCH};
pub use generators::{quorum_shape, QuorumShape};
pub use vectors::{gf256_vectors, share_vectors, verify_share_vectors, ShareVector};
