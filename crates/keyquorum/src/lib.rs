//! # keyquorum
//!
//! Threshold encryption with policy-gated key release.
//!
//! A payload is sealed under a fresh data key, the key is split so that any
//! `T` of `N` key servers can release it, and every release is gated by an
//! access policy (allowlist, time-lock, or subscription entitlement).
//!
//! ## Key Types
//!
//! - [`SealService`] - the operation surface
//! - [`ServiceConfig`] - fleet, threshold and timeouts, loadable from env
//! - [`ServiceError`] - everything that can go wrong
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keyquorum::{SealService, ServiceConfig};
//! use keyquorum::core::{CapabilityToken, Keypair, SystemClock};
//! use keyquorum::net::MemoryFleet;
//! use keyquorum::policy::MemoryOracle;
//! use keyquorum::store::MemoryStore;
//!
//! let fleet = Arc::new(MemoryFleet::new());
//! let service = SealService::new(
//!     ServiceConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     Arc::new(MemoryOracle::new()),
//!     fleet.clone(),
//! );
//! // spawn servers into `fleet` with `service.engine().clone()`, then:
//! service.start().await?;
//!
//! let alice = Keypair::generate();
//! let policy = service
//!     .create_policy("allowlist", &serde_json::json!({ "addresses": [alice.identity().to_hex()] }))
//!     .await?;
//! service.activate_policy(&policy.policy_id).await?;
//!
//! let envelope = service.encrypt(b"secret", &policy.policy_id).await?;
//! let token = CapabilityToken::issue(&alice, &policy.policy_id, now, 60_000);
//! let plaintext = service.decrypt(&envelope, &alice.identity(), &token).await?;
//! ```

pub mod config;
pub mod error;
pub mod service;

pub use config::{KeyServerEndpoint, ServiceConfig};
pub use error::{Result, ServiceError};
pub use service::SealService;

pub use keyquorum_core as core;
pub use keyquorum_net as net;
pub use keyquorum_policy as policy;
pub use keyquorum_store as store;
