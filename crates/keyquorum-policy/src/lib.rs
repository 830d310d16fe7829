//! # keyquorum policy
//!
//! Access policies gate every decryption. A policy is created from raw JSON
//! parameters, activated, and eventually revoked; revocation is terminal.
//!
//! ## Key Types
//!
//! - [`PolicyEngine`] - lifecycle transitions and access decisions
//! - [`Decision`] / [`DenyReason`] - outcome of an evaluation
//! - [`EntitlementOracle`] - external authority for subscription policies
//! - [`MemoryOracle`] - in-memory oracle for tests
//!
//! ## Evaluation Order
//!
//! 1. Unknown or revoked policy: error, before anything else
//! 2. Policy not yet active: deny
//! 3. Capability token: signature, subject, scope, expiry
//! 4. The rule itself (allowlist, time-lock, or entitlement)

pub mod engine;
pub mod error;
pub mod oracle;
pub mod params;

pub use engine::{Decision, DenyReason, PolicyEngine, DEFAULT_ORACLE_TIMEOUT};
pub use error::{PolicyError, Result};
pub use oracle::{EntitlementOracle, MemoryOracle, OracleUnavailable};
pub use params::{generate_policy_id, validate_params};
