//! # keyquorum store
//!
//! Persistence for access policies and encrypted envelopes behind the
//! [`PolicyStore`] and [`EnvelopeStore`] traits.
//!
//! ## Key Types
//!
//! - [`SqliteStore`] - SQLite-backed persistent storage
//! - [`MemoryStore`] - in-memory storage for tests
//! - [`InsertResult`] - outcome of inserting a new policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyquorum_store::{PolicyStore, SqliteStore};
//! use keyquorum_core::PolicyId;
//!
//! async fn example() {
//!     let store = SqliteStore::open("keyquorum.db").unwrap();
//!     let policy = store.get_policy(&PolicyId::from("allowlist_20260101_000000_deadbeef")).await;
//! }
//! ```
//!
//! ## Design Notes
//!
//! - Policies are never deleted; state transitions replace the whole record.
//! - Envelopes are content addressed, so storing one twice is a no-op.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{EnvelopeStore, InsertResult, PolicyStore};
