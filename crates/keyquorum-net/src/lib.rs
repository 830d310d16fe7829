//! # keyquorum net
//!
//! Everything that talks to key servers: the [`KeyServer`] contract, the
//! [`KeyServerRegistry`] that tracks them, and the [`QuorumCoordinator`]
//! that encrypts to and decrypts from a quorum of them.
//!
//! ## Decrypt Protocol
//!
//! ```text
//! evaluate policy ──deny──> AccessDenied (no server contacted)
//!       │
//!       ▼
//! fan out one request per wrapped share (JoinSet, per-server timeout)
//!       │
//!       ▼
//! first T valid shares ──> grace for one more ──> abort the rest
//!       │
//!       ▼
//! reconstruct ──> open ──integrity failure with T+1 shares──> retry subsets
//! ```
//!
//! Individual server failures are absorbed and counted in the
//! [`DecryptReport`]; only the quorum outcome is surfaced as an error.

pub mod coordinator;
pub mod error;
pub mod registry;
pub mod transport;

pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, DecryptPhase, DecryptReport, QuorumCoordinator,
};
pub use error::{NetError, Result};
pub use registry::{HealthReport, KeyServerRecord, KeyServerRegistry, RegistryConfig, ServerHealth};
pub use transport::memory::{MemoryFleet, MemoryKeyServer};
pub use transport::{KeyServer, KeyServerConnector, ShareResponse};
