//! Entitlement oracle: the external authority for subscription policies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use keyquorum_core::Identity;
use thiserror::Error;

/// The oracle could not answer. Evaluation turns this into a deny.
#[derive(Debug, Clone, Error)]
#[error("entitlement oracle unavailable: {0}")]
pub struct OracleUnavailable(pub String);

/// Answers whether an identity currently holds an entitlement.
#[async_trait]
pub trait EntitlementOracle: Send + Sync {
    async fn is_entitled(
        &self,
        entitlement_ref: &str,
        identity: &Identity,
    ) -> Result<bool, OracleUnavailable>;
}

/// In-memory oracle for tests and local deployments.
#[derive(Debug)]
pub struct MemoryOracle {
    grants: RwLock<HashSet<(String, Identity)>>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn grant(&self, entitlement_ref: &str, identity: Identity) {
        if let Ok(mut grants) = self.grants.write() {
            grants.insert((entitlement_ref.to_string(), identity));
        }
    }

    pub fn withdraw(&self, entitlement_ref: &str, identity: &Identity) {
        if let Ok(mut grants) = self.grants.write() {
            grants.remove(&(entitlement_ref.to_string(), *identity));
        }
    }

    /// Simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of queries answered or refused so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitlementOracle for MemoryOracle {
    async fn is_entitled(
        &self,
        entitlement_ref: &str,
        identity: &Identity,
    ) -> Result<bool, OracleUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(OracleUnavailable("memory oracle marked unavailable".into()));
        }
        let grants = self
            .grants
            .read()
            .map_err(|e| OracleUnavailable(format!("lock poisoned: {}", e)))?;
        Ok(grants.contains(&(entitlement_ref.to_string(), *identity)))
    }
}
