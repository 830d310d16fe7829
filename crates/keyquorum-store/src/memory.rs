//! In-memory implementation of the store traits.
//!
//! Same semantics as SQLite, no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use keyquorum_core::{AccessPolicy, EncryptedEnvelope, EnvelopeId, PolicyId};

use crate::error::{Result, StoreError};
use crate::traits::{EnvelopeStore, InsertResult, PolicyStore};

/// In-memory store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    policies: HashMap<PolicyId, AccessPolicy>,
    /// Insertion order, for `list_policies`.
    policy_order: Vec<PolicyId>,
    envelopes: HashMap<EnvelopeId, EncryptedEnvelope>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy_count(&self) -> usize {
        self.inner.read().map(|i| i.policies.len()).unwrap_or(0)
    }

    pub fn envelope_count(&self) -> usize {
        self.inner.read().map(|i| i.envelopes.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Worker(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Worker(format!("lock poisoned: {}", e)))
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert_policy(&self, policy: &AccessPolicy) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.policies.contains_key(&policy.policy_id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.policy_order.push(policy.policy_id.clone());
        inner.policies.insert(policy.policy_id.clone(), policy.clone());
        Ok(InsertResult::Inserted)
    }

    async fn put_policy(&self, policy: &AccessPolicy) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.policies.contains_key(&policy.policy_id) {
            inner.policy_order.push(policy.policy_id.clone());
        }
        inner.policies.insert(policy.policy_id.clone(), policy.clone());
        Ok(())
    }

    async fn get_policy(&self, policy_id: &PolicyId) -> Result<Option<AccessPolicy>> {
        Ok(self.read()?.policies.get(policy_id).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<AccessPolicy>> {
        let inner = self.read()?;
        Ok(inner
            .policy_order
            .iter()
            .filter_map(|id| inner.policies.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl EnvelopeStore for MemoryStore {
    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<EnvelopeId> {
        let id = envelope.id()?;
        self.write()?
            .envelopes
            .entry(id)
            .or_insert_with(|| envelope.clone());
        Ok(id)
    }

    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Option<EncryptedEnvelope>> {
        Ok(self.read()?.envelopes.get(id).cloned())
    }

    async fn list_envelopes(&self, policy_id: &PolicyId) -> Result<Vec<EnvelopeId>> {
        let inner = self.read()?;
        let mut matching: Vec<(i64, EnvelopeId)> = inner
            .envelopes
            .iter()
            .filter(|(_, env)| &env.policy_id == policy_id)
            .map(|(id, env)| (env.created_at, *id))
            .collect();
        matching.sort_by_key(|(created_at, id)| (*created_at, *id.as_bytes()));
        Ok(matching.into_iter().map(|(_, id)| id).collect())
    }
}
