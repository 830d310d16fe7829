//! Store traits: the abstract interface for policy and envelope persistence.
//!
//! The engine and service are storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use keyquorum_core::{AccessPolicy, EncryptedEnvelope, EnvelopeId, PolicyId};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The record was new.
    Inserted,
    /// A record with the same key already exists. Nothing was written.
    AlreadyExists,
}

/// Async interface for access-policy persistence.
///
/// Policies are never deleted. `put_policy` replaces the whole record and is
/// used for state transitions.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Insert a new policy. An existing id is left untouched.
    async fn insert_policy(&self, policy: &AccessPolicy) -> Result<InsertResult>;

    /// Insert or replace a policy record.
    async fn put_policy(&self, policy: &AccessPolicy) -> Result<()>;

    /// Get a policy by id.
    async fn get_policy(&self, policy_id: &PolicyId) -> Result<Option<AccessPolicy>>;

    /// List all policies, oldest first.
    async fn list_policies(&self) -> Result<Vec<AccessPolicy>>;
}

/// Async interface for envelope persistence, keyed by content address.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Store an envelope and return its id. Storing the same envelope twice
    /// is a no-op.
    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<EnvelopeId>;

    /// Get an envelope by id.
    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Option<EncryptedEnvelope>>;

    /// Envelope ids sealed under a policy.
    async fn list_envelopes(&self, policy_id: &PolicyId) -> Result<Vec<EnvelopeId>>;
}

#[async_trait]
impl<S: PolicyStore + ?Sized> PolicyStore for Arc<S> {
    async fn insert_policy(&self, policy: &AccessPolicy) -> Result<InsertResult> {
        (**self).insert_policy(policy).await
    }

    async fn put_policy(&self, policy: &AccessPolicy) -> Result<()> {
        (**self).put_policy(policy).await
    }

    async fn get_policy(&self, policy_id: &PolicyId) -> Result<Option<AccessPolicy>> {
        (**self).get_policy(policy_id).await
    }

    async fn list_policies(&self) -> Result<Vec<AccessPolicy>> {
        (**self).list_policies().await
    }
}

#[async_trait]
impl<S: EnvelopeStore + ?Sized> EnvelopeStore for Arc<S> {
    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<EnvelopeId> {
        (**self).put_envelope(envelope).await
    }

    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Option<EncryptedEnvelope>> {
        (**self).get_envelope(id).await
    }

    async fn list_envelopes(&self, policy_id: &PolicyId) -> Result<Vec<EnvelopeId>> {
        (**self).list_envelopes(policy_id).await
    }
}
