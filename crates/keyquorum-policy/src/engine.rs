//! The policy engine: lifecycle transitions and access decisions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use keyquorum_core::{
    AccessPolicy, CapabilityToken, Clock, Identity, PolicyId, PolicyKind, PolicyRule, PolicyState,
};
use keyquorum_store::{InsertResult, PolicyStore};

use crate::error::{PolicyError, Result};
use crate::oracle::EntitlementOracle;
use crate::params::{generate_policy_id, validate_params};

/// Default bound on a single entitlement oracle query.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why access was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NotAllowlisted,
    /// Time-lock has not opened yet.
    Locked { unlock_at: i64 },
    NotEntitled,
    OracleUnavailable,
    /// The policy exists but was never activated.
    PolicyInactive,
    InvalidCapability(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotAllowlisted => f.write_str("identity not on allowlist"),
            DenyReason::Locked { unlock_at } => write!(f, "locked until {}", unlock_at),
            DenyReason::NotEntitled => f.write_str("identity not entitled"),
            DenyReason::OracleUnavailable => f.write_str("entitlement oracle unavailable"),
            DenyReason::PolicyInactive => f.write_str("policy not active"),
            DenyReason::InvalidCapability(msg) => write!(f, "invalid capability: {}", msg),
        }
    }
}

/// Outcome of evaluating a policy for a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Grant,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_grant(&self) -> bool {
        matches!(self, Decision::Grant)
    }
}

/// Owns policy lifecycle and evaluation.
///
/// Evaluation never writes; the clock and oracle are injected.
pub struct PolicyEngine<S: PolicyStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    oracle: Arc<dyn EntitlementOracle>,
    oracle_timeout: Duration,
    /// Serializes read-modify-write transitions.
    transitions: Mutex<()>,
}

impl<S: PolicyStore> PolicyEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, oracle: Arc<dyn EntitlementOracle>) -> Self {
        Self {
            store,
            clock,
            oracle,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            transitions: Mutex::new(()),
        }
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validate parameters and persist a new policy in the `Created` state.
    pub async fn create(&self, kind: PolicyKind, params: &Value) -> Result<AccessPolicy> {
        let now = self.clock.now_millis();
        let rule = validate_params(kind, params, now)?;
        let policy = AccessPolicy::new(generate_policy_id(kind, now), rule, now);

        match self.store.insert_policy(&policy).await? {
            InsertResult::Inserted => {
                tracing::info!(policy_id = %policy.policy_id, kind = %kind, "created policy");
                Ok(policy)
            }
            InsertResult::AlreadyExists => Err(PolicyError::AlreadyExists(policy.policy_id)),
        }
    }

    /// `Created -> Active`.
    pub async fn activate(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        let _guard = self.transitions.lock().await;
        let mut policy = self.get(policy_id).await?;
        if !policy.state.can_transition_to(PolicyState::Active) {
            return Err(PolicyError::InvalidStateTransition {
                policy_id: policy_id.clone(),
                from: policy.state,
                to: PolicyState::Active,
            });
        }
        policy.state = PolicyState::Active;
        policy.activated_at = Some(self.clock.now_millis());
        self.store.put_policy(&policy).await?;
        tracing::info!(policy_id = %policy_id, "activated policy");
        Ok(policy)
    }

    /// `Active -> Revoked`. Idempotent on an already revoked policy.
    pub async fn revoke(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        self.revoke_inner(policy_id, None).await
    }

    /// Revoke and record a reason for the audit trail.
    pub async fn revoke_with_reason(
        &self,
        policy_id: &PolicyId,
        reason: impl Into<String>,
    ) -> Result<AccessPolicy> {
        self.revoke_inner(policy_id, Some(reason.into())).await
    }

    async fn revoke_inner(&self, policy_id: &PolicyId, reason: Option<String>) -> Result<AccessPolicy> {
        let _guard = self.transitions.lock().await;
        let mut policy = self.get(policy_id).await?;
        match policy.state {
            PolicyState::Revoked => return Ok(policy),
            PolicyState::Created => {
                return Err(PolicyError::InvalidStateTransition {
                    policy_id: policy_id.clone(),
                    from: PolicyState::Created,
                    to: PolicyState::Revoked,
                })
            }
            PolicyState::Active => {}
        }
        policy.state = PolicyState::Revoked;
        policy.revoked_at = Some(self.clock.now_millis());
        policy.reason = reason;
        self.store.put_policy(&policy).await?;
        tracing::info!(policy_id = %policy_id, reason = ?policy.reason, "revoked policy");
        Ok(policy)
    }

    /// Look up a policy.
    pub async fn get(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        self.store
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(policy_id.clone()))
    }

    pub async fn list(&self) -> Result<Vec<AccessPolicy>> {
        Ok(self.store.list_policies().await?)
    }

    /// The policy, provided it is usable for new encryptions.
    pub async fn require_active(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        let policy = self.get(policy_id).await?;
        match policy.state {
            PolicyState::Active => Ok(policy),
            PolicyState::Revoked => Err(PolicyError::Revoked(policy_id.clone())),
            PolicyState::Created => Err(PolicyError::NotActive(policy_id.clone())),
        }
    }

    /// Decide whether `identity`, presenting `token`, may use `policy_id`.
    ///
    /// Unknown and revoked policies are errors rather than denials so callers
    /// can tell them apart from a negative decision.
    pub async fn evaluate(
        &self,
        policy_id: &PolicyId,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<Decision> {
        let policy = self.get(policy_id).await?;
        let now = self.clock.now_millis();

        match policy.state {
            PolicyState::Revoked => return Err(PolicyError::Revoked(policy_id.clone())),
            PolicyState::Created => return Ok(Decision::Deny(DenyReason::PolicyInactive)),
            PolicyState::Active => {}
        }

        if let Err(e) = token.verify(identity, policy_id, now) {
            tracing::debug!(policy_id = %policy_id, requester = %identity, error = %e, "capability rejected");
            return Ok(Decision::Deny(DenyReason::InvalidCapability(e.to_string())));
        }

        let decision = match &policy.rule {
            PolicyRule::Allowlist { addresses } => {
                if addresses.contains(identity) {
                    Decision::Grant
                } else {
                    Decision::Deny(DenyReason::NotAllowlisted)
                }
            }
            PolicyRule::Timelock { unlock_at } => {
                if now >= *unlock_at {
                    Decision::Grant
                } else {
                    Decision::Deny(DenyReason::Locked { unlock_at: *unlock_at })
                }
            }
            PolicyRule::Subscription { entitlement_ref } => {
                let query = self.oracle.is_entitled(entitlement_ref, identity);
                match tokio::time::timeout(self.oracle_timeout, query).await {
                    Ok(Ok(true)) => Decision::Grant,
                    Ok(Ok(false)) => Decision::Deny(DenyReason::NotEntitled),
                    Ok(Err(e)) => {
                        tracing::warn!(policy_id = %policy_id, error = %e, "entitlement check failed");
                        Decision::Deny(DenyReason::OracleUnavailable)
                    }
                    Err(_) => {
                        tracing::warn!(policy_id = %policy_id, "entitlement check timed out");
                        Decision::Deny(DenyReason::OracleUnavailable)
                    }
                }
            }
        };

        tracing::debug!(policy_id = %policy_id, requester = %identity, ?decision, "evaluated policy");
        Ok(decision)
    }

    /// `true` iff [`evaluate`](Self::evaluate) grants.
    pub async fn verify_access(
        &self,
        policy_id: &PolicyId,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<bool> {
        Ok(self.evaluate(policy_id, identity, token).await?.is_grant())
    }
}
