//! Access policy records.
//!
//! This module holds the policy data model only. Parameter validation and
//! lifecycle enforcement live in the policy engine.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{Identity, PolicyId};

/// The family a policy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Allowlist,
    Timelock,
    Subscription,
}

impl PolicyKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Allowlist => "allowlist",
            PolicyKind::Timelock => "timelock",
            PolicyKind::Subscription => "subscription",
        }
    }

    /// Parse the lowercase name, as used in policy ids.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allowlist" => Some(PolicyKind::Allowlist),
            "timelock" => Some(PolicyKind::Timelock),
            "subscription" => Some(PolicyKind::Subscription),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. Transitions only move forward:
/// `Created -> Active -> Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyState {
    Created,
    Active,
    Revoked,
}

impl PolicyState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PolicyState::Created => "created",
            PolicyState::Active => "active",
            PolicyState::Revoked => "revoked",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub const fn can_transition_to(&self, next: PolicyState) -> bool {
        matches!(
            (self, next),
            (PolicyState::Created, PolicyState::Active) | (PolicyState::Active, PolicyState::Revoked)
        )
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated policy rule: kind and parameters together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyRule {
    /// Grant iff the requester is one of `addresses`. Never empty.
    Allowlist { addresses: BTreeSet<Identity> },
    /// Grant iff the clock reads at or after `unlock_at` (Unix ms).
    Timelock { unlock_at: i64 },
    /// Grant iff the entitlement oracle vouches for the requester.
    Subscription { entitlement_ref: String },
}

impl PolicyRule {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyRule::Allowlist { .. } => PolicyKind::Allowlist,
            PolicyRule::Timelock { .. } => PolicyKind::Timelock,
            PolicyRule::Subscription { .. } => PolicyKind::Subscription,
        }
    }
}

/// A stored access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub policy_id: PolicyId,
    pub rule: PolicyRule,
    pub state: PolicyState,
    /// Unix milliseconds.
    pub created_at: i64,
    pub activated_at: Option<i64>,
    pub revoked_at: Option<i64>,
    /// Free-form revocation reason for the audit trail.
    pub reason: Option<String>,
}

impl AccessPolicy {
    /// A freshly created policy in the `Created` state.
    pub fn new(policy_id: PolicyId, rule: PolicyRule, created_at: i64) -> Self {
        Self {
            policy_id,
            rule,
            state: PolicyState::Created,
            created_at,
            activated_at: None,
            revoked_at: None,
            reason: None,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.rule.kind()
    }

    pub fn is_active(&self) -> bool {
        self.state == PolicyState::Active
    }

    pub fn is_revoked(&self) -> bool {
        self.state == PolicyState::Revoked
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}
