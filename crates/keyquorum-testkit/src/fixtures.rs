//! Test fixtures and helpers.
//!
//! A [`TestFleet`] is a [`SealService`] wired to in-process key servers, a
//! manual clock and an in-memory entitlement oracle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use keyquorum::{KeyServerEndpoint, Result, SealService, ServiceConfig};
use keyquorum_core::{CapabilityToken, Clock, Keypair, ManualClock, PolicyId, ServerId};
use keyquorum_net::transport::memory::MEMORY_SCHEME;
use keyquorum_net::{CoordinatorConfig, MemoryFleet, MemoryKeyServer};
use keyquorum_policy::MemoryOracle;
use keyquorum_store::{EnvelopeStore, MemoryStore, PolicyStore};

/// 2026-01-01T00:00:00Z
pub const FIXTURE_EPOCH: i64 = 1_767_225_600_000;

/// Lifetime of tokens issued by [`TestFleet::token`].
pub const TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

/// A running service over `total` in-process key servers.
pub struct TestFleet<S: PolicyStore + EnvelopeStore + 'static = MemoryStore> {
    pub service: SealService<S>,
    pub fleet: Arc<MemoryFleet<S>>,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<MemoryOracle>,
    servers: Vec<Arc<MemoryKeyServer<S>>>,
}

impl TestFleet<MemoryStore> {
    /// `threshold`-of-`total` fleet over a fresh memory store.
    pub async fn new(total: usize, threshold: usize) -> Result<Self> {
        Self::with_store(MemoryStore::new(), total, threshold).await
    }
}

impl<S: PolicyStore + EnvelopeStore + 'static> TestFleet<S> {
    pub async fn with_store(store: S, total: usize, threshold: usize) -> Result<Self> {
        Self::with_config(store, Self::config(total, threshold)).await
    }

    /// Build and start a service, spawning one server per configured name.
    pub async fn with_config(store: S, config: ServiceConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
        let oracle = Arc::new(MemoryOracle::new());
        let fleet = Arc::new(MemoryFleet::new());
        let names: Vec<ServerId> = config.key_servers.iter().map(|s| s.server_id()).collect();

        let service = SealService::new(
            config,
            Arc::new(store),
            clock.clone() as Arc<dyn Clock>,
            oracle.clone(),
            fleet.clone(),
        );

        let mut servers = Vec::with_capacity(names.len());
        for id in names {
            let (server, _) = fleet.spawn(id, service.engine().clone()).await;
            servers.push(server);
        }
        service.start().await?;

        Ok(Self {
            service,
            fleet,
            clock,
            oracle,
            servers,
        })
    }

    /// Config for `ks-1..=ks-total` with short timeouts.
    pub fn config(total: usize, threshold: usize) -> ServiceConfig {
        ServiceConfig {
            key_servers: (1..=total)
                .map(|i| {
                    let name = format!("ks-{}", i);
                    let endpoint = format!("{}{}", MEMORY_SCHEME, name);
                    KeyServerEndpoint::new(name, endpoint)
                })
                .collect(),
            threshold,
            coordinator: CoordinatorConfig {
                per_server_timeout: Duration::from_millis(500),
                operation_deadline: Duration::from_secs(2),
                over_collect_grace: Duration::from_millis(20),
            },
            ..ServiceConfig::default()
        }
    }

    /// Server at 0-based position `i`.
    pub fn server(&self, i: usize) -> &Arc<MemoryKeyServer<S>> {
        &self.servers[i]
    }

    pub fn servers(&self) -> &[Arc<MemoryKeyServer<S>>] {
        &self.servers
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Share requests served across the fleet.
    pub fn share_requests(&self) -> usize {
        self.servers.iter().map(|s| s.share_requests()).sum()
    }

    /// A token for `keypair` on `policy_id`, valid from now for an hour.
    pub fn token(&self, keypair: &Keypair, policy_id: &PolicyId) -> CapabilityToken {
        CapabilityToken::issue(keypair, policy_id, self.now(), TOKEN_TTL_MS)
    }

    /// Create and activate an allowlist policy for `parties`.
    pub async fn allowlist_policy(&self, parties: &[&Keypair]) -> Result<PolicyId> {
        let addresses: Vec<String> = parties.iter().map(|p| p.identity().to_hex()).collect();
        self.activated("allowlist", json!({ "addresses": addresses })).await
    }

    /// Create and activate a time-lock policy.
    pub async fn timelock_policy(&self, unlock_at: i64) -> Result<PolicyId> {
        self.activated("timelock", json!({ "unlock_time": unlock_at }))
            .await
    }

    /// Create and activate a subscription policy.
    pub async fn subscription_policy(&self, entitlement_ref: &str) -> Result<PolicyId> {
        self.activated("subscription", json!({ "entitlement_ref": entitlement_ref }))
            .await
    }

    async fn activated(&self, kind: &str, params: serde_json::Value) -> Result<PolicyId> {
        let policy = self.service.create_policy(kind, &params).await?;
        self.service.activate_policy(&policy.policy_id).await?;
        Ok(policy.policy_id)
    }
}

/// A deterministic party.
pub fn party(seed: u8) -> Keypair {
    Keypair::from_seed(&[seed; 32])
}

/// Create `count` distinct parties.
pub fn multi_party(count: usize) -> Vec<Keypair> {
    (0..count).map(|i| party(i as u8 + 1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fleet_starts_healthy() {
        let fleet = TestFleet::new(3, 2).await.unwrap();
        let report = fleet.service.health().await;

        assert_eq!(report.servers.len(), 3);
        assert_eq!(report.healthy_count, 3);
        assert!(report.overall_healthy);
        assert_eq!(fleet.servers().len(), 3);
    }

    #[tokio::test]
    async fn test_fixture_round_trip() {
        let fleet = TestFleet::new(3, 2).await.unwrap();
        let alice = party(1);
        let policy = fleet.allowlist_policy(&[&alice]).await.unwrap();

        let envelope = fleet.service.encrypt(b"fixture", &policy).await.unwrap();
        let token = fleet.token(&alice, &policy);
        let plaintext = fleet
            .service
            .decrypt(&envelope, &alice.identity(), &token)
            .await
            .unwrap();

        assert_eq!(plaintext, b"fixture");
    }

    #[test]
    fn test_multi_party() {
        let parties = multi_party(3);
        let ids: Vec<_> = parties.iter().map(|p| p.identity()).collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
    }
}
