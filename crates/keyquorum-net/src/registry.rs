//! Registry of key servers: endpoints, cached public keys, health.
//!
//! Records are replaced whole under a `tokio::sync::RwLock`. Network calls
//! happen with the lock released; only the resulting record update takes
//! the write lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use keyquorum_core::{Clock, ServerId, X25519PublicKey};

use crate::error::{NetError, Result};
use crate::transport::{KeyServer, KeyServerConnector};

/// Timeouts for registry calls.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Bound on fetching a public key.
    pub key_fetch_timeout: Duration,
    /// Bound on a health probe.
    pub health_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key_fetch_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// What the registry knows about one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyServerRecord {
    pub server_id: ServerId,
    pub endpoint: String,
    pub public_key: Option<X25519PublicKey>,
    /// Result of the last probe; `None` until probed.
    pub last_health: Option<bool>,
    /// Unix milliseconds of the last probe.
    pub last_checked_at: Option<i64>,
}

impl KeyServerRecord {
    pub fn is_healthy(&self) -> bool {
        self.last_health == Some(true)
    }
}

/// One server's line in a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerHealth {
    pub server_id: ServerId,
    pub endpoint: String,
    pub healthy: bool,
    pub has_public_key: bool,
    pub last_checked_at: Option<i64>,
}

/// Fleet health summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub servers: Vec<ServerHealth>,
    pub healthy_count: usize,
    pub threshold: usize,
    pub overall_healthy: bool,
}

struct Entry {
    record: KeyServerRecord,
    client: Arc<dyn KeyServer>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<ServerId, Entry>,
    /// Registration order.
    order: Vec<ServerId>,
}

impl RegistryState {
    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }
}

/// Caller-owned registry of key servers.
pub struct KeyServerRegistry {
    connector: Arc<dyn KeyServerConnector>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    state: RwLock<RegistryState>,
}

impl KeyServerRegistry {
    pub fn new(
        connector: Arc<dyn KeyServerConnector>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            connector,
            clock,
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Register a server. Re-registering replaces the endpoint and keeps the
    /// cached key and health.
    pub async fn register(&self, server_id: ServerId, endpoint: impl Into<String>) -> Result<()> {
        let endpoint = endpoint.into();
        let client = self.connector.connect(&server_id, &endpoint).await?;

        let mut state = self.state.write().await;
        match state.entries.get_mut(&server_id) {
            Some(entry) => {
                entry.record.endpoint = endpoint;
                entry.client = client;
                tracing::info!(server_id = %server_id, "re-registered key server");
            }
            None => {
                let record = KeyServerRecord {
                    server_id: server_id.clone(),
                    endpoint,
                    public_key: None,
                    last_health: None,
                    last_checked_at: None,
                };
                state.order.push(server_id.clone());
                state.entries.insert(server_id.clone(), Entry { record, client });
                tracing::info!(server_id = %server_id, "registered key server");
            }
        }
        Ok(())
    }

    /// Remove a server. Returns whether it was registered.
    pub async fn deregister(&self, server_id: &ServerId) -> bool {
        let mut state = self.state.write().await;
        let removed = state.entries.remove(server_id).is_some();
        state.order.retain(|id| id != server_id);
        if removed {
            tracing::info!(server_id = %server_id, "deregistered key server");
        }
        removed
    }

    async fn client(&self, server_id: &ServerId) -> Result<Arc<dyn KeyServer>> {
        self.state
            .read()
            .await
            .entries
            .get(server_id)
            .map(|e| e.client.clone())
            .ok_or_else(|| NetError::UnknownServer(server_id.clone()))
    }

    /// Clients for the given servers; `None` for ids that are not registered.
    pub async fn clients_for(&self, ids: &[ServerId]) -> Vec<(ServerId, Option<Arc<dyn KeyServer>>)> {
        let state = self.state.read().await;
        ids.iter()
            .map(|id| (id.clone(), state.entries.get(id).map(|e| e.client.clone())))
            .collect()
    }

    /// Fetch and cache the server's public key. On failure the previously
    /// cached key is kept.
    pub async fn refresh_public_key(&self, server_id: &ServerId) -> Result<X25519PublicKey> {
        let client = self.client(server_id).await?;

        let fetched = tokio::time::timeout(self.config.key_fetch_timeout, client.get_public_key()).await;
        let key = match fetched {
            Ok(Ok(key)) => key,
            Ok(Err(e)) => {
                tracing::warn!(server_id = %server_id, error = %e, "public key fetch failed");
                return Err(NetError::KeyServerUnreachable {
                    server_id: server_id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(server_id = %server_id, "public key fetch timed out");
                return Err(NetError::KeyServerUnreachable {
                    server_id: server_id.clone(),
                    reason: format!("timed out after {:?}", self.config.key_fetch_timeout),
                });
            }
        };

        if let Some(entry) = self.state.write().await.entries.get_mut(server_id) {
            entry.record.public_key = Some(key);
        }
        tracing::debug!(server_id = %server_id, "cached public key");
        Ok(key)
    }

    /// Refresh every server's key; failures are logged and skipped.
    /// Returns how many keys are now fresh.
    pub async fn refresh_all_keys(&self) -> usize {
        let ids: Vec<ServerId> = self.state.read().await.order.clone();
        let mut refreshed = 0;
        for id in &ids {
            if self.refresh_public_key(id).await.is_ok() {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Probe one server and record the result.
    pub async fn probe_health(&self, server_id: &ServerId) -> Result<bool> {
        let client = self.client(server_id).await?;
        let healthy = probe(client, self.config.health_timeout).await;
        self.record_health(server_id, healthy).await;
        Ok(healthy)
    }

    /// Probe all servers concurrently and summarize.
    pub async fn probe_all(&self, threshold: usize) -> HealthReport {
        let targets: Vec<(ServerId, Arc<dyn KeyServer>)> = {
            let state = self.state.read().await;
            state
                .ordered()
                .map(|e| (e.record.server_id.clone(), e.client.clone()))
                .collect()
        };

        let mut probes = JoinSet::new();
        for (id, client) in targets {
            let timeout = self.config.health_timeout;
            probes.spawn(async move { (id, probe(client, timeout).await) });
        }
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, healthy)) => self.record_health(&id, healthy).await,
                Err(e) => tracing::warn!(error = %e, "health probe task failed"),
            }
        }

        self.health_report(threshold).await
    }

    /// Summary from the last recorded probes, without probing.
    pub async fn health_report(&self, threshold: usize) -> HealthReport {
        let state = self.state.read().await;
        let servers: Vec<ServerHealth> = state
            .ordered()
            .map(|e| ServerHealth {
                server_id: e.record.server_id.clone(),
                endpoint: e.record.endpoint.clone(),
                healthy: e.record.is_healthy(),
                has_public_key: e.record.public_key.is_some(),
                last_checked_at: e.record.last_checked_at,
            })
            .collect();
        let healthy_count = servers.iter().filter(|s| s.healthy).count();
        HealthReport {
            servers,
            healthy_count,
            threshold,
            overall_healthy: threshold > 0 && healthy_count >= threshold,
        }
    }

    async fn record_health(&self, server_id: &ServerId, healthy: bool) {
        let now = self.clock.now_millis();
        if let Some(entry) = self.state.write().await.entries.get_mut(server_id) {
            entry.record.last_health = Some(healthy);
            entry.record.last_checked_at = Some(now);
        }
        if !healthy {
            tracing::warn!(server_id = %server_id, "key server unhealthy");
        }
    }

    /// Whether at least `threshold` servers were healthy at their last probe.
    pub async fn reachable_quorum(&self, threshold: usize) -> bool {
        self.healthy_count().await >= threshold
    }

    pub async fn healthy_count(&self) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.record.is_healthy())
            .count()
    }

    /// The first `n` servers with cached keys, in registration order.
    /// Last observed health is ignored: wrapping needs only the key.
    /// May return fewer than `n`.
    pub async fn select_for_encryption(&self, n: usize) -> Vec<(ServerId, X25519PublicKey)> {
        let state = self.state.read().await;
        state
            .ordered()
            .filter_map(|e| e.record.public_key.map(|k| (e.record.server_id.clone(), k)))
            .take(n)
            .collect()
    }

    /// Consistent copy of all records, in registration order.
    pub async fn snapshot(&self) -> Vec<KeyServerRecord> {
        let state = self.state.read().await;
        state.ordered().map(|e| e.record.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn probe(client: Arc<dyn KeyServer>, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, client.health()).await, Ok(Ok(true)))
}
