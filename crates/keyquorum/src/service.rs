//! The seal service: one handle over policies, key servers and envelopes.

use std::sync::Arc;

use serde_json::Value;

use keyquorum_core::{
    AccessPolicy, CapabilityToken, Clock, EncryptedEnvelope, EnvelopeId, Identity, PolicyId,
    PolicyKind,
};
use keyquorum_net::{
    DecryptReport, HealthReport, KeyServerConnector, KeyServerRegistry, QuorumCoordinator,
};
use keyquorum_policy::{Decision, EntitlementOracle, PolicyEngine, PolicyError};
use keyquorum_store::{EnvelopeStore, PolicyStore};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

/// Threshold encryption with policy-gated key release.
///
/// Owns its registry; nothing is global. Create policies, activate them,
/// encrypt under them, and decrypt with a capability token.
pub struct SealService<S: PolicyStore + EnvelopeStore + 'static> {
    config: ServiceConfig,
    store: Arc<S>,
    engine: Arc<PolicyEngine<S>>,
    registry: Arc<KeyServerRegistry>,
    coordinator: QuorumCoordinator<S>,
}

impl<S: PolicyStore + EnvelopeStore + 'static> SealService<S> {
    pub fn new(
        config: ServiceConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn EntitlementOracle>,
        connector: Arc<dyn KeyServerConnector>,
    ) -> Self {
        let engine = Arc::new(PolicyEngine::new(store.clone(), clock.clone(), oracle));
        let registry = Arc::new(KeyServerRegistry::new(
            connector,
            clock,
            config.registry.clone(),
        ));
        let coordinator =
            QuorumCoordinator::new(engine.clone(), registry.clone(), config.coordinator.clone());
        Self {
            config,
            store,
            engine,
            registry,
            coordinator,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<PolicyEngine<S>> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<KeyServerRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &QuorumCoordinator<S> {
        &self.coordinator
    }

    /// Register the configured servers, fetch their keys and probe them.
    ///
    /// Servers whose endpoint cannot be resolved are skipped. Servers that
    /// resolve but do not answer stay registered and show as unhealthy.
    pub async fn start(&self) -> Result<HealthReport> {
        self.config.validate()?;
        for server in &self.config.key_servers {
            if let Err(e) = self
                .registry
                .register(server.server_id(), server.endpoint.clone())
                .await
            {
                tracing::warn!(server = %server.name, error = %e, "failed to register key server");
            }
        }
        let keys = self.registry.refresh_all_keys().await;
        let report = self.health().await;
        tracing::info!(
            servers = report.servers.len(),
            keys,
            healthy = report.healthy_count,
            threshold = report.threshold,
            "seal service started"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a policy of `kind` (`allowlist`, `timelock`, `subscription`).
    pub async fn create_policy(&self, kind: &str, params: &Value) -> Result<AccessPolicy> {
        let kind = PolicyKind::parse(kind).ok_or_else(|| {
            PolicyError::Validation(format!("unknown policy kind {:?}", kind))
        })?;
        Ok(self.engine.create(kind, params).await?)
    }

    pub async fn activate_policy(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        Ok(self.engine.activate(policy_id).await?)
    }

    /// Revoke a policy, optionally recording why.
    pub async fn revoke_policy(
        &self,
        policy_id: &PolicyId,
        reason: Option<&str>,
    ) -> Result<AccessPolicy> {
        let policy = match reason {
            Some(reason) => self.engine.revoke_with_reason(policy_id, reason).await?,
            None => self.engine.revoke(policy_id).await?,
        };
        Ok(policy)
    }

    pub async fn get_policy(&self, policy_id: &PolicyId) -> Result<AccessPolicy> {
        Ok(self.engine.get(policy_id).await?)
    }

    pub async fn list_policies(&self) -> Result<Vec<AccessPolicy>> {
        Ok(self.engine.list().await?)
    }

    pub async fn verify_access(
        &self,
        policy_id: &PolicyId,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<bool> {
        Ok(self.engine.verify_access(policy_id, identity, token).await?)
    }

    /// Full decision, including the deny reason.
    pub async fn evaluate(
        &self,
        policy_id: &PolicyId,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<Decision> {
        Ok(self.engine.evaluate(policy_id, identity, token).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Envelopes
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt with the configured threshold across all configured servers.
    pub async fn encrypt(&self, plaintext: &[u8], policy_id: &PolicyId) -> Result<EncryptedEnvelope> {
        self.encrypt_with(plaintext, policy_id, self.config.total_shares(), self.config.threshold)
            .await
    }

    /// Encrypt with explicit quorum parameters.
    pub async fn encrypt_with(
        &self,
        plaintext: &[u8],
        policy_id: &PolicyId,
        total: usize,
        threshold: usize,
    ) -> Result<EncryptedEnvelope> {
        Ok(self
            .coordinator
            .encrypt(plaintext, policy_id, total, threshold)
            .await?)
    }

    pub async fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<Vec<u8>> {
        Ok(self.coordinator.decrypt(envelope, identity, token).await?)
    }

    pub async fn decrypt_with_report(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> (Result<Vec<u8>>, DecryptReport) {
        let (result, report) = self
            .coordinator
            .decrypt_with_report(envelope, identity, token)
            .await;
        (result.map_err(ServiceError::from), report)
    }

    /// Encrypt and persist; returns the envelope's content address.
    pub async fn encrypt_and_store(&self, plaintext: &[u8], policy_id: &PolicyId) -> Result<EnvelopeId> {
        let envelope = self.encrypt(plaintext, policy_id).await?;
        let id = self.store.put_envelope(&envelope).await?;
        tracing::debug!(envelope_id = %id, policy_id = %policy_id, "stored envelope");
        Ok(id)
    }

    pub async fn get_envelope(&self, envelope_id: &EnvelopeId) -> Result<EncryptedEnvelope> {
        self.store
            .get_envelope(envelope_id)
            .await?
            .ok_or(ServiceError::EnvelopeNotFound(*envelope_id))
    }

    /// Load a stored envelope and decrypt it.
    pub async fn decrypt_stored(
        &self,
        envelope_id: &EnvelopeId,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<Vec<u8>> {
        let envelope = self.get_envelope(envelope_id).await?;
        self.decrypt(&envelope, identity, token).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Probe every key server and report against the configured threshold.
    pub async fn health(&self) -> HealthReport {
        self.registry.probe_all(self.config.threshold).await
    }
}
