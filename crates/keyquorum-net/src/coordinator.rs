//! Quorum coordination: threshold encryption and concurrent share collection.
//!
//! Decryption fans out one request per wrapped share on a [`JoinSet`],
//! races to `threshold` valid shares, waits a short grace period for one
//! extra share, then aborts the rest. At most `threshold + 1` shares are
//! ever collected, which bounds the alternate-subset retry to
//! `threshold + 1` reconstructions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio::time::Instant;

use keyquorum_core::{
    wrap_share, CapabilityToken, CoreError, DataKey, EncryptedEnvelope, EnvelopeCipher, Identity,
    PolicyId, ServerId, Share, ThresholdCodec, WrappedShareEntry, ENVELOPE_VERSION, MAX_SHARES,
};
use keyquorum_policy::{Decision, PolicyEngine};
use keyquorum_store::PolicyStore;

use crate::error::{NetError, Result};
use crate::registry::KeyServerRegistry;
use crate::transport::{KeyServer, ShareResponse};

/// Timing knobs for the decrypt protocol.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on each individual share request.
    pub per_server_timeout: Duration,
    /// Bound on the whole collection phase.
    pub operation_deadline: Duration,
    /// How long to wait for one extra share after reaching the threshold.
    pub over_collect_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            per_server_timeout: Duration::from_secs(10),
            operation_deadline: Duration::from_secs(30),
            over_collect_grace: Duration::from_millis(50),
        }
    }
}

/// Where a decrypt attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptPhase {
    PendingPolicy,
    Denied,
    PolicyOk,
    CollectingShares,
    QuorumTimeout,
    Reconstructing,
    ReconstructionFailed,
    Decrypting,
    IntegrityFailed,
    Succeeded,
}

/// Accounting for one decrypt attempt.
#[derive(Debug, Clone)]
pub struct DecryptReport {
    pub policy_id: PolicyId,
    pub phase: DecryptPhase,
    pub threshold: usize,
    /// Share requests actually sent.
    pub requested: usize,
    pub valid_shares: usize,
    pub denied: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Responses that did not parse as a share.
    pub malformed: usize,
    /// Envelope entries naming a server the registry does not know.
    pub unknown_servers: usize,
    /// Requests still in flight when collection stopped.
    pub aborted: usize,
    /// Reconstruct-and-open attempts made.
    pub subsets_tried: usize,
    pub elapsed: Duration,
}

impl DecryptReport {
    fn new(envelope: &EncryptedEnvelope) -> Self {
        Self {
            policy_id: envelope.policy_id.clone(),
            phase: DecryptPhase::PendingPolicy,
            threshold: envelope.threshold as usize,
            requested: 0,
            valid_shares: 0,
            denied: 0,
            failed: 0,
            timed_out: 0,
            malformed: 0,
            unknown_servers: 0,
            aborted: 0,
            subsets_tried: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Requests that came back with an answer of any kind.
    pub fn responded(&self) -> usize {
        self.valid_shares + self.denied + self.failed + self.malformed
    }
}

/// Running counters, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub keys_generated: u64,
    pub envelopes_sealed: u64,
    pub decrypt_succeeded: u64,
    pub decrypt_failed: u64,
}

#[derive(Default)]
struct Counters {
    keys_generated: AtomicU64,
    envelopes_sealed: AtomicU64,
    decrypt_succeeded: AtomicU64,
    decrypt_failed: AtomicU64,
}

enum ShareOutcome {
    Share(Share),
    Denied(String),
    Failed(String),
    TimedOut,
    Malformed(String),
}

/// Drives encryption to a set of key servers and decryption from them.
pub struct QuorumCoordinator<S: PolicyStore> {
    engine: Arc<PolicyEngine<S>>,
    registry: Arc<KeyServerRegistry>,
    config: CoordinatorConfig,
    counters: Counters,
}

impl<S: PolicyStore> QuorumCoordinator<S> {
    pub fn new(
        engine: Arc<PolicyEngine<S>>,
        registry: Arc<KeyServerRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            keys_generated: self.counters.keys_generated.load(Ordering::Relaxed),
            envelopes_sealed: self.counters.envelopes_sealed.load(Ordering::Relaxed),
            decrypt_succeeded: self.counters.decrypt_succeeded.load(Ordering::Relaxed),
            decrypt_failed: self.counters.decrypt_failed.load(Ordering::Relaxed),
        }
    }

    /// Encrypt `plaintext` under `policy_id` for `total` servers, any
    /// `threshold` of which can release it.
    ///
    /// Policy and server availability are checked before a key exists.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        policy_id: &PolicyId,
        total: usize,
        threshold: usize,
    ) -> Result<EncryptedEnvelope> {
        if threshold == 0 || threshold > total || total > MAX_SHARES {
            return Err(CoreError::InvalidThreshold { threshold, total }.into());
        }

        self.engine.require_active(policy_id).await?;

        if !self.registry.reachable_quorum(threshold).await {
            let available = self.registry.healthy_count().await;
            tracing::warn!(policy_id = %policy_id, threshold, available, "no reachable quorum");
            return Err(NetError::InsufficientKeyServers {
                required: threshold,
                available,
            });
        }
        let servers = self.registry.select_for_encryption(total).await;
        if servers.len() < total {
            tracing::warn!(
                policy_id = %policy_id,
                total,
                available = servers.len(),
                "not enough key servers with cached keys"
            );
            return Err(NetError::InsufficientKeyServers {
                required: total,
                available: servers.len(),
            });
        }

        let key = DataKey::generate();
        self.counters.keys_generated.fetch_add(1, Ordering::Relaxed);
        let shares = ThresholdCodec::split(&key, threshold, total)?;

        let mut wrapped_shares = Vec::with_capacity(total);
        for (share, (server_id, public_key)) in shares.iter().zip(servers) {
            let wrapped = wrap_share(share, &public_key, policy_id, &server_id)?;
            wrapped_shares.push(WrappedShareEntry {
                server_id,
                wrapped_share: Bytes::from(wrapped),
            });
        }

        let aad = EncryptedEnvelope::associated_data(policy_id, threshold as u32, total as u32);
        let sealed = EnvelopeCipher::seal(plaintext, &key, &aad)?;
        drop(key);

        self.counters.envelopes_sealed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(policy_id = %policy_id, threshold, total, bytes = plaintext.len(), "sealed envelope");

        Ok(EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            policy_id: policy_id.clone(),
            nonce: sealed.nonce,
            ciphertext: Bytes::from(sealed.ciphertext),
            tag: sealed.tag,
            wrapped_shares,
            threshold: threshold as u32,
            total_shares: total as u32,
            created_at: self.engine.clock().now_millis(),
        })
    }

    /// Decrypt an envelope on behalf of `identity`.
    pub async fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> Result<Vec<u8>> {
        self.decrypt_with_report(envelope, identity, token).await.0
    }

    /// Decrypt and report how the attempt went, whatever the outcome.
    pub async fn decrypt_with_report(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Identity,
        token: &CapabilityToken,
    ) -> (Result<Vec<u8>>, DecryptReport) {
        let started = Instant::now();
        let mut report = DecryptReport::new(envelope);
        let result = self.run_decrypt(envelope, identity, token, &mut report).await;
        report.elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                self.counters.decrypt_succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    policy_id = %envelope.policy_id,
                    valid = report.valid_shares,
                    requested = report.requested,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "decrypted envelope"
                );
            }
            Err(e) => {
                self.counters.decrypt_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(policy_id = %envelope.policy_id, phase = ?report.phase, error = %e, "decrypt failed");
            }
        }
        (result, report)
    }

    async fn run_decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Identity,
        token: &CapabilityToken,
        report: &mut DecryptReport,
    ) -> Result<Vec<u8>> {
        envelope.validate()?;

        let decision = match self.engine.evaluate(&envelope.policy_id, identity, token).await {
            Ok(decision) => decision,
            Err(e) => {
                report.phase = DecryptPhase::Denied;
                return Err(e.into());
            }
        };
        if let Decision::Deny(reason) = decision {
            report.phase = DecryptPhase::Denied;
            return Err(NetError::AccessDenied(reason));
        }
        report.phase = DecryptPhase::PolicyOk;

        let shares = self.collect_shares(envelope, token, report).await;
        let threshold = envelope.threshold as usize;
        if shares.len() < threshold {
            report.phase = DecryptPhase::QuorumTimeout;
            return Err(NetError::QuorumTimeout {
                collected: shares.len(),
                threshold,
                responded: report.responded(),
                total: envelope.wrapped_shares.len(),
            });
        }

        self.reconstruct_and_open(envelope, &shares, report)
    }

    async fn collect_shares(
        &self,
        envelope: &EncryptedEnvelope,
        token: &CapabilityToken,
        report: &mut DecryptReport,
    ) -> Vec<Share> {
        report.phase = DecryptPhase::CollectingShares;
        let threshold = envelope.threshold as usize;
        let ids: Vec<ServerId> = envelope.wrapped_shares.iter().map(|e| e.server_id.clone()).collect();
        let clients = self.registry.clients_for(&ids).await;

        let mut tasks: JoinSet<(ServerId, u8, ShareOutcome)> = JoinSet::new();
        for (position, (entry, (server_id, client))) in
            envelope.wrapped_shares.iter().zip(clients).enumerate()
        {
            let Some(client) = client else {
                tracing::warn!(server_id = %server_id, "envelope names unknown key server");
                report.unknown_servers += 1;
                continue;
            };
            let policy_id = envelope.policy_id.clone();
            let wrapped = entry.wrapped_share.clone();
            let token = token.clone();
            let timeout = self.config.per_server_timeout;
            // Slot i was issued x-coordinate i + 1; validate() caps total shares at 255.
            let expected_index = (position + 1) as u8;
            tasks.spawn(async move {
                let outcome = request_one(client, &policy_id, &wrapped, &token, timeout).await;
                (server_id, expected_index, outcome)
            });
            report.requested += 1;
        }

        let deadline = Instant::now() + self.config.operation_deadline;
        let mut grace_until: Option<Instant> = None;
        let mut shares: Vec<Share> = Vec::with_capacity(threshold + 1);

        loop {
            let wait_until = grace_until.map_or(deadline, |g| g.min(deadline));
            let joined = match tokio::time::timeout_at(wait_until, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    if shares.len() < threshold {
                        tracing::warn!(policy_id = %envelope.policy_id, collected = shares.len(), threshold, "operation deadline elapsed");
                    }
                    break;
                }
            };

            let (server_id, expected_index, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "share request task failed");
                    report.failed += 1;
                    continue;
                }
            };

            match outcome {
                ShareOutcome::Share(share) => {
                    if share.index != expected_index {
                        tracing::warn!(
                            server_id = %server_id,
                            index = share.index,
                            expected = expected_index,
                            "share index does not match its slot"
                        );
                        report.malformed += 1;
                        continue;
                    }
                    if shares.iter().any(|s| s.index == share.index) {
                        tracing::warn!(server_id = %server_id, index = share.index, "duplicate share index");
                        report.malformed += 1;
                        continue;
                    }
                    report.valid_shares += 1;
                    shares.push(share);
                }
                ShareOutcome::Denied(reason) => {
                    tracing::warn!(server_id = %server_id, reason = %reason, "key server denied share");
                    report.denied += 1;
                }
                ShareOutcome::Failed(reason) => {
                    tracing::warn!(server_id = %server_id, reason = %reason, "share request failed");
                    report.failed += 1;
                }
                ShareOutcome::TimedOut => {
                    tracing::warn!(server_id = %server_id, "share request timed out");
                    report.timed_out += 1;
                }
                ShareOutcome::Malformed(reason) => {
                    tracing::warn!(server_id = %server_id, reason = %reason, "key server returned garbled share");
                    report.malformed += 1;
                }
            }

            if shares.len() > threshold {
                break;
            }
            if shares.len() == threshold && grace_until.is_none() {
                grace_until = Some(Instant::now() + self.config.over_collect_grace);
            }
        }

        report.aborted = tasks.len();
        tasks.abort_all();
        shares
    }

    fn reconstruct_and_open(
        &self,
        envelope: &EncryptedEnvelope,
        shares: &[Share],
        report: &mut DecryptReport,
    ) -> Result<Vec<u8>> {
        let threshold = envelope.threshold as usize;
        report.phase = DecryptPhase::Reconstructing;

        report.subsets_tried += 1;
        let first = match ThresholdCodec::reconstruct(&shares[..threshold], threshold) {
            Ok(key) => {
                report.phase = DecryptPhase::Decrypting;
                envelope.open(&key)
            }
            Err(e) => Err(e),
        };

        match first {
            Ok(plaintext) => {
                report.phase = DecryptPhase::Succeeded;
                return Ok(plaintext);
            }
            Err(CoreError::IntegrityError) if shares.len() == threshold => {
                report.phase = DecryptPhase::IntegrityFailed;
                return Err(NetError::IntegrityError);
            }
            Err(CoreError::IntegrityError) => {}
            Err(e) => {
                report.phase = DecryptPhase::ReconstructionFailed;
                return Err(NetError::ShareReconstructionFailure(e.to_string()));
            }
        }

        // One share was bad. Each alternative subset leaves out one of the
        // shares used in the first attempt.
        tracing::warn!(policy_id = %envelope.policy_id, "integrity failure, retrying with alternate share subsets");
        for skip in (0..threshold).rev() {
            let subset: Vec<Share> = shares
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, s)| s.clone())
                .collect();
            report.subsets_tried += 1;
            report.phase = DecryptPhase::Reconstructing;
            let Ok(key) = ThresholdCodec::reconstruct(&subset, threshold) else {
                continue;
            };
            report.phase = DecryptPhase::Decrypting;
            if let Ok(plaintext) = envelope.open(&key) {
                report.phase = DecryptPhase::Succeeded;
                return Ok(plaintext);
            }
        }

        report.phase = DecryptPhase::ReconstructionFailed;
        Err(NetError::ShareReconstructionFailure(format!(
            "no {}-subset of {} shares opened the envelope",
            threshold,
            shares.len()
        )))
    }
}

async fn request_one(
    client: Arc<dyn KeyServer>,
    policy_id: &PolicyId,
    wrapped: &Bytes,
    token: &CapabilityToken,
    timeout: Duration,
) -> ShareOutcome {
    match tokio::time::timeout(timeout, client.request_share(policy_id, wrapped, token)).await {
        Err(_) => ShareOutcome::TimedOut,
        Ok(Err(e)) => ShareOutcome::Failed(e.to_string()),
        Ok(Ok(ShareResponse::Denied(reason))) => ShareOutcome::Denied(reason),
        Ok(Ok(ShareResponse::Share(bytes))) => match Share::from_bytes(&bytes) {
            Ok(share) => ShareOutcome::Share(share),
            Err(e) => ShareOutcome::Malformed(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::transport::memory::{MemoryFleet, MemoryKeyServer};
    use crate::transport::KeyServerConnector;
    use async_trait::async_trait;
    use keyquorum_core::X25519PublicKey;
    use keyquorum_core::{Keypair, ManualClock, PolicyKind};
    use keyquorum_policy::{DenyReason, MemoryOracle, PolicyError};
    use keyquorum_store::MemoryStore;
    use serde_json::json;

    const T0: i64 = 1_790_000_000_000;

    struct Harness {
        engine: Arc<PolicyEngine<MemoryStore>>,
        registry: Arc<KeyServerRegistry>,
        coordinator: QuorumCoordinator<MemoryStore>,
        servers: Vec<Arc<MemoryKeyServer<MemoryStore>>>,
        alice: Keypair,
        policy_id: PolicyId,
    }

    impl Harness {
        fn token(&self) -> CapabilityToken {
            CapabilityToken::issue(&self.alice, &self.policy_id, T0, 3_600_000)
        }

        async fn decrypt(&self, envelope: &EncryptedEnvelope) -> (Result<Vec<u8>>, DecryptReport) {
            self.coordinator
                .decrypt_with_report(envelope, &self.alice.identity(), &self.token())
                .await
        }

        fn share_requests(&self) -> usize {
            self.servers.iter().map(|s| s.share_requests()).sum()
        }
    }

    /// Answers with a share under `index` whatever slot it was asked for.
    struct IndexForger {
        inner: Arc<dyn KeyServer>,
        index: u8,
    }

    #[async_trait]
    impl KeyServer for IndexForger {
        fn server_id(&self) -> &ServerId {
            self.inner.server_id()
        }

        async fn get_public_key(&self) -> Result<X25519PublicKey> {
            self.inner.get_public_key().await
        }

        async fn request_share(
            &self,
            policy_id: &PolicyId,
            wrapped_share: &[u8],
            token: &CapabilityToken,
        ) -> Result<ShareResponse> {
            match self.inner.request_share(policy_id, wrapped_share, token).await? {
                ShareResponse::Share(bytes) => {
                    let mut forged = bytes.to_vec();
                    forged[0] = self.index;
                    Ok(ShareResponse::Share(Bytes::from(forged)))
                }
                other => Ok(other),
            }
        }

        async fn health(&self) -> Result<bool> {
            self.inner.health().await
        }
    }

    struct TestConnector {
        fleet: Arc<MemoryFleet<MemoryStore>>,
        forged: Option<(ServerId, u8)>,
    }

    #[async_trait]
    impl KeyServerConnector for TestConnector {
        async fn connect(&self, server_id: &ServerId, endpoint: &str) -> Result<Arc<dyn KeyServer>> {
            let client = self.fleet.connect(server_id, endpoint).await?;
            match &self.forged {
                Some((target, index)) if target == server_id => Ok(Arc::new(IndexForger {
                    inner: client,
                    index: *index,
                })),
                _ => Ok(client),
            }
        }
    }

    async fn harness(n: usize, config: CoordinatorConfig) -> Harness {
        harness_with_forger(n, config, None).await
    }

    async fn harness_with_forger(
        n: usize,
        config: CoordinatorConfig,
        forged: Option<(ServerId, u8)>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = Arc::new(PolicyEngine::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(MemoryOracle::new()),
        ));
        let fleet = Arc::new(MemoryFleet::new());
        let connector = Arc::new(TestConnector {
            fleet: fleet.clone(),
            forged,
        });
        let registry = Arc::new(KeyServerRegistry::new(
            connector,
            clock,
            RegistryConfig::default(),
        ));

        let mut servers = Vec::new();
        for i in 1..=n {
            let id = ServerId::new(format!("ks-{}", i));
            let (server, endpoint) = fleet.spawn(id.clone(), engine.clone()).await;
            registry.register(id, endpoint).await.unwrap();
            servers.push(server);
        }
        registry.refresh_all_keys().await;
        registry.probe_all(1).await;

        let alice = Keypair::generate();
        let policy = engine
            .create(PolicyKind::Allowlist, &json!({ "addresses": [alice.identity().to_hex()] }))
            .await
            .unwrap();
        engine.activate(&policy.policy_id).await.unwrap();

        let coordinator = QuorumCoordinator::new(engine.clone(), registry.clone(), config);
        Harness {
            engine,
            registry,
            coordinator,
            servers,
            alice,
            policy_id: policy.policy_id,
        }
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            per_server_timeout: Duration::from_millis(200),
            operation_deadline: Duration::from_millis(500),
            over_collect_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_all_shapes() {
        let h = harness(5, fast_config()).await;
        for total in 1..=5usize {
            for threshold in 1..=total {
                let plaintext = format!("payload {}-of-{}", threshold, total).into_bytes();
                let envelope = h
                    .coordinator
                    .encrypt(&plaintext, &h.policy_id, total, threshold)
                    .await
                    .unwrap();
                assert_eq!(envelope.wrapped_shares.len(), total);
                let (result, report) = h.decrypt(&envelope).await;
                assert_eq!(result.unwrap(), plaintext);
                assert_eq!(report.phase, DecryptPhase::Succeeded);
            }
        }
    }

    #[tokio::test]
    async fn test_empty_plaintext() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"", &h.policy_id, 3, 2).await.unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(h.decrypt(&envelope).await.0.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected() {
        let h = harness(3, fast_config()).await;
        for (total, threshold) in [(3, 0), (2, 3), (256, 2)] {
            assert!(matches!(
                h.coordinator.encrypt(b"x", &h.policy_id, total, threshold).await,
                Err(NetError::Core(CoreError::InvalidThreshold { .. }))
            ));
        }
        assert_eq!(h.coordinator.stats().keys_generated, 0);
    }

    #[tokio::test]
    async fn test_preflight_rejects_before_key_generation() {
        let h = harness(3, fast_config()).await;
        h.servers[1].set_down(true);
        h.servers[2].set_down(true);
        h.registry.probe_all(2).await;

        let result = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await;
        assert!(matches!(
            result,
            Err(NetError::InsufficientKeyServers { required: 2, available: 1 })
        ));

        // Quorum reachable but one server lacks a cached key.
        h.servers[1].set_down(false);
        h.registry.probe_all(2).await;
        let record = h.registry.snapshot().await.remove(2);
        h.registry.deregister(&record.server_id).await;
        h.registry.register(record.server_id, record.endpoint).await.unwrap();
        let result = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await;
        assert!(matches!(
            result,
            Err(NetError::InsufficientKeyServers { required: 3, available: 2 })
        ));
        assert_eq!(h.coordinator.stats().keys_generated, 0);
        assert_eq!(h.share_requests(), 0);
    }

    #[tokio::test]
    async fn test_encrypt_with_one_server_down_uses_cached_key() {
        let h = harness(3, fast_config()).await;
        h.servers[2].set_down(true);
        let health = h.registry.probe_all(2).await;
        assert_eq!(health.healthy_count, 2);
        assert!(health.overall_healthy);

        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        assert_eq!(envelope.wrapped_shares.len(), 3);
        assert_eq!(envelope.wrapped_shares[2].server_id, ServerId::from("ks-3"));

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"secret");
        assert_eq!(report.valid_shares, 2);
        assert_eq!(report.failed, 1);

        h.servers[2].set_down(false);
        assert_eq!(h.decrypt(&envelope).await.0.unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_encrypt_requires_active_policy() {
        let h = harness(3, fast_config()).await;
        let created = h
            .engine
            .create(PolicyKind::Timelock, &json!({ "unlock_time": T0 + 1_000 }))
            .await
            .unwrap();
        assert!(matches!(
            h.coordinator.encrypt(b"x", &created.policy_id, 3, 2).await,
            Err(NetError::Policy(PolicyError::NotActive(_)))
        ));

        h.engine.revoke(&h.policy_id).await.unwrap();
        assert!(matches!(
            h.coordinator.encrypt(b"x", &h.policy_id, 3, 2).await,
            Err(NetError::Policy(PolicyError::Revoked(_)))
        ));
        assert!(matches!(
            h.coordinator.encrypt(b"x", &PolicyId::from("missing"), 3, 2).await,
            Err(NetError::Policy(PolicyError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_denied_requester_makes_no_server_calls() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();

        let mallory = Keypair::generate();
        let token = CapabilityToken::issue(&mallory, &h.policy_id, T0, 60_000);
        let (result, report) = h
            .coordinator
            .decrypt_with_report(&envelope, &mallory.identity(), &token)
            .await;
        assert!(matches!(result, Err(NetError::AccessDenied(DenyReason::NotAllowlisted))));
        assert_eq!(report.phase, DecryptPhase::Denied);
        assert_eq!(report.requested, 0);
        assert_eq!(h.share_requests(), 0);
    }

    #[tokio::test]
    async fn test_revoked_policy_blocks_decrypt() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.engine.revoke(&h.policy_id).await.unwrap();

        let (result, report) = h.decrypt(&envelope).await;
        assert!(matches!(result, Err(NetError::Policy(PolicyError::Revoked(_)))));
        assert_eq!(report.phase, DecryptPhase::Denied);
        assert_eq!(h.share_requests(), 0);
    }

    #[tokio::test]
    async fn test_partial_outage_tolerated() {
        let h = harness(5, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"resilient", &h.policy_id, 5, 3).await.unwrap();
        h.servers[0].set_down(true);
        h.servers[3].set_deny_all(true);

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"resilient");
        assert_eq!(report.requested, 5);
        assert_eq!(report.failed, 1);
        assert_eq!(report.denied, 1);
        assert_eq!(report.valid_shares, 3);
    }

    #[tokio::test]
    async fn test_too_many_failures_is_quorum_timeout() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.servers[0].set_down(true);
        h.servers[1].set_deny_all(true);

        let (result, report) = h.decrypt(&envelope).await;
        assert!(matches!(
            result,
            Err(NetError::QuorumTimeout { collected: 1, threshold: 2, responded: 3, total: 3 })
        ));
        assert_eq!(report.phase, DecryptPhase::QuorumTimeout);
    }

    #[tokio::test]
    async fn test_slow_servers_hit_deadline() {
        let config = CoordinatorConfig {
            per_server_timeout: Duration::from_secs(5),
            operation_deadline: Duration::from_millis(100),
            over_collect_grace: Duration::from_millis(10),
        };
        let h = harness(3, config).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        for server in &h.servers[1..] {
            server.set_delay(Duration::from_secs(2));
        }

        let started = std::time::Instant::now();
        let (result, report) = h.decrypt(&envelope).await;
        assert!(matches!(result, Err(NetError::QuorumTimeout { collected: 1, .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.aborted, 2);
    }

    #[tokio::test]
    async fn test_per_server_timeout_absorbed() {
        let config = CoordinatorConfig {
            per_server_timeout: Duration::from_millis(50),
            operation_deadline: Duration::from_secs(2),
            over_collect_grace: Duration::from_millis(10),
        };
        let h = harness(3, config).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.servers[2].set_delay(Duration::from_secs(1));

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"secret");
        assert_eq!(report.valid_shares, 2);
    }

    #[tokio::test]
    async fn test_corrupted_share_recovered_with_extra_responder() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.servers[0].set_corrupt(true);

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"secret");
        assert_eq!(report.valid_shares, 3);
        assert_eq!(report.phase, DecryptPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_corrupted_share_with_exact_threshold_is_integrity_error() {
        let h = harness(2, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 2, 2).await.unwrap();
        h.servers[1].set_corrupt(true);

        let (result, report) = h.decrypt(&envelope).await;
        assert!(matches!(result, Err(NetError::IntegrityError)));
        assert_eq!(report.phase, DecryptPhase::IntegrityFailed);
    }

    #[tokio::test]
    async fn test_share_under_foreign_index_is_malformed() {
        let h = harness_with_forger(3, fast_config(), Some((ServerId::from("ks-1"), 2))).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.servers[1].set_delay(Duration::from_millis(30));
        h.servers[2].set_delay(Duration::from_millis(60));

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"secret");
        assert_eq!(report.malformed, 1);
        assert_eq!(report.valid_shares, 2);
        assert_eq!(report.phase, DecryptPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_two_corrupt_shares_fail_reconstruction() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.servers[0].set_corrupt(true);
        h.servers[1].set_corrupt(true);

        let (result, report) = h.decrypt(&envelope).await;
        assert!(matches!(result, Err(NetError::ShareReconstructionFailure(_))));
        assert_eq!(report.phase, DecryptPhase::ReconstructionFailed);
        assert_eq!(report.subsets_tried, 3);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_detected() {
        let h = harness(2, fast_config()).await;
        let mut envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 2, 2).await.unwrap();
        let mut bytes = envelope.ciphertext.to_vec();
        bytes[0] ^= 0x80;
        envelope.ciphertext = Bytes::from(bytes);

        assert!(matches!(h.decrypt(&envelope).await.0, Err(NetError::IntegrityError)));
    }

    #[tokio::test]
    async fn test_unknown_server_in_envelope() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.registry.deregister(&ServerId::from("ks-1")).await;

        let (result, report) = h.decrypt(&envelope).await;
        assert_eq!(result.unwrap(), b"secret");
        assert_eq!(report.unknown_servers, 1);
        assert_eq!(report.requested, 2);
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let h = harness(3, fast_config()).await;
        let envelope = h.coordinator.encrypt(b"secret", &h.policy_id, 3, 2).await.unwrap();
        h.decrypt(&envelope).await.0.unwrap();
        h.engine.revoke(&h.policy_id).await.unwrap();
        assert!(h.decrypt(&envelope).await.0.is_err());

        let stats = h.coordinator.stats();
        assert_eq!(stats.keys_generated, 1);
        assert_eq!(stats.envelopes_sealed, 1);
        assert_eq!(stats.decrypt_succeeded, 1);
        assert_eq!(stats.decrypt_failed, 1);
    }
}
