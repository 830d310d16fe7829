//! Key server contract.
//!
//! A key server holds one X25519 secret, re-checks the policy on every
//! request, and returns the raw share it unwrapped. How requests travel
//! (HTTP, gRPC, in-process) is up to the [`KeyServerConnector`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use keyquorum_core::{CapabilityToken, PolicyId, ServerId, X25519PublicKey};

use crate::error::Result;

/// A key server's answer to a share request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareResponse {
    /// The unwrapped share, `index || value`.
    Share(Bytes),
    /// The server's own policy check refused the request.
    Denied(String),
}

/// Client handle for one key server.
#[async_trait]
pub trait KeyServer: Send + Sync {
    fn server_id(&self) -> &ServerId;

    /// The server's X25519 public key.
    async fn get_public_key(&self) -> Result<X25519PublicKey>;

    /// Ask the server to unwrap `wrapped_share` for the token's holder.
    async fn request_share(
        &self,
        policy_id: &PolicyId,
        wrapped_share: &[u8],
        token: &CapabilityToken,
    ) -> Result<ShareResponse>;

    /// Liveness check.
    async fn health(&self) -> Result<bool>;
}

/// Resolves an endpoint string to a key server client.
#[async_trait]
pub trait KeyServerConnector: Send + Sync {
    async fn connect(&self, server_id: &ServerId, endpoint: &str) -> Result<Arc<dyn KeyServer>>;
}

/// In-process key servers for tests and local deployments.
///
/// Each server evaluates the policy itself through a shared engine, so a
/// revocation is seen by the fleet immediately.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::RwLock;

    use keyquorum_core::{unwrap_share, X25519StaticSecret};
    use keyquorum_policy::{Decision, PolicyEngine, PolicyError};
    use keyquorum_store::PolicyStore;

    use crate::error::NetError;

    /// Endpoint scheme understood by [`MemoryFleet`].
    pub const MEMORY_SCHEME: &str = "memory://";

    #[derive(Debug, Default)]
    struct Faults {
        down: AtomicBool,
        delay_ms: AtomicU64,
        deny_all: AtomicBool,
        corrupt: AtomicBool,
    }

    /// A simulated key server.
    pub struct MemoryKeyServer<S: PolicyStore> {
        server_id: ServerId,
        secret: X25519StaticSecret,
        engine: Arc<PolicyEngine<S>>,
        faults: Faults,
        share_requests: AtomicUsize,
        key_requests: AtomicUsize,
    }

    impl<S: PolicyStore> MemoryKeyServer<S> {
        pub fn new(server_id: ServerId, engine: Arc<PolicyEngine<S>>) -> Self {
            Self::with_secret(server_id, X25519StaticSecret::generate(), engine)
        }

        pub fn with_secret(
            server_id: ServerId,
            secret: X25519StaticSecret,
            engine: Arc<PolicyEngine<S>>,
        ) -> Self {
            Self {
                server_id,
                secret,
                engine,
                faults: Faults::default(),
                share_requests: AtomicUsize::new(0),
                key_requests: AtomicUsize::new(0),
            }
        }

        pub fn public_key(&self) -> X25519PublicKey {
            self.secret.public_key()
        }

        /// Make every call fail as if the server were unreachable.
        pub fn set_down(&self, down: bool) {
            self.faults.down.store(down, Ordering::SeqCst);
        }

        /// Delay every call by `delay` before answering.
        pub fn set_delay(&self, delay: Duration) {
            self.faults
                .delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        /// Refuse every share request regardless of policy.
        pub fn set_deny_all(&self, deny: bool) {
            self.faults.deny_all.store(deny, Ordering::SeqCst);
        }

        /// Return a share with a flipped bit.
        pub fn set_corrupt(&self, corrupt: bool) {
            self.faults.corrupt.store(corrupt, Ordering::SeqCst);
        }

        /// Share requests received, including refused ones.
        pub fn share_requests(&self) -> usize {
            self.share_requests.load(Ordering::SeqCst)
        }

        pub fn key_requests(&self) -> usize {
            self.key_requests.load(Ordering::SeqCst)
        }

        async fn simulate_network(&self) -> Result<()> {
            let delay = self.faults.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.faults.down.load(Ordering::SeqCst) {
                return Err(NetError::Transport(format!("{} is down", self.server_id)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl<S: PolicyStore + 'static> KeyServer for MemoryKeyServer<S> {
        fn server_id(&self) -> &ServerId {
            &self.server_id
        }

        async fn get_public_key(&self) -> Result<X25519PublicKey> {
            self.key_requests.fetch_add(1, Ordering::SeqCst);
            self.simulate_network().await?;
            Ok(self.secret.public_key())
        }

        async fn request_share(
            &self,
            policy_id: &PolicyId,
            wrapped_share: &[u8],
            token: &CapabilityToken,
        ) -> Result<ShareResponse> {
            self.share_requests.fetch_add(1, Ordering::SeqCst);
            self.simulate_network().await?;

            if self.faults.deny_all.load(Ordering::SeqCst) {
                return Ok(ShareResponse::Denied("server refuses all requests".into()));
            }

            match self.engine.evaluate(policy_id, &token.identity, token).await {
                Ok(Decision::Grant) => {}
                Ok(Decision::Deny(reason)) => return Ok(ShareResponse::Denied(reason.to_string())),
                Err(PolicyError::Revoked(_)) => {
                    return Ok(ShareResponse::Denied("policy revoked".into()))
                }
                Err(e) => return Ok(ShareResponse::Denied(e.to_string())),
            }

            let share = match unwrap_share(wrapped_share, &self.secret, policy_id, &self.server_id) {
                Ok(share) => share,
                Err(e) => return Ok(ShareResponse::Denied(e.to_string())),
            };

            let mut bytes = share.to_bytes();
            if self.faults.corrupt.load(Ordering::SeqCst) {
                bytes[1] ^= 0x01;
            }
            Ok(ShareResponse::Share(Bytes::from(bytes)))
        }

        async fn health(&self) -> Result<bool> {
            self.simulate_network().await?;
            Ok(true)
        }
    }

    /// Connector resolving `memory://<server_id>` endpoints to in-process
    /// servers.
    pub struct MemoryFleet<S: PolicyStore> {
        servers: RwLock<HashMap<String, Arc<MemoryKeyServer<S>>>>,
    }

    impl<S: PolicyStore + 'static> MemoryFleet<S> {
        pub fn new() -> Self {
            Self {
                servers: RwLock::new(HashMap::new()),
            }
        }

        /// Add a server and return its endpoint.
        pub async fn add(&self, server: Arc<MemoryKeyServer<S>>) -> String {
            let endpoint = format!("{}{}", MEMORY_SCHEME, server.server_id);
            self.servers.write().await.insert(endpoint.clone(), server);
            endpoint
        }

        /// Spawn a fresh server for `server_id` and return it with its endpoint.
        pub async fn spawn(
            &self,
            server_id: ServerId,
            engine: Arc<PolicyEngine<S>>,
        ) -> (Arc<MemoryKeyServer<S>>, String) {
            let server = Arc::new(MemoryKeyServer::new(server_id, engine));
            let endpoint = self.add(server.clone()).await;
            (server, endpoint)
        }

        pub async fn get(&self, server_id: &ServerId) -> Option<Arc<MemoryKeyServer<S>>> {
            let endpoint = format!("{}{}", MEMORY_SCHEME, server_id);
            self.servers.read().await.get(&endpoint).cloned()
        }

        /// Total share requests across the fleet.
        pub async fn total_share_requests(&self) -> usize {
            self.servers
                .read()
                .await
                .values()
                .map(|s| s.share_requests())
                .sum()
        }
    }

    impl<S: PolicyStore + 'static> Default for MemoryFleet<S> {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl<S: PolicyStore + 'static> KeyServerConnector for MemoryFleet<S> {
        async fn connect(&self, server_id: &ServerId, endpoint: &str) -> Result<Arc<dyn KeyServer>> {
            if !endpoint.starts_with(MEMORY_SCHEME) {
                return Err(NetError::Transport(format!(
                    "unsupported endpoint {:?} for {}",
                    endpoint, server_id
                )));
            }
            let server = self
                .servers
                .read()
                .await
                .get(endpoint)
                .cloned()
                .ok_or_else(|| NetError::Transport(format!("no server at {}", endpoint)))?;
            Ok(server as Arc<dyn KeyServer>)
        }
    }
}
