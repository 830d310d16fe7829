//! Service configuration.
//!
//! Loaded from environment variables with the `KEYQUORUM_` prefix:
//!
//! - `KEYQUORUM_KEY_SERVERS`: comma-separated server names
//! - `KEYQUORUM_<NAME>_ENDPOINT`: endpoint per server (name upper-cased,
//!   `-` replaced by `_`); servers without one are skipped, and a list
//!   where none has one is a configuration error
//! - `KEYQUORUM_THRESHOLD`: shares required to decrypt
//! - `KEYQUORUM_SERVER_TIMEOUT_MS`: per-server request timeout
//! - `KEYQUORUM_DEADLINE_MS`: overall decrypt deadline

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use keyquorum_core::{ServerId, MAX_SHARES};
use keyquorum_net::{CoordinatorConfig, RegistryConfig};

use crate::error::{Result, ServiceError};

pub const ENV_KEY_SERVERS: &str = "KEYQUORUM_KEY_SERVERS";
pub const ENV_THRESHOLD: &str = "KEYQUORUM_THRESHOLD";
pub const ENV_SERVER_TIMEOUT_MS: &str = "KEYQUORUM_SERVER_TIMEOUT_MS";
pub const ENV_DEADLINE_MS: &str = "KEYQUORUM_DEADLINE_MS";

/// A configured key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyServerEndpoint {
    pub name: String,
    pub endpoint: String,
}

impl KeyServerEndpoint {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn server_id(&self) -> ServerId {
        ServerId::new(self.name.clone())
    }
}

/// Configuration for [`SealService`](crate::SealService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub key_servers: Vec<KeyServerEndpoint>,
    /// Shares required to decrypt.
    pub threshold: usize,
    pub coordinator: CoordinatorConfig,
    pub registry: RegistryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            key_servers: default_key_servers(),
            threshold: 2,
            coordinator: CoordinatorConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

fn default_key_servers() -> Vec<KeyServerEndpoint> {
    (1..=3)
        .map(|i| KeyServerEndpoint::new(format!("ks-{}", i), format!("memory://ks-{}", i)))
        .collect()
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(names) = lookup(ENV_KEY_SERVERS) {
            let servers: Vec<KeyServerEndpoint> = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .filter_map(|name| {
                    let endpoint = lookup(&endpoint_var(name));
                    if endpoint.is_none() {
                        tracing::warn!(server = name, "no endpoint configured, skipping key server");
                    }
                    endpoint.map(|e| KeyServerEndpoint::new(name, e))
                })
                .collect();
            if servers.is_empty() {
                return Err(ServiceError::Config(format!(
                    "{} is set but none of {:?} has an endpoint",
                    ENV_KEY_SERVERS, names
                )));
            }
            config.key_servers = servers;
        }

        if let Some(raw) = lookup(ENV_THRESHOLD) {
            config.threshold = parse_number(ENV_THRESHOLD, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_SERVER_TIMEOUT_MS) {
            config.coordinator.per_server_timeout =
                Duration::from_millis(parse_number(ENV_SERVER_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_DEADLINE_MS) {
            config.coordinator.operation_deadline =
                Duration::from_millis(parse_number(ENV_DEADLINE_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Number of shares an envelope is split into by default.
    pub fn total_shares(&self) -> usize {
        self.key_servers.len()
    }

    /// Check the threshold against the configured fleet.
    pub fn validate(&self) -> Result<()> {
        let total = self.total_shares();
        if total == 0 {
            return Err(ServiceError::Config("no key servers configured".into()));
        }
        if total > MAX_SHARES {
            return Err(ServiceError::Config(format!(
                "at most {} key servers supported, got {}",
                MAX_SHARES, total
            )));
        }
        if self.threshold == 0 || self.threshold > total {
            return Err(ServiceError::Config(format!(
                "threshold {} must be between 1 and {}",
                self.threshold, total
            )));
        }
        let mut names: Vec<&str> = self.key_servers.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != total {
            return Err(ServiceError::Config("duplicate key server names".into()));
        }
        Ok(())
    }
}

/// `ruby-nodes` -> `KEYQUORUM_RUBY_NODES_ENDPOINT`
pub fn endpoint_var(name: &str) -> String {
    format!("KEYQUORUM_{}_ENDPOINT", name.to_uppercase().replace('-', "_"))
}

fn parse_number(var: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::Config(format!("{} must be a non-negative integer, got {:?}", var, raw)))
}
