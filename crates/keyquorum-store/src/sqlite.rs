//! SQLite implementation of the store traits.
//!
//! rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. Records are stored as CBOR blobs with a
//! few indexed columns alongside.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use keyquorum_core::{AccessPolicy, EncryptedEnvelope, EnvelopeId, PolicyId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{EnvelopeStore, InsertResult, PolicyStore};

/// SQLite-backed store. Thread-safe via an internal mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn, now_millis())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, now_millis())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Worker(format!("mutex poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Worker(format!("spawn_blocking failed: {}", e)))?
    }
}

fn decode_policy(blob: &[u8]) -> Result<AccessPolicy> {
    AccessPolicy::from_bytes(blob).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn decode_envelope(blob: &[u8]) -> Result<EncryptedEnvelope> {
    EncryptedEnvelope::from_bytes(blob).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn envelope_id_from_blob(blob: Vec<u8>) -> Result<EnvelopeId> {
    let bytes: [u8; 32] = blob
        .try_into()
        .map_err(|_| StoreError::InvalidData("envelope id must be 32 bytes".into()))?;
    Ok(EnvelopeId::from_bytes(bytes))
}

#[async_trait]
impl PolicyStore for SqliteStore {
    async fn insert_policy(&self, policy: &AccessPolicy) -> Result<InsertResult> {
        let record = policy.to_bytes()?;
        let policy = policy.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO policies
                    (policy_id, kind, state, record, created_at, updated_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM policies))",
                params![
                    policy.policy_id.as_str(),
                    policy.kind().as_str(),
                    policy.state.as_str(),
                    record,
                    policy.created_at,
                    now_millis(),
                ],
            )?;
            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn put_policy(&self, policy: &AccessPolicy) -> Result<()> {
        let record = policy.to_bytes()?;
        let policy = policy.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO policies
                    (policy_id, kind, state, record, created_at, updated_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM policies))
                 ON CONFLICT(policy_id) DO UPDATE SET
                    state = excluded.state,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![
                    policy.policy_id.as_str(),
                    policy.kind().as_str(),
                    policy.state.as_str(),
                    record,
                    policy.created_at,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_policy(&self, policy_id: &PolicyId) -> Result<Option<AccessPolicy>> {
        let policy_id = policy_id.clone();
        self.run(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT record FROM policies WHERE policy_id = ?1",
                    params![policy_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            blob.map(|b| decode_policy(&b)).transpose()
        })
        .await
    }

    async fn list_policies(&self) -> Result<Vec<AccessPolicy>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT record FROM policies ORDER BY seq")?;
            let blobs = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            blobs.iter().map(|b| decode_policy(b)).collect()
        })
        .await
    }
}

#[async_trait]
impl EnvelopeStore for SqliteStore {
    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<EnvelopeId> {
        let body = envelope.to_bytes()?;
        let id = EnvelopeId::from_bytes(*blake3::hash(&body).as_bytes());
        let policy_id = envelope.policy_id.clone();
        let (threshold, total, created_at) =
            (envelope.threshold, envelope.total_shares, envelope.created_at);

        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO envelopes
                    (envelope_id, policy_id, threshold, total_shares, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_bytes().as_slice(),
                    policy_id.as_str(),
                    threshold,
                    total,
                    body,
                    created_at,
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get_envelope(&self, id: &EnvelopeId) -> Result<Option<EncryptedEnvelope>> {
        let id = *id;
        self.run(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM envelopes WHERE envelope_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            blob.map(|b| decode_envelope(&b)).transpose()
        })
        .await
    }

    async fn list_envelopes(&self, policy_id: &PolicyId) -> Result<Vec<EnvelopeId>> {
        let policy_id = policy_id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT envelope_id FROM envelopes
                 WHERE policy_id = ?1 ORDER BY created_at, envelope_id",
            )?;
            let blobs = stmt
                .query_map(params![policy_id.as_str()], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            blobs.into_iter().map(envelope_id_from_blob).collect()
        })
        .await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_envelope, sample_policy};
    use keyquorum_core::PolicyState;

    #[tokio::test]
    async fn test_insert_and_get_policy() {
        let store = SqliteStore::open_memory().unwrap();
        let policy = sample_policy("allowlist_a");

        assert_eq!(store.insert_policy(&policy).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_policy(&policy).await.unwrap(),
            InsertResult::AlreadyExists
        );
        let fetched = store.get_policy(&policy.policy_id).await.unwrap().unwrap();
        assert_eq!(fetched, policy);
    }

    #[tokio::test]
    async fn test_state_update_persists() {
        let store = SqliteStore::open_memory().unwrap();
        let mut policy = sample_policy("p");
        store.insert_policy(&policy).await.unwrap();

        policy.state = PolicyState::Revoked;
        policy.revoked_at = Some(99);
        policy.reason = Some("compromised".into());
        store.put_policy(&policy).await.unwrap();

        let fetched = store.get_policy(&policy.policy_id).await.unwrap().unwrap();
        assert_eq!(fetched.state, PolicyState::Revoked);
        assert_eq!(fetched.reason.as_deref(), Some("compromised"));
    }

    #[tokio::test]
    async fn test_list_policies_in_insertion_order() {
        let store = SqliteStore::open_memory().unwrap();
        for name in ["c", "a", "b"] {
            store.insert_policy(&sample_policy(name)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.policy_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_envelope_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let env = sample_envelope("p1", 5);

        let id = store.put_envelope(&env).await.unwrap();
        assert_eq!(id, env.id().unwrap());
        assert_eq!(store.put_envelope(&env).await.unwrap(), id);
        assert_eq!(store.get_envelope(&id).await.unwrap().unwrap(), env);
        assert_eq!(store.list_envelopes(&PolicyId::from("p1")).await.unwrap(), vec![id]);
        assert!(store
            .get_envelope(&EnvelopeId::from_bytes([0; 32]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyquorum.db");
        let policy = sample_policy("durable");
        let env = sample_envelope("durable", 7);

        let env_id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_policy(&policy).await.unwrap();
            store.put_envelope(&env).await.unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get_policy(&policy.policy_id).await.unwrap().unwrap(),
            policy
        );
        assert_eq!(store.get_envelope(&env_id).await.unwrap().unwrap(), env);
    }
}
