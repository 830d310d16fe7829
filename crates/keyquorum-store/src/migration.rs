//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1 and is
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection, now: i64) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now],
            )?;
            tracing::debug!(version, "applied schema migration");
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// v1: policies and envelopes.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE policies (
            policy_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,               -- allowlist | timelock | subscription
            state TEXT NOT NULL,              -- created | active | revoked
            record BLOB NOT NULL,             -- CBOR AccessPolicy
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            seq INTEGER NOT NULL              -- insertion order
        );

        CREATE TABLE envelopes (
            envelope_id BLOB PRIMARY KEY,     -- 32 bytes, Blake3 of CBOR
            policy_id TEXT NOT NULL,
            threshold INTEGER NOT NULL,
            total_shares INTEGER NOT NULL,
            body BLOB NOT NULL,               -- CBOR EncryptedEnvelope
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_policies_seq ON policies(seq);
        CREATE INDEX idx_policies_state ON policies(state);
        CREATE INDEX idx_envelopes_policy ON envelopes(policy_id, created_at);
        "#,
    )?;
    Ok(())
}
