//! Notary store: durable cache of remote servers' signing keys.
//!
//! Logically a multi-version table keyed by `(server_name, key_id)`: writes add a
//! version, reads return the newest one. Writes are advisory; callers treat a
//! failed write as a logging concern only.
//!
//! "Newest" means the largest `valid_until_ts`, not the latest write. A key
//! re-published with a shorter window (e.g. moved to `old_verify_keys` with an
//! earlier `expired_ts`) does not supersede the longer window already stored;
//! the longer window keeps being served until a later one arrives.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::{
    error::FederationError,
    types::{KeyId, ServerKeyEntry, ServerName, VerifyKey},
};
use nexus_db::repository::notary_keys::{self, NotaryKeyRow};

#[async_trait]
pub trait NotaryStore: Send + Sync {
    /// Newest stored entry for each of `key_ids`. Unknown IDs are absent from
    /// the map rather than an error.
    async fn read(
        &self,
        server_name: &ServerName,
        key_ids: &[KeyId],
    ) -> Result<HashMap<KeyId, ServerKeyEntry>, FederationError>;

    /// Record freshly fetched entries for `server_name`.
    async fn write(
        &self,
        server_name: &ServerName,
        entries: &[ServerKeyEntry],
    ) -> Result<(), FederationError>;
}

// ─── PostgreSQL ──────────────────────────────────────────────────────────────

/// Notary store backed by the `notary_server_keys` table.
#[derive(Clone)]
pub struct DbNotaryStore {
    pool: PgPool,
}

impl DbNotaryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotaryStore for DbNotaryStore {
    async fn read(
        &self,
        server_name: &ServerName,
        key_ids: &[KeyId],
    ) -> Result<HashMap<KeyId, ServerKeyEntry>, FederationError> {
        let rows = notary_keys::select_latest(&self.pool, server_name.as_str(), key_ids)
            .await
            .map_err(FederationError::Other)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let entry = ServerKeyEntry {
                    server_name: ServerName::new(row.server_name),
                    key_id: row.key_id,
                    verify_key: VerifyKey { key: row.verify_key },
                    valid_until_ts: row.valid_until_ts,
                };
                (entry.key_id.clone(), entry)
            })
            .collect())
    }

    async fn write(
        &self,
        server_name: &ServerName,
        entries: &[ServerKeyEntry],
    ) -> Result<(), FederationError> {
        let rows: Vec<NotaryKeyRow> = entries
            .iter()
            .map(|e| NotaryKeyRow {
                server_name: server_name.to_string(),
                key_id: e.key_id.clone(),
                verify_key: e.verify_key.key.clone(),
                valid_until_ts: e.valid_until_ts,
            })
            .collect();
        notary_keys::insert_versions(&self.pool, &rows).await.map_err(FederationError::Other)
    }
}

// ─── In-memory ───────────────────────────────────────────────────────────────

/// Process-local notary store for lite mode and tests.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotaryStore {
    inner: Arc<RwLock<HashMap<(ServerName, KeyId), Vec<ServerKeyEntry>>>>,
}

impl MemoryNotaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions of one key.
    pub async fn version_count(&self, server_name: &ServerName, key_id: &str) -> usize {
        self.inner
            .read()
            .await
            .get(&(server_name.clone(), key_id.to_owned()))
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl NotaryStore for MemoryNotaryStore {
    async fn read(
        &self,
        server_name: &ServerName,
        key_ids: &[KeyId],
    ) -> Result<HashMap<KeyId, ServerKeyEntry>, FederationError> {
        let map = self.inner.read().await;
        Ok(key_ids
            .iter()
            .filter_map(|key_id| {
                let versions = map.get(&(server_name.clone(), key_id.clone()))?;
                let newest = versions.iter().max_by_key(|e| e.valid_until_ts)?;
                Some((key_id.clone(), newest.clone()))
            })
            .collect())
    }

    async fn write(
        &self,
        server_name: &ServerName,
        entries: &[ServerKeyEntry],
    ) -> Result<(), FederationError> {
        let mut map = self.inner.write().await;
        for entry in entries {
            let versions = map.entry((server_name.clone(), entry.key_id.clone())).or_default();
            // Same version already recorded.
            if versions.iter().any(|v| v.valid_until_ts == entry.valid_until_ts) {
                continue;
            }
            versions.push(entry.clone());
        }
        Ok(())
    }
}
