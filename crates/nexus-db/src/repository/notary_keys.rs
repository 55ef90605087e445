//! Notary key repository: cached signing keys of remote servers.
//!
//! The table is multi-version: an accepted key document appends one row per
//! key, and readers always see the largest `valid_until_ts` per
//! `(server_name, key_id)`, regardless of `fetched_at`. A later row with a
//! shorter window does not hide an earlier, longer one. Nothing is ever deleted.

use anyhow::Result;
use sqlx::PgPool;

/// One stored version of a remote server's verify key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotaryKeyRow {
    pub server_name: String,
    pub key_id: String,
    /// Base64url-encoded public key.
    pub verify_key: String,
    /// Unix milliseconds.
    pub valid_until_ts: i64,
}

/// Latest stored version of each requested key for `server_name`.
///
/// Key IDs with no stored row are simply absent from the result.
pub async fn select_latest(
    pool: &PgPool,
    server_name: &str,
    key_ids: &[String],
) -> Result<Vec<NotaryKeyRow>> {
    let rows = sqlx::query_as::<_, NotaryKeyRow>(
        r#"
        SELECT DISTINCT ON (server_name, key_id)
               server_name, key_id, verify_key, valid_until_ts
        FROM notary_server_keys
        WHERE server_name = $1 AND key_id = ANY($2)
        ORDER BY server_name, key_id, valid_until_ts DESC
        "#,
    )
    .bind(server_name)
    .bind(key_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Record a batch of key versions for one server in a single transaction.
///
/// A version already present (same server, key and validity) is left untouched.
pub async fn insert_versions(pool: &PgPool, rows: &[NotaryKeyRow]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO notary_server_keys (server_name, key_id, verify_key, valid_until_ts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (server_name, key_id, valid_until_ts) DO NOTHING
            "#,
        )
        .bind(&row.server_name)
        .bind(&row.key_id)
        .bind(&row.verify_key)
        .bind(row.valid_until_ts)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
