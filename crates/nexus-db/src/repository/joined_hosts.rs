//! Joined hosts repository: which remote servers participate in a room.

use anyhow::Result;
use sqlx::PgPool;

/// Distinct server names with a membership event in any of `room_ids`,
/// ordered by name.
pub async fn select_for_rooms(pool: &PgPool, room_ids: &[String]) -> Result<Vec<String>> {
    let hosts = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT server_name
        FROM federation_joined_hosts
        WHERE room_id = ANY($1)
        ORDER BY server_name
        "#,
    )
    .bind(room_ids)
    .fetch_all(pool)
    .await?;
    Ok(hosts)
}

/// Record that `server_name` joined `room_id` via `event_id`.
pub async fn insert(pool: &PgPool, room_id: &str, event_id: &str, server_name: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO federation_joined_hosts (room_id, event_id, server_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (room_id, event_id) DO NOTHING
        "#,
    )
    .bind(room_id)
    .bind(event_id)
    .bind(server_name)
    .execute(pool)
    .await?;
    Ok(())
}
