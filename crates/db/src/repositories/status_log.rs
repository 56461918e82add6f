use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use procura_core::domain::status_log::{Actor, EntityKind, StatusChange, StatusLogEntry};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, StatusLogRepository};

/// Writes one audit entry on the caller's connection. Every status change
/// goes through here from inside the transaction that applies it.
pub(crate) async fn append_status_log(
    conn: &mut sqlx::SqliteConnection,
    change: &StatusChange,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO status_log (
            entity_kind, entity_id, from_status, to_status,
            actor_user_id, reason, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(change.entity_kind.as_str())
    .bind(&change.entity_id)
    .bind(change.from_status.as_deref())
    .bind(&change.to_status)
    .bind(change.actor.as_user_id())
    .bind(change.reason.as_deref())
    .bind(change.occurred_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub struct SqlStatusLogRepository {
    pool: DbPool,
}

impl SqlStatusLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusLogRepository for SqlStatusLogRepository {
    async fn list_for_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, entity_kind, entity_id, from_status, to_status,
                    actor_user_id, reason, occurred_at
             FROM status_log
             WHERE entity_kind = ? AND entity_id = ?
             ORDER BY id ASC",
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<StatusLogEntry, RepositoryError> {
    let kind_raw: String = row.try_get("entity_kind")?;
    let entity_kind = EntityKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity kind: {kind_raw}")))?;
    let actor = match row.try_get::<Option<String>, _>("actor_user_id")? {
        Some(user_id) => Actor::User(user_id),
        None => Actor::System,
    };

    Ok(StatusLogEntry {
        id: row.try_get("id")?,
        entity_kind,
        entity_id: row.try_get("entity_id")?,
        from_status: row.try_get("from_status")?,
        to_status: row.try_get("to_status")?,
        actor,
        reason: row.try_get("reason")?,
        occurred_at: parse_timestamp(row.try_get::<String, _>("occurred_at")?)?,
    })
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp {raw:?}: {err}")))
}
