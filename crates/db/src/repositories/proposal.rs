use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use procura_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use procura_core::domain::request::{RequestId, RequestStatus};
use procura_core::domain::status_log::{EntityKind, StatusChange};

use crate::connection::DbPool;
use crate::repositories::status_log::append_status_log;
use crate::repositories::{
    ProposalRepository, ProposalTransition, RepositoryError, RequestGuard,
};

pub struct SqlProposalRepository {
    pool: DbPool,
}

impl SqlProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn classify_guard_failure(&self, request_id: &RequestId) -> RepositoryError {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM requests WHERE id = ?")
            .bind(&request_id.0)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<i64, _>("count"));
        match count {
            Ok(0) => RepositoryError::NotFound {
                kind: EntityKind::Request,
                id: request_id.0.clone(),
            },
            Ok(_) => RepositoryError::VersionConflict {
                kind: EntityKind::Request,
                id: request_id.0.clone(),
            },
            Err(err) => RepositoryError::Database(err),
        }
    }

    async fn classify_proposal_failure(&self, id: &ProposalId) -> RepositoryError {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM proposals WHERE id = ?")
            .bind(&id.0)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<i64, _>("count"));
        match count {
            Ok(0) => RepositoryError::NotFound {
                kind: EntityKind::Proposal,
                id: id.0.clone(),
            },
            Ok(_) => RepositoryError::VersionConflict {
                kind: EntityKind::Proposal,
                id: id.0.clone(),
            },
            Err(err) => RepositoryError::Database(err),
        }
    }
}

/// Bumps the owning request's row version while re-checking it is still
/// approved (and unexpired, when a deadline floor is given). Runs inside the
/// proposal write's transaction so the two rows move together or not at all.
async fn touch_guarded_request(
    conn: &mut sqlx::SqliteConnection,
    guard: &RequestGuard,
) -> Result<bool, RepositoryError> {
    let result = match guard.deadline_after {
        Some(deadline_after) => {
            sqlx::query(
                "UPDATE requests
                 SET row_version = row_version + 1
                 WHERE id = ? AND row_version = ? AND status = ? AND expiration_date > ?",
            )
            .bind(&guard.request_id.0)
            .bind(i64::from(guard.expected_version))
            .bind(RequestStatus::Approved.as_str())
            .bind(deadline_after.to_rfc3339())
            .execute(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE requests
                 SET row_version = row_version + 1
                 WHERE id = ? AND row_version = ? AND status = ?",
            )
            .bind(&guard.request_id.0)
            .bind(i64::from(guard.expected_version))
            .bind(RequestStatus::Approved.as_str())
            .execute(&mut *conn)
            .await?
        }
    };
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl ProposalRepository for SqlProposalRepository {
    async fn create(
        &self,
        proposal: Proposal,
        guard: RequestGuard,
        log: StatusChange,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if !touch_guarded_request(&mut tx, &guard).await? {
            tx.rollback().await?;
            return Err(self.classify_guard_failure(&guard.request_id).await);
        }

        let inserted = sqlx::query(
            "INSERT INTO proposals (
                id, request_id, supplier_id, quantity, note, status,
                row_version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.request_id.0)
        .bind(&proposal.supplier_id)
        .bind(i64::from(proposal.quantity))
        .bind(proposal.note.as_deref())
        .bind(proposal.status.as_str())
        .bind(i64::from(proposal.row_version))
        .bind(proposal.created_at.to_rfc3339())
        .bind(proposal.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Err(RepositoryError::DuplicateProposal {
                    request_id: proposal.request_id.clone(),
                    supplier_id: proposal.supplier_id.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        append_status_log(&mut tx, &log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, request_id, supplier_id, quantity, note, status,
                    row_version, created_at, updated_at
             FROM proposals
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(proposal_from_row).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, supplier_id, quantity, note, status,
                    row_version, created_at, updated_at
             FROM proposals
             WHERE request_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(proposal_from_row).collect()
    }

    async fn list_for_supplier(
        &self,
        supplier_id: &str,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, supplier_id, quantity, note, status,
                    row_version, created_at, updated_at
             FROM proposals
             WHERE supplier_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(proposal_from_row).collect()
    }

    async fn apply_transition(
        &self,
        transition: ProposalTransition,
    ) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if let Some(guard) = &transition.request_guard {
            if !touch_guarded_request(&mut tx, guard).await? {
                tx.rollback().await?;
                return Err(self.classify_guard_failure(&guard.request_id).await);
            }
        }

        let result = sqlx::query(
            "UPDATE proposals
             SET status = ?, row_version = row_version + 1, updated_at = ?
             WHERE id = ? AND row_version = ?",
        )
        .bind(transition.to_status.as_str())
        .bind(transition.touched_at.to_rfc3339())
        .bind(&transition.id.0)
        .bind(i64::from(transition.expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.classify_proposal_failure(&transition.id).await);
        }

        append_status_log(&mut tx, &transition.log).await?;

        let row = sqlx::query(
            "SELECT id, request_id, supplier_id, quantity, note, status,
                    row_version, created_at, updated_at
             FROM proposals
             WHERE id = ?",
        )
        .bind(&transition.id.0)
        .fetch_one(&mut *tx)
        .await?;
        let proposal = proposal_from_row(&row)?;

        tx.commit().await?;
        Ok(proposal)
    }
}

fn proposal_from_row(row: &SqliteRow) -> Result<Proposal, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = ProposalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown proposal status: {status_raw}")))?;

    Ok(Proposal {
        id: ProposalId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        supplier_id: row.try_get("supplier_id")?,
        quantity: parse_u32(row.try_get::<i64, _>("quantity")?, "quantity")?,
        note: row.try_get("note")?,
        status,
        row_version: parse_u32(row.try_get::<i64, _>("row_version")?, "row_version")?,
        created_at: parse_timestamp(row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(row.try_get::<String, _>("updated_at")?)?,
    })
}

fn parse_u32(value: i64, field: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{field} out of range: {value}")))
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp {raw:?}: {err}")))
}
