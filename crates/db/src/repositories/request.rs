use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use procura_core::domain::proposal::{ProposalId, ProposalStatus};
use procura_core::domain::request::{ProductType, Request, RequestId, RequestStatus};
use procura_core::domain::status_log::{EntityKind, StatusChange};

use crate::connection::DbPool;
use crate::repositories::status_log::append_status_log;
use crate::repositories::{RepositoryError, RequestRepository, RequestTransition};

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn create(&self, request: Request, log: StatusChange) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO requests (
                id, owner_id, product_type, quantity, promised_delivery_date,
                expiration_date, status, row_version, lease_owner, lease_expires_at,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.owner_id)
        .bind(request.product_type.as_str())
        .bind(i64::from(request.quantity))
        .bind(request.promised_delivery_date.to_rfc3339())
        .bind(request.expiration_date.to_rfc3339())
        .bind(request.status.as_str())
        .bind(i64::from(request.row_version))
        .bind(request.lease_owner.as_deref())
        .bind(request.lease_expires_at.map(|at| at.to_rfc3339()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        append_status_log(&mut tx, &log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_id, product_type, quantity, promised_delivery_date,
                    expiration_date, status, row_version, lease_owner, lease_expires_at,
                    created_at, updated_at
             FROM requests
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, product_type, quantity, promised_delivery_date,
                    expiration_date, status, row_version, lease_owner, lease_expires_at,
                    created_at, updated_at
             FROM requests
             WHERE owner_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    async fn apply_transition(
        &self,
        transition: RequestTransition,
    ) -> Result<Request, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Guarded write: lands only if the row still carries the version the
        // caller decided on. Any landing transition invalidates a held lease.
        let result = match transition.new_expiration {
            Some(new_expiration) => {
                sqlx::query(
                    "UPDATE requests
                     SET status = ?, expiration_date = ?, row_version = row_version + 1,
                         updated_at = ?, lease_owner = NULL, lease_expires_at = NULL
                     WHERE id = ? AND row_version = ?",
                )
                .bind(transition.to_status.as_str())
                .bind(new_expiration.to_rfc3339())
                .bind(transition.touched_at.to_rfc3339())
                .bind(&transition.id.0)
                .bind(i64::from(transition.expected_version))
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE requests
                     SET status = ?, row_version = row_version + 1,
                         updated_at = ?, lease_owner = NULL, lease_expires_at = NULL
                     WHERE id = ? AND row_version = ?",
                )
                .bind(transition.to_status.as_str())
                .bind(transition.touched_at.to_rfc3339())
                .bind(&transition.id.0)
                .bind(i64::from(transition.expected_version))
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let row = sqlx::query("SELECT COUNT(*) AS count FROM requests WHERE id = ?")
                .bind(&transition.id.0)
                .fetch_one(&self.pool)
                .await?;
            let present: i64 = row.try_get("count")?;
            return Err(if present == 0 {
                RepositoryError::NotFound {
                    kind: EntityKind::Request,
                    id: transition.id.0.clone(),
                }
            } else {
                RepositoryError::VersionConflict {
                    kind: EntityKind::Request,
                    id: transition.id.0.clone(),
                }
            });
        }

        append_status_log(&mut tx, &transition.log).await?;

        if let Some(sweep) = &transition.sweep {
            let open = sqlx::query(
                "SELECT id FROM proposals
                 WHERE request_id = ? AND status = ?
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(&transition.id.0)
            .bind(ProposalStatus::Submitted.as_str())
            .fetch_all(&mut *tx)
            .await?;

            for row in &open {
                let proposal_id: String = row.try_get("id")?;
                sqlx::query(
                    "UPDATE proposals
                     SET status = ?, row_version = row_version + 1, updated_at = ?
                     WHERE id = ?",
                )
                .bind(ProposalStatus::Withdrawn.as_str())
                .bind(transition.touched_at.to_rfc3339())
                .bind(&proposal_id)
                .execute(&mut *tx)
                .await?;

                let change = StatusChange::for_proposal(
                    &ProposalId(proposal_id),
                    Some(ProposalStatus::Submitted),
                    ProposalStatus::Withdrawn,
                    sweep.actor.clone(),
                    transition.touched_at,
                )
                .with_reason(sweep.reason.clone());
                append_status_log(&mut tx, &change).await?;
            }
        }

        let row = sqlx::query(
            "SELECT id, owner_id, product_type, quantity, promised_delivery_date,
                    expiration_date, status, row_version, lease_owner, lease_expires_at,
                    created_at, updated_at
             FROM requests
             WHERE id = ?",
        )
        .bind(&transition.id.0)
        .fetch_one(&mut *tx)
        .await?;
        let request = request_from_row(&row)?;

        tx.commit().await?;
        Ok(request)
    }

    async fn list_closure_candidates(
        &self,
        now: DateTime<Utc>,
        claimant: &str,
        limit: u32,
    ) -> Result<Vec<Request>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, product_type, quantity, promised_delivery_date,
                    expiration_date, status, row_version, lease_owner, lease_expires_at,
                    created_at, updated_at
             FROM requests
             WHERE status = ?
               AND expiration_date <= ?
               AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at <= ?)
             ORDER BY expiration_date ASC, id ASC
             LIMIT ?",
        )
        .bind(RequestStatus::Approved.as_str())
        .bind(now.to_rfc3339())
        .bind(claimant)
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    async fn claim_for_closure(
        &self,
        id: &RequestId,
        claimant: &str,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // Lease bookkeeping only; the row version stays untouched so the
        // closing transition still races fairly against user writes.
        let result = sqlx::query(
            "UPDATE requests
             SET lease_owner = ?, lease_expires_at = ?
             WHERE id = ?
               AND status = ?
               AND expiration_date <= ?
               AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at <= ?)",
        )
        .bind(claimant)
        .bind(lease_until.to_rfc3339())
        .bind(&id.0)
        .bind(RequestStatus::Approved.as_str())
        .bind(now.to_rfc3339())
        .bind(claimant)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(
        &self,
        id: &RequestId,
        claimant: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE requests
             SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ? AND lease_owner = ?",
        )
        .bind(&id.0)
        .bind(claimant)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn request_from_row(row: &SqliteRow) -> Result<Request, RepositoryError> {
    let product_raw: String = row.try_get("product_type")?;
    let product_type = ProductType::parse(&product_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown product type: {product_raw}")))?;
    let status_raw: String = row.try_get("status")?;
    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status: {status_raw}")))?;

    Ok(Request {
        id: RequestId(row.try_get("id")?),
        owner_id: row.try_get("owner_id")?,
        product_type,
        quantity: parse_u32(row.try_get::<i64, _>("quantity")?, "quantity")?,
        promised_delivery_date: parse_timestamp(
            row.try_get::<String, _>("promised_delivery_date")?,
        )?,
        expiration_date: parse_timestamp(row.try_get::<String, _>("expiration_date")?)?,
        status,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: parse_optional_timestamp(
            row.try_get::<Option<String>, _>("lease_expires_at")?,
        )?,
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

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(parse_timestamp).transpose()
}
