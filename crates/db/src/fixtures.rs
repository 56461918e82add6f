use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical seed requests and the contract `verify` checks them against.
const SEED_REQUESTS: &[SeedRequestContract] = &[
    SeedRequestContract {
        request_id: "req-seed-draft",
        owner_id: "user-amara",
        product_type: "software_license",
        status: "draft",
        row_version: 1,
        expected_proposal_count: 0,
        expected_log_count: 1,
        accepted_proposal_id: None,
        description: "freshly drafted license request, not yet submitted",
    },
    SeedRequestContract {
        request_id: "req-seed-pending",
        owner_id: "user-bode",
        product_type: "consulting_service",
        status: "pending_approval",
        row_version: 2,
        expected_proposal_count: 0,
        expected_log_count: 2,
        accepted_proposal_id: None,
        description: "consulting engagement waiting on an approval decision",
    },
    SeedRequestContract {
        request_id: "req-seed-open",
        owner_id: "user-amara",
        product_type: "hardware",
        status: "approved",
        row_version: 5,
        expected_proposal_count: 2,
        expected_log_count: 3,
        accepted_proposal_id: None,
        description: "approved hardware request with two competing proposals",
    },
    SeedRequestContract {
        request_id: "req-seed-closing",
        owner_id: "user-bode",
        product_type: "hardware",
        status: "approved",
        row_version: 5,
        expected_proposal_count: 1,
        expected_log_count: 3,
        accepted_proposal_id: Some("prop-seed-sierra"),
        description: "approved request past its deadline, closes fulfilled on the next tick",
    },
    SeedRequestContract {
        request_id: "req-seed-closed",
        owner_id: "user-bode",
        product_type: "other",
        status: "closed_unfulfilled",
        row_version: 6,
        expected_proposal_count: 1,
        expected_log_count: 4,
        accepted_proposal_id: None,
        description: "request the scheduler already closed without an accepted proposal",
    },
];

const SEED_REQUEST_IDS: &[&str] = &[
    "req-seed-draft",
    "req-seed-pending",
    "req-seed-open",
    "req-seed-closing",
    "req-seed-closed",
];

const SEED_PROPOSAL_IDS: &[&str] =
    &["prop-seed-norsk", "prop-seed-helix", "prop-seed-sierra", "prop-seed-quorn"];

/// Deterministic fixtures walking one request through each lifecycle stage.
/// `load` replaces prior seed rows wholesale, so reloading is safe.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedReport, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let requests_seeded = SEED_REQUESTS
            .iter()
            .map(|contract| RequestSeedInfo {
                request_id: contract.request_id,
                status: contract.status,
                description: contract.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedReport { requests_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_REQUESTS {
            let request_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM requests
                    WHERE id = ?1 AND owner_id = ?2 AND product_type = ?3
                      AND status = ?4 AND row_version = ?5
                 )",
            )
            .bind(contract.request_id)
            .bind(contract.owner_id)
            .bind(contract.product_type)
            .bind(contract.status)
            .bind(contract.row_version)
            .fetch_one(pool)
            .await?;
            checks.push((contract.request_label(), request_ok == 1));

            let proposal_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM proposals WHERE request_id = ?1")
                    .bind(contract.request_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((
                contract.proposal_count_label(),
                proposal_count == contract.expected_proposal_count,
            ));

            let log_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM status_log
                 WHERE entity_kind = 'request' AND entity_id = ?1",
            )
            .bind(contract.request_id)
            .fetch_one(pool)
            .await?;
            checks.push((contract.log_count_label(), log_count == contract.expected_log_count));

            // The newest audit entry must agree with the stored status.
            let tip_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM status_log
                    WHERE entity_kind = 'request' AND entity_id = ?1 AND to_status = ?2
                      AND id = (
                          SELECT MAX(id) FROM status_log
                          WHERE entity_kind = 'request' AND entity_id = ?1
                      )
                 )",
            )
            .bind(contract.request_id)
            .bind(contract.status)
            .fetch_one(pool)
            .await?;
            checks.push((contract.log_tip_label(), tip_ok == 1));

            if let Some(accepted_id) = contract.accepted_proposal_id {
                let accepted_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(
                        SELECT 1 FROM proposals
                        WHERE id = ?1 AND request_id = ?2 AND status = 'accepted'
                     )",
                )
                .bind(accepted_id)
                .bind(contract.request_id)
                .fetch_one(pool)
                .await?;
                checks.push(("accepted-proposal", accepted_ok == 1));
            }
        }

        let duplicate_slots: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM (
                SELECT request_id, supplier_id FROM proposals
                WHERE status != 'withdrawn'
                GROUP BY request_id, supplier_id
                HAVING COUNT(1) > 1
             )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("active-slot-uniqueness", duplicate_slots == 0));

        let system_closure: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM status_log
                WHERE entity_kind = 'request' AND entity_id = 'req-seed-closed'
                  AND to_status = 'closed_unfulfilled' AND actor_user_id IS NULL
             )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("system-closure-entry", system_closure == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_requests = sql_array_from_ids(SEED_REQUEST_IDS);
        let quoted_proposals = sql_array_from_ids(SEED_PROPOSAL_IDS);

        sqlx::query(&format!(
            "DELETE FROM status_log
             WHERE entity_id IN {quoted_requests} OR entity_id IN {quoted_proposals}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM proposals WHERE id IN {quoted_proposals}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM requests WHERE id IN {quoted_requests}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedRequestContract {
    request_id: &'static str,
    owner_id: &'static str,
    product_type: &'static str,
    status: &'static str,
    row_version: i64,
    expected_proposal_count: i64,
    expected_log_count: i64,
    accepted_proposal_id: Option<&'static str>,
    description: &'static str,
}

impl SeedRequestContract {
    fn request_label(&self) -> &'static str {
        match self.request_id {
            "req-seed-draft" => "request-draft",
            "req-seed-pending" => "request-pending",
            "req-seed-open" => "request-open",
            "req-seed-closing" => "request-closing",
            _ => "request-closed",
        }
    }

    fn proposal_count_label(&self) -> &'static str {
        match self.request_id {
            "req-seed-draft" => "request-draft-proposal-count",
            "req-seed-pending" => "request-pending-proposal-count",
            "req-seed-open" => "request-open-proposal-count",
            "req-seed-closing" => "request-closing-proposal-count",
            _ => "request-closed-proposal-count",
        }
    }

    fn log_count_label(&self) -> &'static str {
        match self.request_id {
            "req-seed-draft" => "request-draft-log-count",
            "req-seed-pending" => "request-pending-log-count",
            "req-seed-open" => "request-open-log-count",
            "req-seed-closing" => "request-closing-log-count",
            _ => "request-closed-log-count",
        }
    }

    fn log_tip_label(&self) -> &'static str {
        match self.request_id {
            "req-seed-draft" => "request-draft-log-tip",
            "req-seed-pending" => "request-pending-log-tip",
            "req-seed-open" => "request-open-log-tip",
            "req-seed-closing" => "request-closing-log-tip",
            _ => "request-closed-log-tip",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedReport {
    pub requests_seeded: Vec<RequestSeedInfo>,
}

#[derive(Debug)]
pub struct RequestSeedInfo {
    pub request_id: &'static str,
    pub status: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
