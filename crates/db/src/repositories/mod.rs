use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use procura_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use procura_core::domain::request::{Request, RequestId, RequestStatus};
use procura_core::domain::status_log::{Actor, EntityKind, StatusChange, StatusLogEntry};

pub mod memory;
pub mod proposal;
pub mod request;
pub mod status_log;

pub use memory::{
    InMemoryProposalRepository, InMemoryRequestRepository, InMemoryStatusLogRepository,
    InMemoryStore,
};
pub use proposal::SqlProposalRepository;
pub use request::SqlRequestRepository;
pub use status_log::SqlStatusLogRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{} `{id}` not found", kind.as_str())]
    NotFound { kind: EntityKind, id: String },
    #[error("{} `{id}` was changed by another writer", kind.as_str())]
    VersionConflict { kind: EntityKind, id: String },
    #[error("supplier {supplier_id:?} already has an active proposal on request {request_id:?}")]
    DuplicateProposal {
        request_id: RequestId,
        supplier_id: String,
    },
}

/// Versioned status change for one request. The write only lands if the
/// stored row still carries `expected_version`; otherwise the repository
/// reports `VersionConflict` and nothing is written, audit entry included.
#[derive(Clone, Debug)]
pub struct RequestTransition {
    pub id: RequestId,
    pub expected_version: u32,
    pub to_status: RequestStatus,
    /// Replacement deadline, set on resubmission only.
    pub new_expiration: Option<DateTime<Utc>>,
    pub touched_at: DateTime<Utc>,
    pub log: StatusChange,
    /// When present, still-submitted proposals on the request are withdrawn
    /// in the same transaction, one audit entry each.
    pub sweep: Option<ProposalSweep>,
}

#[derive(Clone, Debug)]
pub struct ProposalSweep {
    pub actor: Actor,
    pub reason: String,
}

/// Versioned status change for one proposal. `request_guard` ties the write
/// to the owning request so a proposal decision and a concurrent request
/// closure cannot both land.
#[derive(Clone, Debug)]
pub struct ProposalTransition {
    pub id: ProposalId,
    pub expected_version: u32,
    pub to_status: ProposalStatus,
    pub touched_at: DateTime<Utc>,
    pub log: StatusChange,
    pub request_guard: Option<RequestGuard>,
}

/// Conditional touch of the owning request, applied inside the proposal
/// write's transaction. Bumps the request row version so concurrent
/// request-side writers observing the old version fail their own check.
/// Requires the request to still be approved, and, when `deadline_after`
/// is set, to have its deadline strictly in the future of that instant.
#[derive(Clone, Debug)]
pub struct RequestGuard {
    pub request_id: RequestId,
    pub expected_version: u32,
    pub deadline_after: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn create(&self, request: Request, log: StatusChange) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Request>, RepositoryError>;

    async fn apply_transition(
        &self,
        transition: RequestTransition,
    ) -> Result<Request, RepositoryError>;

    /// Approved requests whose deadline has elapsed at `now`, skipping rows
    /// under a live lease held by someone other than `claimant`. Ordered
    /// oldest deadline first, at most `limit` rows.
    async fn list_closure_candidates(
        &self,
        now: DateTime<Utc>,
        claimant: &str,
        limit: u32,
    ) -> Result<Vec<Request>, RepositoryError>;

    /// Take the closure lease on one request. Succeeds only while the row is
    /// still approved with an elapsed deadline and not leased to a live
    /// competing claimant. Does not change the row version.
    async fn claim_for_closure(
        &self,
        id: &RequestId,
        claimant: &str,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn release_lease(&self, id: &RequestId, claimant: &str)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProposalRepository: Send + Sync {
    async fn create(
        &self,
        proposal: Proposal,
        guard: RequestGuard,
        log: StatusChange,
    ) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError>;

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Proposal>, RepositoryError>;

    async fn list_for_supplier(&self, supplier_id: &str)
        -> Result<Vec<Proposal>, RepositoryError>;

    async fn apply_transition(
        &self,
        transition: ProposalTransition,
    ) -> Result<Proposal, RepositoryError>;
}

/// Read side of the audit trail. Writes happen only inside request and
/// proposal transactions, so an entry can never exist without its status
/// change having landed.
#[async_trait]
pub trait StatusLogRepository: Send + Sync {
    async fn list_for_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError>;
}
