//! Proposal admission and decision service.
//!
//! Submission is the only operation with a per-supplier slot: one live
//! proposal per `(request, supplier)` pair, enforced by the store's partial
//! unique index rather than a read-then-write precheck. Request-side
//! preconditions are revalidated inside the write through a version guard,
//! so a request that changes under the caller fails the submission instead
//! of admitting a proposal against stale state.

use std::sync::Arc;

use tracing::info;

use procura_core::clock::Clock;
use procura_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use procura_core::domain::request::{Request, RequestId, RequestStatus};
use procura_core::domain::status_log::{Actor, StatusChange};
use procura_core::errors::{DomainError, EngineError};
use procura_core::lifecycle::{next_proposal_status, ProposalAction};
use procura_db::repositories::{
    ProposalRepository, ProposalTransition, RequestGuard, RequestRepository,
};

use crate::store_error;

/// Input for `submit_proposal`. Identity and bookkeeping fields are
/// assigned by the service.
#[derive(Clone, Debug)]
pub struct NewProposal {
    pub request_id: RequestId,
    pub supplier_id: String,
    pub quantity: u32,
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct ProposalAdmission {
    requests: Arc<dyn RequestRepository>,
    proposals: Arc<dyn ProposalRepository>,
    clock: Arc<dyn Clock>,
}

impl ProposalAdmission {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        proposals: Arc<dyn ProposalRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { requests, proposals, clock }
    }

    pub async fn submit_proposal(
        &self,
        new: NewProposal,
        actor: Actor,
    ) -> Result<Proposal, EngineError> {
        let now = self.clock.now();

        if new.quantity == 0 {
            return Err(
                DomainError::InvariantViolation("quantity must be at least 1".to_string()).into()
            );
        }

        let request = self.load_request(&new.request_id).await?;
        if request.status != RequestStatus::Approved {
            return Err(DomainError::RequestNotOpenForProposals { status: request.status }.into());
        }
        if request.is_expired(now) {
            return Err(EngineError::Expired(format!(
                "request `{}` deadline has elapsed",
                request.id.0
            )));
        }

        let proposal = Proposal {
            id: ProposalId::generate(),
            request_id: new.request_id,
            supplier_id: new.supplier_id,
            quantity: new.quantity,
            note: new.note,
            status: ProposalStatus::Submitted,
            row_version: 1,
            created_at: now,
            updated_at: now,
        };
        let log = StatusChange::for_proposal(&proposal.id, None, proposal.status, actor, now);
        let guard = RequestGuard {
            request_id: proposal.request_id.clone(),
            expected_version: request.row_version,
            deadline_after: Some(now),
        };

        self.proposals.create(proposal.clone(), guard, log).await.map_err(store_error)?;
        info!(
            event_name = "proposal.submitted",
            proposal_id = %proposal.id.0,
            request_id = %proposal.request_id.0,
            supplier_id = %proposal.supplier_id,
            "proposal submitted"
        );
        Ok(proposal)
    }

    /// Acceptance is allowed after the request deadline: closure decides the
    /// outcome from whatever was accepted by then, it does not cut off the
    /// owner's ability to decide.
    pub async fn accept_proposal(
        &self,
        id: &ProposalId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Proposal, EngineError> {
        self.decide(id, ProposalAction::Accept, actor, reason).await
    }

    pub async fn reject_proposal(
        &self,
        id: &ProposalId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Proposal, EngineError> {
        self.decide(id, ProposalAction::Reject, actor, reason).await
    }

    /// Supplier-side retraction. Gated only on the proposal still being
    /// submitted; the owning request's state does not matter.
    pub async fn withdraw_proposal(
        &self,
        id: &ProposalId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Proposal, EngineError> {
        let now = self.clock.now();
        let current = self.load_proposal(id).await?;
        let next = next_proposal_status(current.status, ProposalAction::Withdraw)?;

        let mut log = StatusChange::for_proposal(id, Some(current.status), next, actor, now);
        if let Some(reason) = reason {
            log = log.with_reason(reason);
        }

        let applied = self
            .proposals
            .apply_transition(ProposalTransition {
                id: id.clone(),
                expected_version: current.row_version,
                to_status: next,
                touched_at: now,
                log,
                request_guard: None,
            })
            .await
            .map_err(store_error)?;

        info!(
            event_name = "proposal.withdrawn",
            proposal_id = %applied.id.0,
            request_id = %applied.request_id.0,
            "proposal withdrawn"
        );
        Ok(applied)
    }

    pub async fn list_proposals_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Proposal>, EngineError> {
        self.proposals.list_for_request(request_id).await.map_err(store_error)
    }

    pub async fn list_proposals_for_supplier(
        &self,
        supplier_id: &str,
    ) -> Result<Vec<Proposal>, EngineError> {
        self.proposals.list_for_supplier(supplier_id).await.map_err(store_error)
    }

    async fn decide(
        &self,
        id: &ProposalId,
        action: ProposalAction,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Proposal, EngineError> {
        let now = self.clock.now();
        let current = self.load_proposal(id).await?;
        let request = self.load_request(&current.request_id).await?;

        if request.status != RequestStatus::Approved {
            return Err(DomainError::RequestNotOpenForProposals { status: request.status }.into());
        }
        let next = next_proposal_status(current.status, action)?;

        let mut log = StatusChange::for_proposal(id, Some(current.status), next, actor, now);
        if let Some(reason) = reason {
            log = log.with_reason(reason);
        }

        let applied = self
            .proposals
            .apply_transition(ProposalTransition {
                id: id.clone(),
                expected_version: current.row_version,
                to_status: next,
                touched_at: now,
                log,
                request_guard: Some(RequestGuard {
                    request_id: current.request_id.clone(),
                    expected_version: request.row_version,
                    deadline_after: None,
                }),
            })
            .await
            .map_err(store_error)?;

        info!(
            event_name = "proposal.decided",
            proposal_id = %applied.id.0,
            request_id = %applied.request_id.0,
            decision = applied.status.as_str(),
            "proposal decision recorded"
        );
        Ok(applied)
    }

    async fn load_request(&self, id: &RequestId) -> Result<Request, EngineError> {
        self.requests
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| EngineError::request_not_found(id.0.clone()))
    }

    async fn load_proposal(&self, id: &ProposalId) -> Result<Proposal, EngineError> {
        self.proposals
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| EngineError::proposal_not_found(id.0.clone()))
    }
}
