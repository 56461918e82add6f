use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use procura_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use procura_core::domain::request::{Request, RequestId, RequestStatus};
use procura_core::domain::status_log::{EntityKind, StatusChange, StatusLogEntry};

use super::{
    ProposalRepository, ProposalTransition, RepositoryError, RequestGuard, RequestRepository,
    RequestTransition, StatusLogRepository,
};

/// Shared backing state for the in-memory repositories. One lock covers all
/// three tables, so a request transition, its proposal sweep, and the audit
/// appends stay atomic the same way the SQL transactions keep them.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> InMemoryRequestRepository {
        InMemoryRequestRepository { state: Arc::clone(&self.state) }
    }

    pub fn proposals(&self) -> InMemoryProposalRepository {
        InMemoryProposalRepository { state: Arc::clone(&self.state) }
    }

    pub fn status_log(&self) -> InMemoryStatusLogRepository {
        InMemoryStatusLogRepository { state: Arc::clone(&self.state) }
    }
}

pub struct InMemoryRequestRepository {
    state: Arc<RwLock<MemoryState>>,
}

pub struct InMemoryProposalRepository {
    state: Arc<RwLock<MemoryState>>,
}

pub struct InMemoryStatusLogRepository {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    requests: HashMap<String, Request>,
    proposals: HashMap<String, Proposal>,
    log: Vec<StatusLogEntry>,
    next_log_id: i64,
}

fn push_entry(state: &mut MemoryState, change: &StatusChange) {
    state.next_log_id += 1;
    state.log.push(StatusLogEntry {
        id: state.next_log_id,
        entity_kind: change.entity_kind,
        entity_id: change.entity_id.clone(),
        from_status: change.from_status.clone(),
        to_status: change.to_status.clone(),
        actor: change.actor.clone(),
        reason: change.reason.clone(),
        occurred_at: change.occurred_at,
    });
}

/// Mirrors the guarded request touch the SQL store runs inside proposal
/// transactions. Validation only; the version bump happens at commit time.
fn check_guard(state: &MemoryState, guard: &RequestGuard) -> Result<(), RepositoryError> {
    let request = state.requests.get(&guard.request_id.0).ok_or_else(|| {
        RepositoryError::NotFound {
            kind: EntityKind::Request,
            id: guard.request_id.0.clone(),
        }
    })?;

    let holds = request.row_version == guard.expected_version
        && request.status == RequestStatus::Approved
        && guard.deadline_after.map_or(true, |after| request.expiration_date > after);
    if holds {
        Ok(())
    } else {
        Err(RepositoryError::VersionConflict {
            kind: EntityKind::Request,
            id: guard.request_id.0.clone(),
        })
    }
}

fn bump_guarded_request(state: &mut MemoryState, guard: &RequestGuard) {
    if let Some(request) = state.requests.get_mut(&guard.request_id.0) {
        request.row_version += 1;
    }
}

fn lease_open_for(request: &Request, claimant: &str, now: DateTime<Utc>) -> bool {
    match (&request.lease_owner, request.lease_expires_at) {
        (None, _) => true,
        (Some(owner), _) if owner == claimant => true,
        (Some(_), Some(expires_at)) => expires_at <= now,
        (Some(_), None) => false,
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn create(&self, request: Request, log: StatusChange) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.requests.insert(request.id.0.clone(), request);
        push_entry(&mut state, &log);
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let state = self.state.read().await;
        let mut requests: Vec<Request> = state
            .requests
            .values()
            .filter(|request| request.owner_id == owner_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(requests)
    }

    async fn apply_transition(
        &self,
        transition: RequestTransition,
    ) -> Result<Request, RepositoryError> {
        let mut state = self.state.write().await;

        let current = state.requests.get(&transition.id.0).cloned().ok_or_else(|| {
            RepositoryError::NotFound {
                kind: EntityKind::Request,
                id: transition.id.0.clone(),
            }
        })?;
        if current.row_version != transition.expected_version {
            return Err(RepositoryError::VersionConflict {
                kind: EntityKind::Request,
                id: transition.id.0.clone(),
            });
        }

        let mut updated = current;
        updated.status = transition.to_status;
        if let Some(new_expiration) = transition.new_expiration {
            updated.expiration_date = new_expiration;
        }
        updated.row_version += 1;
        updated.updated_at = transition.touched_at;
        updated.lease_owner = None;
        updated.lease_expires_at = None;
        state.requests.insert(updated.id.0.clone(), updated.clone());
        push_entry(&mut state, &transition.log);

        if let Some(sweep) = &transition.sweep {
            let mut open: Vec<(DateTime<Utc>, String)> = state
                .proposals
                .values()
                .filter(|proposal| {
                    proposal.request_id == transition.id
                        && proposal.status == ProposalStatus::Submitted
                })
                .map(|proposal| (proposal.created_at, proposal.id.0.clone()))
                .collect();
            open.sort();

            for (_, proposal_id) in open {
                if let Some(proposal) = state.proposals.get_mut(&proposal_id) {
                    proposal.status = ProposalStatus::Withdrawn;
                    proposal.row_version += 1;
                    proposal.updated_at = transition.touched_at;
                }
                let change = StatusChange::for_proposal(
                    &ProposalId(proposal_id),
                    Some(ProposalStatus::Submitted),
                    ProposalStatus::Withdrawn,
                    sweep.actor.clone(),
                    transition.touched_at,
                )
                .with_reason(sweep.reason.clone());
                push_entry(&mut state, &change);
            }
        }

        Ok(updated)
    }

    async fn list_closure_candidates(
        &self,
        now: DateTime<Utc>,
        claimant: &str,
        limit: u32,
    ) -> Result<Vec<Request>, RepositoryError> {
        let state = self.state.read().await;
        let mut candidates: Vec<Request> = state
            .requests
            .values()
            .filter(|request| {
                request.status == RequestStatus::Approved
                    && request.expiration_date <= now
                    && lease_open_for(request, claimant, now)
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.expiration_date.cmp(&b.expiration_date).then_with(|| a.id.0.cmp(&b.id.0))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn claim_for_closure(
        &self,
        id: &RequestId,
        claimant: &str,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(request) = state.requests.get_mut(&id.0) else {
            return Ok(false);
        };
        let claimable = request.status == RequestStatus::Approved
            && request.expiration_date <= now
            && lease_open_for(request, claimant, now);
        if !claimable {
            return Ok(false);
        }
        request.lease_owner = Some(claimant.to_string());
        request.lease_expires_at = Some(lease_until);
        Ok(true)
    }

    async fn release_lease(
        &self,
        id: &RequestId,
        claimant: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(request) = state.requests.get_mut(&id.0) {
            if request.lease_owner.as_deref() == Some(claimant) {
                request.lease_owner = None;
                request.lease_expires_at = None;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProposalRepository for InMemoryProposalRepository {
    async fn create(
        &self,
        proposal: Proposal,
        guard: RequestGuard,
        log: StatusChange,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        check_guard(&state, &guard)?;

        let occupied = state.proposals.values().any(|existing| {
            existing.request_id == proposal.request_id
                && existing.supplier_id == proposal.supplier_id
                && existing.status.occupies_slot()
        });
        if occupied {
            return Err(RepositoryError::DuplicateProposal {
                request_id: proposal.request_id.clone(),
                supplier_id: proposal.supplier_id.clone(),
            });
        }

        bump_guarded_request(&mut state, &guard);
        state.proposals.insert(proposal.id.0.clone(), proposal);
        push_entry(&mut state, &log);
        Ok(())
    }

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.proposals.get(&id.0).cloned())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let state = self.state.read().await;
        let mut proposals: Vec<Proposal> = state
            .proposals
            .values()
            .filter(|proposal| proposal.request_id == *request_id)
            .cloned()
            .collect();
        proposals.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(proposals)
    }

    async fn list_for_supplier(
        &self,
        supplier_id: &str,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let state = self.state.read().await;
        let mut proposals: Vec<Proposal> = state
            .proposals
            .values()
            .filter(|proposal| proposal.supplier_id == supplier_id)
            .cloned()
            .collect();
        proposals.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(proposals)
    }

    async fn apply_transition(
        &self,
        transition: ProposalTransition,
    ) -> Result<Proposal, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(guard) = &transition.request_guard {
            check_guard(&state, guard)?;
        }

        let current = state.proposals.get(&transition.id.0).cloned().ok_or_else(|| {
            RepositoryError::NotFound {
                kind: EntityKind::Proposal,
                id: transition.id.0.clone(),
            }
        })?;
        if current.row_version != transition.expected_version {
            return Err(RepositoryError::VersionConflict {
                kind: EntityKind::Proposal,
                id: transition.id.0.clone(),
            });
        }

        if let Some(guard) = &transition.request_guard {
            bump_guarded_request(&mut state, guard);
        }

        let mut updated = current;
        updated.status = transition.to_status;
        updated.row_version += 1;
        updated.updated_at = transition.touched_at;
        state.proposals.insert(updated.id.0.clone(), updated.clone());
        push_entry(&mut state, &transition.log);

        Ok(updated)
    }
}

#[async_trait::async_trait]
impl StatusLogRepository for InMemoryStatusLogRepository {
    async fn list_for_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<StatusLogEntry> = state
            .log
            .iter()
            .filter(|entry| entry.entity_kind == kind && entry.entity_id == entity_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }
}
