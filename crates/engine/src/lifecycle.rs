//! Request lifecycle service.
//!
//! Validates every request transition against the pure tables in
//! `procura_core::lifecycle`, then applies it through the repository's
//! compare-and-swap write so the status change and its audit entry land in
//! one transaction. Deadline preconditions are evaluated against the
//! injected clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use procura_core::clock::Clock;
use procura_core::domain::request::{ProductType, Request, RequestId, RequestStatus};
use procura_core::domain::status_log::{Actor, EntityKind, StatusChange, StatusLogEntry};
use procura_core::errors::{DomainError, EngineError};
use procura_core::lifecycle::{
    next_request_status, ClosureOutcome, RequestAction, RESUBMISSION_SWEEP_REASON,
};
use procura_db::repositories::{
    ProposalRepository, ProposalSweep, RepositoryError, RequestRepository, RequestTransition,
    StatusLogRepository,
};

use crate::store_error;

/// Input for `create_request`. Identity and bookkeeping fields are assigned
/// by the engine.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub owner_id: String,
    pub product_type: ProductType,
    pub quantity: u32,
    pub promised_delivery_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
}

/// What one `auto_close` call did. Unmet preconditions are reported here
/// instead of as errors so speculative invocation stays harmless.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoCloseDisposition {
    /// This call closed the request.
    Closed { request: Request, outcome: ClosureOutcome },
    /// The request is not approved (anymore); nothing to do.
    SkippedIneligible { status: RequestStatus },
    /// The deadline has not elapsed yet.
    SkippedDeadlineOpen,
    /// A concurrent writer changed the row first; a later call re-evaluates.
    SkippedContended,
}

impl AutoCloseDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed { outcome: ClosureOutcome::Fulfilled, .. } => "closed_fulfilled",
            Self::Closed { outcome: ClosureOutcome::Unfulfilled, .. } => "closed_unfulfilled",
            Self::SkippedIneligible { .. } => "skipped_ineligible",
            Self::SkippedDeadlineOpen => "skipped_deadline_open",
            Self::SkippedContended => "skipped_contended",
        }
    }
}

#[derive(Clone)]
pub struct LifecycleEngine {
    requests: Arc<dyn RequestRepository>,
    proposals: Arc<dyn ProposalRepository>,
    status_log: Arc<dyn StatusLogRepository>,
    clock: Arc<dyn Clock>,
}

impl LifecycleEngine {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        proposals: Arc<dyn ProposalRepository>,
        status_log: Arc<dyn StatusLogRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { requests, proposals, status_log, clock }
    }

    pub async fn create_request(
        &self,
        new: NewRequest,
        actor: Actor,
    ) -> Result<Request, EngineError> {
        let now = self.clock.now();

        if new.quantity == 0 {
            return Err(
                DomainError::InvariantViolation("quantity must be at least 1".to_string()).into()
            );
        }
        if new.promised_delivery_date <= now {
            return Err(EngineError::Expired(
                "promised delivery date must be in the future".to_string(),
            ));
        }
        if new.expiration_date <= new.promised_delivery_date {
            return Err(EngineError::Expired(
                "expiration date must fall after the promised delivery date".to_string(),
            ));
        }

        let request = Request {
            id: RequestId::generate(),
            owner_id: new.owner_id,
            product_type: new.product_type,
            quantity: new.quantity,
            promised_delivery_date: new.promised_delivery_date,
            expiration_date: new.expiration_date,
            status: RequestStatus::Draft,
            lease_owner: None,
            lease_expires_at: None,
            row_version: 1,
            created_at: now,
            updated_at: now,
        };
        let log =
            StatusChange::for_request(&request.id, None, request.status, actor, now);

        self.requests.create(request.clone(), log).await.map_err(store_error)?;
        info!(
            event_name = "request.created",
            request_id = %request.id.0,
            owner_id = %request.owner_id,
            product_type = request.product_type.as_str(),
            "request created"
        );
        Ok(request)
    }

    pub async fn submit_for_approval(
        &self,
        id: &RequestId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Request, EngineError> {
        self.apply_user_transition(id, RequestAction::SubmitForApproval, actor, reason, true)
            .await
    }

    pub async fn approve(
        &self,
        id: &RequestId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Request, EngineError> {
        self.apply_user_transition(id, RequestAction::Approve, actor, reason, true).await
    }

    pub async fn reject(
        &self,
        id: &RequestId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Request, EngineError> {
        self.apply_user_transition(id, RequestAction::Reject, actor, reason, false).await
    }

    pub async fn cancel(
        &self,
        id: &RequestId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Request, EngineError> {
        self.apply_user_transition(id, RequestAction::Cancel, actor, reason, false).await
    }

    /// Reopens a cancelled or rejected request with a replacement deadline.
    /// Still-submitted proposals from the previous round are withdrawn by
    /// the system in the same transaction, freeing their supplier slots.
    pub async fn resubmit(
        &self,
        id: &RequestId,
        new_expiration: DateTime<Utc>,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Request, EngineError> {
        let now = self.clock.now();
        if new_expiration <= now {
            return Err(EngineError::Expired(
                "new expiration date must be strictly in the future".to_string(),
            ));
        }

        let current = self.load(id).await?;
        let next = next_request_status(current.status, RequestAction::Resubmit)?;

        let mut log = StatusChange::for_request(id, Some(current.status), next, actor, now);
        if let Some(reason) = reason {
            log = log.with_reason(reason);
        }

        let applied = self
            .requests
            .apply_transition(RequestTransition {
                id: id.clone(),
                expected_version: current.row_version,
                to_status: next,
                new_expiration: Some(new_expiration),
                touched_at: now,
                log,
                sweep: Some(ProposalSweep {
                    actor: Actor::System,
                    reason: RESUBMISSION_SWEEP_REASON.to_string(),
                }),
            })
            .await
            .map_err(store_error)?;

        info!(
            event_name = "request.resubmitted",
            request_id = %applied.id.0,
            from = current.status.as_str(),
            new_expiration = %new_expiration.to_rfc3339(),
            "request resubmitted with a new deadline"
        );
        Ok(applied)
    }

    /// System closure of an approved request whose deadline has elapsed:
    /// fulfilled iff at least one proposal is accepted at this instant.
    /// Every unmet precondition reports a skip disposition, so repeated or
    /// racing invocations close the request exactly once.
    pub async fn auto_close(&self, id: &RequestId) -> Result<AutoCloseDisposition, EngineError> {
        let now = self.clock.now();
        let current = self.load(id).await?;

        if current.status != RequestStatus::Approved {
            debug!(
                event_name = "request.auto_close_skipped",
                request_id = %id.0,
                status = current.status.as_str(),
                "auto close skipped; request is not approved"
            );
            return Ok(AutoCloseDisposition::SkippedIneligible { status: current.status });
        }
        if !current.is_expired(now) {
            return Ok(AutoCloseDisposition::SkippedDeadlineOpen);
        }

        let proposals = self.proposals.list_for_request(id).await.map_err(store_error)?;
        let outcome = ClosureOutcome::from_proposals(proposals.iter().map(|p| &p.status));
        let to_status = next_request_status(current.status, RequestAction::AutoClose(outcome))?;

        let log = StatusChange::for_request(id, Some(current.status), to_status, Actor::System, now)
            .with_reason(outcome.system_reason());

        let transition = RequestTransition {
            id: id.clone(),
            expected_version: current.row_version,
            to_status,
            new_expiration: None,
            touched_at: now,
            log,
            sweep: None,
        };
        match self.requests.apply_transition(transition).await {
            Ok(request) => {
                info!(
                    event_name = "request.auto_closed",
                    request_id = %request.id.0,
                    to = request.status.as_str(),
                    "request closed past deadline"
                );
                Ok(AutoCloseDisposition::Closed { request, outcome })
            }
            Err(RepositoryError::VersionConflict { .. }) => {
                debug!(
                    event_name = "request.auto_close_skipped",
                    request_id = %id.0,
                    "auto close lost the row to a concurrent writer"
                );
                Ok(AutoCloseDisposition::SkippedContended)
            }
            Err(other) => Err(store_error(other)),
        }
    }

    pub async fn get_request(&self, id: &RequestId) -> Result<Request, EngineError> {
        self.load(id).await
    }

    pub async fn list_requests_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Request>, EngineError> {
        self.requests.list_for_owner(owner_id).await.map_err(store_error)
    }

    /// Entries in application order. Unknown entities yield an empty trail.
    pub async fn get_audit_trail(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<StatusLogEntry>, EngineError> {
        self.status_log.list_for_entity(kind, entity_id).await.map_err(store_error)
    }

    async fn load(&self, id: &RequestId) -> Result<Request, EngineError> {
        self.requests
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| EngineError::request_not_found(id.0.clone()))
    }

    async fn apply_user_transition(
        &self,
        id: &RequestId,
        action: RequestAction,
        actor: Actor,
        reason: Option<String>,
        require_open_deadline: bool,
    ) -> Result<Request, EngineError> {
        let now = self.clock.now();
        let current = self.load(id).await?;
        let next = next_request_status(current.status, action)?;

        if require_open_deadline && current.is_expired(now) {
            return Err(EngineError::Expired(format!(
                "request `{}` deadline has elapsed",
                id.0
            )));
        }

        let mut log = StatusChange::for_request(id, Some(current.status), next, actor, now);
        if let Some(reason) = reason {
            log = log.with_reason(reason);
        }

        let applied = self
            .requests
            .apply_transition(RequestTransition {
                id: id.clone(),
                expected_version: current.row_version,
                to_status: next,
                new_expiration: None,
                touched_at: now,
                log,
                sweep: None,
            })
            .await
            .map_err(store_error)?;

        info!(
            event_name = "request.transition_applied",
            request_id = %applied.id.0,
            from = current.status.as_str(),
            to = applied.status.as_str(),
            "request transition applied"
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use procura_core::clock::{Clock, ManualClock};
    use procura_core::domain::proposal::ProposalStatus;
    use procura_core::domain::request::{ProductType, RequestId, RequestStatus};
    use procura_core::domain::status_log::{Actor, EntityKind};
    use procura_core::lifecycle::ClosureOutcome;
    use procura_db::InMemoryStore;

    use crate::admission::{NewProposal, ProposalAdmission};

    use super::{AutoCloseDisposition, LifecycleEngine, NewRequest};

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn services(store: &InMemoryStore, clock: &ManualClock) -> (LifecycleEngine, ProposalAdmission) {
        let engine = LifecycleEngine::new(
            Arc::new(store.requests()),
            Arc::new(store.proposals()),
            Arc::new(store.status_log()),
            Arc::new(clock.clone()),
        );
        let admission = ProposalAdmission::new(
            Arc::new(store.requests()),
            Arc::new(store.proposals()),
            Arc::new(clock.clone()),
        );
        (engine, admission)
    }

    fn new_request(owner: &str, now: DateTime<Utc>) -> NewRequest {
        NewRequest {
            owner_id: owner.to_string(),
            product_type: ProductType::Hardware,
            quantity: 4,
            promised_delivery_date: now + Duration::days(14),
            expiration_date: now + Duration::days(30),
        }
    }

    async fn approved_request(
        engine: &LifecycleEngine,
        owner: &str,
        now: DateTime<Utc>,
    ) -> RequestId {
        let request = engine
            .create_request(new_request(owner, now), Actor::user(owner))
            .await
            .expect("create request");
        engine
            .submit_for_approval(&request.id, Actor::user(owner), None)
            .await
            .expect("submit for approval");
        engine
            .approve(&request.id, Actor::user("admin-1"), None)
            .await
            .expect("approve");
        request.id
    }

    #[tokio::test]
    async fn create_validates_quantity_and_date_ordering() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let mut zero_quantity = new_request("user-amara", start_time());
        zero_quantity.quantity = 0;
        let error = engine
            .create_request(zero_quantity, Actor::user("user-amara"))
            .await
            .expect_err("zero quantity is refused");
        assert_eq!(error.class(), "validation");

        let mut stale_promise = new_request("user-amara", start_time());
        stale_promise.promised_delivery_date = start_time() - Duration::days(1);
        let error = engine
            .create_request(stale_promise, Actor::user("user-amara"))
            .await
            .expect_err("past promised date is refused");
        assert_eq!(error.class(), "expired");

        let mut inverted = new_request("user-amara", start_time());
        inverted.expiration_date = inverted.promised_delivery_date - Duration::days(1);
        let error = engine
            .create_request(inverted, Actor::user("user-amara"))
            .await
            .expect_err("expiration before promised date is refused");
        assert_eq!(error.class(), "expired");

        let created = engine
            .create_request(new_request("user-amara", start_time()), Actor::user("user-amara"))
            .await
            .expect("valid request is created");
        assert_eq!(created.status, RequestStatus::Draft);
        assert_eq!(created.row_version, 1);

        let trail = engine
            .get_audit_trail(EntityKind::Request, &created.id.0)
            .await
            .expect("audit trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].from_status, None);
        assert_eq!(trail[0].to_status, "draft");
        assert_eq!(trail[0].actor, Actor::user("user-amara"));
    }

    #[tokio::test]
    async fn approval_walk_records_actors_and_reasons() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let request = engine
            .create_request(new_request("user-amara", start_time()), Actor::user("user-amara"))
            .await
            .expect("create");
        engine
            .submit_for_approval(&request.id, Actor::user("user-amara"), None)
            .await
            .expect("submit");
        let approved = engine
            .approve(&request.id, Actor::user("admin-1"), Some("budget confirmed".to_string()))
            .await
            .expect("approve");

        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.row_version, 3);

        let trail = engine
            .get_audit_trail(EntityKind::Request, &request.id.0)
            .await
            .expect("audit trail");
        let statuses: Vec<&str> = trail.iter().map(|entry| entry.to_status.as_str()).collect();
        assert_eq!(statuses, vec!["draft", "pending_approval", "approved"]);
        assert_eq!(trail[2].actor, Actor::user("admin-1"));
        assert_eq!(trail[2].reason.as_deref(), Some("budget confirmed"));
    }

    #[tokio::test]
    async fn wrong_state_operations_fail_typed_without_side_effects() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let request = engine
            .create_request(new_request("user-amara", start_time()), Actor::user("user-amara"))
            .await
            .expect("create");

        let error = engine
            .approve(&request.id, Actor::user("admin-1"), None)
            .await
            .expect_err("draft cannot be approved");
        assert_eq!(error.class(), "invalid_transition");

        let error = engine
            .resubmit(
                &request.id,
                start_time() + Duration::days(10),
                Actor::user("user-amara"),
                None,
            )
            .await
            .expect_err("draft cannot be resubmitted");
        assert_eq!(error.class(), "invalid_transition");

        let trail = engine
            .get_audit_trail(EntityKind::Request, &request.id.0)
            .await
            .expect("audit trail");
        assert_eq!(trail.len(), 1, "failed operations append nothing");

        let missing = engine
            .get_request(&RequestId("req-missing".to_string()))
            .await
            .expect_err("unknown id");
        assert_eq!(missing.class(), "not_found");
    }

    #[tokio::test]
    async fn deadline_gates_submit_and_approve_but_not_cancel() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let request = engine
            .create_request(new_request("user-amara", start_time()), Actor::user("user-amara"))
            .await
            .expect("create");
        engine
            .submit_for_approval(&request.id, Actor::user("user-amara"), None)
            .await
            .expect("submit");

        clock.advance(Duration::days(31));

        let error = engine
            .approve(&request.id, Actor::user("admin-1"), None)
            .await
            .expect_err("expired request cannot be approved");
        assert_eq!(error.class(), "expired");

        let cancelled = engine
            .cancel(&request.id, Actor::user("user-amara"), Some("no longer needed".to_string()))
            .await
            .expect("cancel is allowed past the deadline");
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn closed_requests_accept_no_further_operations() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;

        clock.advance(Duration::days(31));
        let disposition = engine.auto_close(&id).await.expect("auto close");
        assert!(matches!(disposition, AutoCloseDisposition::Closed { .. }));

        let error = engine
            .cancel(&id, Actor::user("user-amara"), None)
            .await
            .expect_err("closed request cannot be cancelled");
        assert_eq!(error.class(), "invalid_transition");

        let error = engine
            .resubmit(&id, clock.now() + Duration::days(7), Actor::user("user-amara"), None)
            .await
            .expect_err("closed request cannot be resubmitted");
        assert_eq!(error.class(), "invalid_transition");
    }

    #[tokio::test]
    async fn auto_close_skips_until_preconditions_hold_then_closes_once() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;

        let open = engine.auto_close(&id).await.expect("deadline still open");
        assert_eq!(open, AutoCloseDisposition::SkippedDeadlineOpen);

        clock.advance(Duration::days(31));
        let closed = engine.auto_close(&id).await.expect("first close");
        match closed {
            AutoCloseDisposition::Closed { request, outcome } => {
                assert_eq!(outcome, ClosureOutcome::Unfulfilled);
                assert_eq!(request.status, RequestStatus::ClosedUnfulfilled);
            }
            other => panic!("expected closure, got {other:?}"),
        }

        let repeat = engine.auto_close(&id).await.expect("second close is a no-op");
        assert_eq!(
            repeat,
            AutoCloseDisposition::SkippedIneligible { status: RequestStatus::ClosedUnfulfilled }
        );

        let trail = engine
            .get_audit_trail(EntityKind::Request, &id.0)
            .await
            .expect("audit trail");
        let closures: Vec<_> =
            trail.iter().filter(|entry| entry.to_status == "closed_unfulfilled").collect();
        assert_eq!(closures.len(), 1, "exactly one closure entry");
        assert_eq!(closures[0].actor, Actor::System);
        assert_eq!(
            closures[0].reason.as_deref(),
            Some("deadline elapsed with no accepted proposal")
        );
    }

    #[tokio::test]
    async fn auto_close_fulfills_when_any_proposal_is_accepted() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, admission) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;

        let accepted = admission
            .submit_proposal(
                NewProposal {
                    request_id: id.clone(),
                    supplier_id: "sup-norsk".to_string(),
                    quantity: 4,
                    note: None,
                },
                Actor::user("sup-norsk"),
            )
            .await
            .expect("submit proposal");
        admission
            .accept_proposal(&accepted.id, Actor::user("user-amara"), None)
            .await
            .expect("accept proposal");
        admission
            .submit_proposal(
                NewProposal {
                    request_id: id.clone(),
                    supplier_id: "sup-helix".to_string(),
                    quantity: 2,
                    note: Some("partial coverage".to_string()),
                },
                Actor::user("sup-helix"),
            )
            .await
            .expect("second proposal stays submitted");

        clock.advance(Duration::days(31));
        let disposition = engine.auto_close(&id).await.expect("auto close");
        match disposition {
            AutoCloseDisposition::Closed { request, outcome } => {
                assert_eq!(outcome, ClosureOutcome::Fulfilled);
                assert_eq!(request.status, RequestStatus::ClosedFulfilled);
            }
            other => panic!("expected fulfilled closure, got {other:?}"),
        }

        let trail = engine
            .get_audit_trail(EntityKind::Request, &id.0)
            .await
            .expect("audit trail");
        let last = trail.last().expect("closure entry");
        assert_eq!(
            last.reason.as_deref(),
            Some("deadline elapsed with at least one accepted proposal")
        );
    }

    #[tokio::test]
    async fn racing_auto_close_applies_exactly_one_status_change() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;
        clock.advance(Duration::days(31));

        let (first, second) = tokio::join!(engine.auto_close(&id), engine.auto_close(&id));
        let dispositions = [first.expect("first call"), second.expect("second call")];

        let closed = dispositions
            .iter()
            .filter(|disposition| matches!(disposition, AutoCloseDisposition::Closed { .. }))
            .count();
        assert_eq!(closed, 1, "exactly one racer closes the request");

        let trail = engine
            .get_audit_trail(EntityKind::Request, &id.0)
            .await
            .expect("audit trail");
        assert_eq!(trail.len(), 4, "create, submit, approve, one closure");
    }

    #[tokio::test]
    async fn resubmit_requires_a_future_deadline() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let request = engine
            .create_request(new_request("user-amara", start_time()), Actor::user("user-amara"))
            .await
            .expect("create");
        engine
            .cancel(&request.id, Actor::user("user-amara"), None)
            .await
            .expect("cancel");

        let error = engine
            .resubmit(&request.id, clock.now(), Actor::user("user-amara"), None)
            .await
            .expect_err("deadline at now is refused");
        assert_eq!(error.class(), "expired");

        let reopened = engine
            .resubmit(
                &request.id,
                clock.now() + Duration::days(21),
                Actor::user("user-amara"),
                None,
            )
            .await
            .expect("future deadline is accepted");
        assert_eq!(reopened.status, RequestStatus::PendingApproval);
        assert_eq!(reopened.expiration_date, clock.now() + Duration::days(21));
    }

    #[tokio::test]
    async fn resubmit_sweeps_open_proposals_and_keeps_decided_ones() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, admission) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;

        let open = admission
            .submit_proposal(
                NewProposal {
                    request_id: id.clone(),
                    supplier_id: "sup-norsk".to_string(),
                    quantity: 4,
                    note: None,
                },
                Actor::user("sup-norsk"),
            )
            .await
            .expect("open proposal");
        let decided = admission
            .submit_proposal(
                NewProposal {
                    request_id: id.clone(),
                    supplier_id: "sup-helix".to_string(),
                    quantity: 4,
                    note: None,
                },
                Actor::user("sup-helix"),
            )
            .await
            .expect("decided proposal");
        admission
            .reject_proposal(&decided.id, Actor::user("user-amara"), None)
            .await
            .expect("reject proposal");

        engine
            .cancel(&id, Actor::user("user-amara"), None)
            .await
            .expect("cancel");
        engine
            .resubmit(&id, clock.now() + Duration::days(30), Actor::user("user-amara"), None)
            .await
            .expect("resubmit");

        let proposals =
            admission.list_proposals_for_request(&id).await.expect("list proposals");
        let by_supplier: Vec<(&str, ProposalStatus)> = proposals
            .iter()
            .map(|proposal| (proposal.supplier_id.as_str(), proposal.status))
            .collect();
        assert!(by_supplier.contains(&("sup-norsk", ProposalStatus::Withdrawn)));
        assert!(by_supplier.contains(&("sup-helix", ProposalStatus::Rejected)));

        let sweep_trail = engine
            .get_audit_trail(EntityKind::Proposal, &open.id.0)
            .await
            .expect("swept proposal trail");
        let sweep_entry = sweep_trail.last().expect("sweep entry");
        assert_eq!(sweep_entry.to_status, "withdrawn");
        assert_eq!(sweep_entry.actor, Actor::System);
        assert_eq!(sweep_entry.reason.as_deref(), Some("request resubmitted for approval"));

        // The freed slot accepts the supplier again in the new round.
        engine.approve(&id, Actor::user("admin-1"), None).await.expect("re-approve");
        admission
            .submit_proposal(
                NewProposal {
                    request_id: id.clone(),
                    supplier_id: "sup-norsk".to_string(),
                    quantity: 2,
                    note: None,
                },
                Actor::user("sup-norsk"),
            )
            .await
            .expect("slot is free after the sweep");
    }

    #[tokio::test]
    async fn owner_listing_is_newest_first() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);

        let first = engine
            .create_request(new_request("user-amara", clock.now()), Actor::user("user-amara"))
            .await
            .expect("first");
        clock.advance(Duration::hours(1));
        let second = engine
            .create_request(new_request("user-amara", clock.now()), Actor::user("user-amara"))
            .await
            .expect("second");
        engine
            .create_request(new_request("user-bode", clock.now()), Actor::user("user-bode"))
            .await
            .expect("other owner");

        let mine = engine
            .list_requests_for_owner("user-amara")
            .await
            .expect("owner listing");
        let ids: Vec<&RequestId> = mine.iter().map(|request| &request.id).collect();
        assert_eq!(ids, vec![&second.id, &first.id]);
    }

    #[tokio::test]
    async fn conflicting_user_writes_lose_loudly() {
        let clock = ManualClock::new(start_time());
        let store = InMemoryStore::new();
        let (engine, _) = services(&store, &clock);
        let id = approved_request(&engine, "user-amara", start_time()).await;
        clock.advance(Duration::days(31));

        // The scheduler closes the request between this caller's read and
        // write; the caller's cancel must fail typed, not overwrite.
        let (cancelled, closed) = tokio::join!(
            engine.cancel(&id, Actor::user("user-amara"), None),
            engine.auto_close(&id)
        );

        let request = engine.get_request(&id).await.expect("request");
        match (cancelled, closed) {
            (Ok(request_after_cancel), Ok(disposition)) => {
                // Cancel won the race; the closure call must have skipped.
                assert_eq!(request_after_cancel.status, RequestStatus::Cancelled);
                assert_ne!(disposition.label(), "closed_unfulfilled");
                assert_eq!(request.status, RequestStatus::Cancelled);
            }
            (Err(error), Ok(disposition)) => {
                assert!(matches!(error.class(), "conflict" | "invalid_transition"));
                assert!(matches!(disposition, AutoCloseDisposition::Closed { .. }));
                assert_eq!(request.status, RequestStatus::ClosedUnfulfilled);
            }
            (cancel_outcome, close_outcome) => {
                panic!("unexpected race outcome: {cancel_outcome:?} / {close_outcome:?}")
            }
        }
    }
}
