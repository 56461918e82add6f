//! Request and proposal state machines.
//!
//! Transition validity lives here as pure functions over `(status, action)`
//! pairs so the tables can be tested without a store or clock. Callers apply
//! the returned status together with an audit append in one storage
//! transaction.

use crate::domain::proposal::ProposalStatus;
use crate::domain::request::RequestStatus;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestAction {
    SubmitForApproval,
    Approve,
    Reject,
    Cancel,
    Resubmit,
    AutoClose(ClosureOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalAction {
    Accept,
    Reject,
    Withdraw,
}

/// Verdict of the automatic closure decision for an expired request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosureOutcome {
    Fulfilled,
    Unfulfilled,
}

impl ClosureOutcome {
    /// Fulfilled iff at least one proposal was accepted. Quantities play no
    /// part in the decision.
    pub fn from_proposals<'a>(statuses: impl IntoIterator<Item = &'a ProposalStatus>) -> Self {
        let accepted =
            statuses.into_iter().any(|status| matches!(status, ProposalStatus::Accepted));
        if accepted {
            Self::Fulfilled
        } else {
            Self::Unfulfilled
        }
    }

    pub fn terminal_status(&self) -> RequestStatus {
        match self {
            Self::Fulfilled => RequestStatus::ClosedFulfilled,
            Self::Unfulfilled => RequestStatus::ClosedUnfulfilled,
        }
    }

    /// Audit reason recorded when the scheduler closes the request.
    pub fn system_reason(&self) -> &'static str {
        match self {
            Self::Fulfilled => "deadline elapsed with at least one accepted proposal",
            Self::Unfulfilled => "deadline elapsed with no accepted proposal",
        }
    }
}

/// Audit reason recorded on proposals withdrawn by a resubmission sweep.
pub const RESUBMISSION_SWEEP_REASON: &str = "request resubmitted for approval";

pub fn next_request_status(
    current: RequestStatus,
    action: RequestAction,
) -> Result<RequestStatus, DomainError> {
    match (current, action) {
        (RequestStatus::Draft, RequestAction::SubmitForApproval) => {
            Ok(RequestStatus::PendingApproval)
        }
        (RequestStatus::PendingApproval, RequestAction::Approve) => Ok(RequestStatus::Approved),
        (RequestStatus::PendingApproval, RequestAction::Reject) => Ok(RequestStatus::Rejected),
        (status, RequestAction::Cancel) if !status.is_terminal() => Ok(RequestStatus::Cancelled),
        (RequestStatus::Cancelled | RequestStatus::Rejected, RequestAction::Resubmit) => {
            Ok(RequestStatus::PendingApproval)
        }
        (RequestStatus::Approved, RequestAction::AutoClose(outcome)) => {
            Ok(outcome.terminal_status())
        }
        (status, action) => Err(DomainError::InvalidRequestTransition { from: status, action }),
    }
}

pub fn next_proposal_status(
    current: ProposalStatus,
    action: ProposalAction,
) -> Result<ProposalStatus, DomainError> {
    match (current, action) {
        (ProposalStatus::Submitted, ProposalAction::Accept) => Ok(ProposalStatus::Accepted),
        (ProposalStatus::Submitted, ProposalAction::Reject) => Ok(ProposalStatus::Rejected),
        (ProposalStatus::Submitted, ProposalAction::Withdraw) => Ok(ProposalStatus::Withdrawn),
        (status, action) => Err(DomainError::InvalidProposalTransition { from: status, action }),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        next_proposal_status, next_request_status, ClosureOutcome, ProposalAction, RequestAction,
    };
    use crate::domain::proposal::ProposalStatus;
    use crate::domain::request::RequestStatus;
    use crate::errors::DomainError;

    #[test]
    fn happy_path_walks_create_to_fulfilled_closure() {
        let pending =
            next_request_status(RequestStatus::Draft, RequestAction::SubmitForApproval)
                .expect("draft -> pending");
        let approved =
            next_request_status(pending, RequestAction::Approve).expect("pending -> approved");
        let closed = next_request_status(
            approved,
            RequestAction::AutoClose(ClosureOutcome::Fulfilled),
        )
        .expect("approved -> closed");

        assert_eq!(closed, RequestStatus::ClosedFulfilled);
    }

    #[test]
    fn rejection_branch_leaves_pending_approval() {
        let rejected = next_request_status(RequestStatus::PendingApproval, RequestAction::Reject)
            .expect("pending -> rejected");
        assert_eq!(rejected, RequestStatus::Rejected);
    }

    #[test]
    fn cancel_is_allowed_from_every_non_terminal_status() {
        for status in
            [RequestStatus::Draft, RequestStatus::PendingApproval, RequestStatus::Approved]
        {
            let next = next_request_status(status, RequestAction::Cancel)
                .expect("non-terminal statuses accept cancel");
            assert_eq!(next, RequestStatus::Cancelled);
        }
    }

    #[test]
    fn cancel_is_rejected_from_terminal_statuses() {
        for status in [
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::ClosedFulfilled,
            RequestStatus::ClosedUnfulfilled,
        ] {
            let error = next_request_status(status, RequestAction::Cancel)
                .expect_err("terminal statuses reject cancel");
            assert!(matches!(error, DomainError::InvalidRequestTransition { .. }));
        }
    }

    #[test]
    fn resubmit_reopens_cancelled_and_rejected_only() {
        for status in [RequestStatus::Cancelled, RequestStatus::Rejected] {
            let next = next_request_status(status, RequestAction::Resubmit)
                .expect("cancelled/rejected accept resubmit");
            assert_eq!(next, RequestStatus::PendingApproval);
        }

        for status in [
            RequestStatus::Draft,
            RequestStatus::PendingApproval,
            RequestStatus::Approved,
            RequestStatus::ClosedFulfilled,
            RequestStatus::ClosedUnfulfilled,
        ] {
            next_request_status(status, RequestAction::Resubmit)
                .expect_err("only cancelled/rejected accept resubmit");
        }
    }

    #[test]
    fn auto_close_requires_approved() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::PendingApproval,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::ClosedFulfilled,
            RequestStatus::ClosedUnfulfilled,
        ] {
            next_request_status(status, RequestAction::AutoClose(ClosureOutcome::Unfulfilled))
                .expect_err("auto close only applies to approved requests");
        }
    }

    #[test]
    fn closed_statuses_accept_no_action_at_all() {
        let actions = [
            RequestAction::SubmitForApproval,
            RequestAction::Approve,
            RequestAction::Reject,
            RequestAction::Cancel,
            RequestAction::Resubmit,
            RequestAction::AutoClose(ClosureOutcome::Fulfilled),
        ];

        for status in [RequestStatus::ClosedFulfilled, RequestStatus::ClosedUnfulfilled] {
            for action in actions {
                next_request_status(status, action)
                    .expect_err("closed requests never transition again");
            }
        }
    }

    #[test]
    fn transition_table_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(
                next_request_status(RequestStatus::Draft, RequestAction::SubmitForApproval),
                Ok(RequestStatus::PendingApproval)
            );
        }
    }

    #[test]
    fn proposals_transition_only_out_of_submitted() {
        assert_eq!(
            next_proposal_status(ProposalStatus::Submitted, ProposalAction::Accept),
            Ok(ProposalStatus::Accepted)
        );
        assert_eq!(
            next_proposal_status(ProposalStatus::Submitted, ProposalAction::Reject),
            Ok(ProposalStatus::Rejected)
        );
        assert_eq!(
            next_proposal_status(ProposalStatus::Submitted, ProposalAction::Withdraw),
            Ok(ProposalStatus::Withdrawn)
        );

        for status in
            [ProposalStatus::Accepted, ProposalStatus::Rejected, ProposalStatus::Withdrawn]
        {
            for action in [ProposalAction::Accept, ProposalAction::Reject, ProposalAction::Withdraw]
            {
                next_proposal_status(status, action)
                    .expect_err("decided proposals never transition again");
            }
        }
    }

    #[test]
    fn closure_outcome_checks_for_any_acceptance() {
        let none: [ProposalStatus; 0] = [];
        assert_eq!(ClosureOutcome::from_proposals(none.iter()), ClosureOutcome::Unfulfilled);

        let undecided = [ProposalStatus::Submitted, ProposalStatus::Rejected];
        assert_eq!(ClosureOutcome::from_proposals(undecided.iter()), ClosureOutcome::Unfulfilled);

        let one_accepted =
            [ProposalStatus::Rejected, ProposalStatus::Accepted, ProposalStatus::Withdrawn];
        assert_eq!(ClosureOutcome::from_proposals(one_accepted.iter()), ClosureOutcome::Fulfilled);
    }

    #[test]
    fn system_reasons_name_the_closure_verdict() {
        assert!(ClosureOutcome::Fulfilled.system_reason().contains("at least one accepted"));
        assert!(ClosureOutcome::Unfulfilled.system_reason().contains("no accepted"));
        assert_ne!(
            ClosureOutcome::Fulfilled.system_reason(),
            ClosureOutcome::Unfulfilled.system_reason()
        );
    }

    #[test]
    fn multiple_acceptances_still_close_fulfilled() {
        let several = [ProposalStatus::Accepted, ProposalStatus::Accepted];
        assert_eq!(ClosureOutcome::from_proposals(several.iter()), ClosureOutcome::Fulfilled);
        assert_eq!(ClosureOutcome::Fulfilled.terminal_status(), RequestStatus::ClosedFulfilled);
        assert_eq!(
            ClosureOutcome::Unfulfilled.terminal_status(),
            RequestStatus::ClosedUnfulfilled
        );
    }
}
