use thiserror::Error;

use crate::domain::proposal::ProposalStatus;
use crate::domain::request::RequestStatus;
use crate::domain::status_log::EntityKind;
use crate::lifecycle::{ProposalAction, RequestAction};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request transition from {from:?} via {action:?}")]
    InvalidRequestTransition { from: RequestStatus, action: RequestAction },
    #[error("invalid proposal transition from {from:?} via {action:?}")]
    InvalidProposalTransition { from: ProposalStatus, action: ProposalAction },
    #[error("request is {status:?}; proposals require an approved request")]
    RequestNotOpenForProposals { status: RequestStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Service-level failure taxonomy reported to callers. Every variant maps to
/// a stable `class()` label used in command output and log fields.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{} `{id}` not found", kind.as_str())]
    NotFound { kind: EntityKind, id: String },
    #[error("deadline constraint violated: {0}")]
    Expired(String),
    #[error("supplier `{supplier_id}` already has an active proposal for request `{request_id}`")]
    DuplicateProposal { request_id: String, supplier_id: String },
    #[error("concurrent modification detected: {0}")]
    Conflict(String),
    #[error("storage busy: {0}")]
    Busy(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn request_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: EntityKind::Request, id: id.into() }
    }

    pub fn proposal_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: EntityKind::Proposal, id: id.into() }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvariantViolation(_)) => "validation",
            Self::Domain(_) => "invalid_transition",
            Self::NotFound { .. } => "not_found",
            Self::Expired(_) => "expired",
            Self::DuplicateProposal { .. } => "duplicate_proposal",
            Self::Conflict(_) => "conflict",
            Self::Busy(_) => "busy",
            Self::Persistence(_) => "persistence",
        }
    }
}
