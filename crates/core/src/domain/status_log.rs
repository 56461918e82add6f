use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::proposal::{ProposalId, ProposalStatus};
use crate::domain::request::{RequestId, RequestStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Request,
    Proposal,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Proposal => "proposal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "request" => Some(Self::Request),
            "proposal" => Some(Self::Proposal),
            _ => None,
        }
    }
}

/// Who applied a transition. Stored as a nullable user id; `System` covers
/// scheduler-driven transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    User(String),
    System,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn as_user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::System => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::User(id) => id,
            Self::System => "system",
        }
    }
}

/// One immutable audit record. `id` is assigned by the store in application
/// order, so ordering by it reproduces the transition history exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Write-side payload for one audit append. Constructed from typed statuses
/// so the log only ever contains enumerated encodings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn for_request(
        id: &RequestId,
        from: Option<RequestStatus>,
        to: RequestStatus,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind: EntityKind::Request,
            entity_id: id.0.clone(),
            from_status: from.map(|status| status.as_str().to_string()),
            to_status: to.as_str().to_string(),
            actor,
            reason: None,
            occurred_at,
        }
    }

    pub fn for_proposal(
        id: &ProposalId,
        from: Option<ProposalStatus>,
        to: ProposalStatus,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind: EntityKind::Proposal,
            entity_id: id.0.clone(),
            from_status: from.map(|status| status.as_str().to_string()),
            to_status: to.as_str().to_string(),
            actor,
            reason: None,
            occurred_at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
