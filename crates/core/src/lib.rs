pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, DatabaseConfig, LoadOptions, LogFormat, LoggingConfig,
    SchedulerConfig,
};
pub use domain::proposal::{Proposal, ProposalId, ProposalStatus};
pub use domain::request::{ProductType, Request, RequestId, RequestStatus};
pub use domain::status_log::{Actor, EntityKind, StatusChange, StatusLogEntry};
pub use errors::{DomainError, EngineError};
pub use lifecycle::{
    next_proposal_status, next_request_status, ClosureOutcome, ProposalAction, RequestAction,
    RESUBMISSION_SWEEP_REASON,
};
