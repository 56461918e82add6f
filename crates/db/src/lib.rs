pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedReport, VerificationResult};
pub use repositories::{
    InMemoryProposalRepository, InMemoryRequestRepository, InMemoryStatusLogRepository,
    InMemoryStore, ProposalRepository, ProposalSweep, ProposalTransition, RepositoryError,
    RequestGuard, RequestRepository, RequestTransition, SqlProposalRepository,
    SqlRequestRepository, SqlStatusLogRepository, StatusLogRepository,
};
