pub mod admission;
pub mod lifecycle;
pub mod scheduler;

pub use admission::{NewProposal, ProposalAdmission};
pub use lifecycle::{AutoCloseDisposition, LifecycleEngine, NewRequest};
pub use scheduler::{ExpirationScheduler, TickReport};

use procura_core::errors::EngineError;
use procura_db::repositories::RepositoryError;

/// Maps storage failures onto the caller-facing taxonomy. Lock and pool
/// contention surface as `Busy`; version conflicts as `Conflict`.
pub(crate) fn store_error(error: RepositoryError) -> EngineError {
    match error {
        RepositoryError::Database(sqlx::Error::PoolTimedOut) => {
            EngineError::Busy("connection pool timed out".to_string())
        }
        RepositoryError::Database(sqlx::Error::Database(db_error))
            if database_is_locked(db_error.as_ref()) =>
        {
            EngineError::Busy(db_error.to_string())
        }
        RepositoryError::Database(db_error) => EngineError::Persistence(db_error.to_string()),
        RepositoryError::Decode(message) => EngineError::Persistence(message),
        RepositoryError::NotFound { kind, id } => EngineError::NotFound { kind, id },
        RepositoryError::VersionConflict { kind, id } => {
            EngineError::Conflict(format!("{} `{id}` was changed by another writer", kind.as_str()))
        }
        RepositoryError::DuplicateProposal { request_id, supplier_id } => {
            EngineError::DuplicateProposal { request_id: request_id.0, supplier_id }
        }
    }
}

// SQLITE_BUSY is 5, SQLITE_LOCKED is 6.
fn database_is_locked(error: &dyn sqlx::error::DatabaseError) -> bool {
    matches!(error.code().as_deref(), Some("5") | Some("6"))
        || error.message().contains("database is locked")
}
