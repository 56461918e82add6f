pub mod doctor;
pub mod migrate;
pub mod run;
pub mod seed;
pub mod tick;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use procura_core::clock::SystemClock;
use procura_core::config::AppConfig;
use procura_db::{
    DbPool, RequestRepository, SqlProposalRepository, SqlRequestRepository, SqlStatusLogRepository,
};
use procura_engine::{ExpirationScheduler, LifecycleEngine};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details: Some(details),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// The production wiring: SQL repositories over one pool, system time.
pub(crate) fn build_scheduler(pool: &DbPool, config: &AppConfig) -> ExpirationScheduler {
    let requests: Arc<dyn RequestRepository> = Arc::new(SqlRequestRepository::new(pool.clone()));
    let engine = LifecycleEngine::new(
        requests.clone(),
        Arc::new(SqlProposalRepository::new(pool.clone())),
        Arc::new(SqlStatusLogRepository::new(pool.clone())),
        Arc::new(SystemClock),
    );
    ExpirationScheduler::new(engine, requests, Arc::new(SystemClock), config.scheduler.clone())
}
