use procura_core::config::{AppConfig, LoadOptions};
use procura_db::{connect_with_settings, migrations};
use procura_engine::TickReport;
use serde_json::Value;

use crate::commands::{build_scheduler, CommandResult};
use crate::logging;

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "tick",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    logging::init(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "tick",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let scheduler = build_scheduler(&pool, &config);
        let report =
            scheduler.run_tick().await.map_err(|error| (error.class(), error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<TickReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => CommandResult::success_with_details(
            "tick",
            format!(
                "closure sweep finished as `{}`: processed {}, closed {}",
                config.scheduler.instance,
                report.processed,
                report.closed()
            ),
            serde_json::to_value(report).unwrap_or(Value::Null),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("tick", error_class, message, exit_code)
        }
    }
}
