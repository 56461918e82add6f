use std::time::Duration;

use procura_core::config::{AppConfig, LoadOptions};
use procura_db::{connect_with_settings, migrations};
use procura_engine::TickReport;
use serde::Serialize;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::commands::{build_scheduler, CommandResult};
use crate::logging;

#[derive(Debug, Default, Serialize)]
struct RunTotals {
    ticks: u64,
    closed_fulfilled: u64,
    closed_unfulfilled: u64,
    skipped: u64,
    failed: u64,
    failed_ticks: u64,
}

impl RunTotals {
    fn absorb(&mut self, report: TickReport) {
        self.ticks += 1;
        self.closed_fulfilled += u64::from(report.closed_fulfilled);
        self.closed_unfulfilled += u64::from(report.closed_unfulfilled);
        self.skipped += u64::from(report.skipped);
        self.failed += u64::from(report.failed);
    }
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "run",
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
                "run",
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
        info!(
            event_name = "scheduler.loop_started",
            instance = %config.scheduler.instance,
            tick_interval_secs = config.scheduler.tick_interval_secs,
            batch_size = config.scheduler.batch_size,
            "scheduler loop started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(config.scheduler.tick_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut totals = RunTotals::default();
        let shutdown = loop {
            tokio::select! {
                _ = interval.tick() => {
                    match scheduler.run_tick().await {
                        Ok(report) => totals.absorb(report),
                        Err(error) => {
                            totals.failed_ticks += 1;
                            warn!(
                                event_name = "scheduler.tick_failed",
                                class = error.class(),
                                error = %error,
                                "tick failed; the loop continues"
                            );
                        }
                    }
                }
                signal = tokio::signal::ctrl_c() => break signal,
            }
        };
        shutdown.map_err(|error| {
            ("signal_handler", format!("failed to listen for shutdown: {error}"), 3u8)
        })?;

        info!(
            event_name = "scheduler.loop_stopped",
            instance = %config.scheduler.instance,
            ticks = totals.ticks,
            "shutdown signal received; scheduler loop stopped"
        );
        pool.close().await;
        Ok::<RunTotals, (&'static str, String, u8)>(totals)
    });

    match result {
        Ok(totals) => CommandResult::success_with_details(
            "run",
            format!(
                "scheduler `{}` stopped after {} ticks",
                config.scheduler.instance, totals.ticks
            ),
            serde_json::to_value(totals).unwrap_or(Value::Null),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("run", error_class, message, exit_code)
        }
    }
}
