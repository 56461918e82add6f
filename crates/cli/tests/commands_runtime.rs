use std::env;
use std::sync::{Mutex, OnceLock};

use procura_cli::commands::{doctor, migrate, run, seed, tick};
use procura_core::config::{ConfigOverrides, LoadOptions};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_succeeds_against_a_fresh_database() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn every_command_reports_config_failures_with_exit_code_two() {
    with_env(
        &[
            ("PROCURA_DATABASE_URL", "sqlite::memory:"),
            ("PROCURA_SCHEDULER_BATCH_SIZE", "0"),
        ],
        || {
            for (name, result) in [
                ("migrate", migrate::run(LoadOptions::default())),
                ("seed", seed::run(LoadOptions::default())),
                ("tick", tick::run(LoadOptions::default())),
                ("run", run::run(LoadOptions::default())),
            ] {
                assert_eq!(result.exit_code, 2, "{name} should fail config validation");

                let payload = parse_payload(&result.output);
                assert_eq!(payload["command"], name);
                assert_eq!(payload["status"], "error");
                assert_eq!(payload["error_class"], "config_validation");
            }
        },
    );
}

#[test]
fn seed_loads_and_reports_the_demo_dataset() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful seed run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("5 requests"));
        assert!(message.contains("req-seed-draft"));
        assert!(message.contains("req-seed-open"));
        assert!(message.contains("req-seed-closed"));
    });
}

#[test]
fn seed_output_is_deterministic_across_runs() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let first = seed::run(LoadOptions::default());
        let second = seed::run(LoadOptions::default());
        assert_eq!(first.exit_code, 0);
        assert_eq!(second.exit_code, 0);

        let first_payload = parse_payload(&first.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn doctor_passes_after_migrate_on_a_file_database() {
    let dir = TempDir::new().expect("create temp dir");
    let url = format!("sqlite://{}/procura.db", dir.path().display());

    with_env(&[("PROCURA_DATABASE_URL", url.as_str())], || {
        let migrated = migrate::run(LoadOptions::default());
        assert_eq!(migrated.exit_code, 0, "migrate should succeed first");

        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 0, "doctor should pass after migrate");
        assert_eq!(result.output.lines().count(), 1, "json report is a single line");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|check| check["status"] == "pass"));
    });
}

#[test]
fn doctor_flags_an_uninitialized_schema() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 1, "missing schema should fail doctor");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");

        let checks = payload["checks"].as_array().expect("checks array");
        let schema = checks
            .iter()
            .find(|check| check["name"] == "schema_migrations")
            .expect("schema check");
        assert_eq!(schema["status"], "fail");
        let connectivity = checks
            .iter()
            .find(|check| check["name"] == "database_connectivity")
            .expect("connectivity check");
        assert_eq!(connectivity["status"], "pass");
    });
}

#[test]
fn doctor_human_output_marks_skipped_checks() {
    with_env(
        &[
            ("PROCURA_DATABASE_URL", "sqlite::memory:"),
            ("PROCURA_SCHEDULER_BATCH_SIZE", "0"),
        ],
        || {
            let result = doctor::run(LoadOptions::default(), false);
            assert_eq!(result.exit_code, 1);
            assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
            assert!(result.output.contains("- [fail] config_validation"));
            assert!(result.output.contains("- [skip] database_connectivity"));
            assert!(result.output.contains("- [skip] schema_migrations"));
        },
    );
}

#[test]
fn tick_reports_zero_counters_on_an_empty_database() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = tick::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful tick");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "tick");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["processed"], 0);
        assert_eq!(payload["details"]["closed_fulfilled"], 0);
        assert_eq!(payload["details"]["closed_unfulfilled"], 0);
    });
}

#[test]
fn tick_honors_an_instance_override() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                instance: Some("scheduler-blue".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        let result = tick::run(options);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("scheduler-blue"), "message was: {message}");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PROCURA_CONFIG",
        "PROCURA_DATABASE_URL",
        "PROCURA_DATABASE_MAX_CONNECTIONS",
        "PROCURA_DATABASE_TIMEOUT_SECS",
        "PROCURA_SCHEDULER_TICK_INTERVAL_SECS",
        "PROCURA_SCHEDULER_BATCH_SIZE",
        "PROCURA_SCHEDULER_LEASE_TIMEOUT_SECS",
        "PROCURA_SCHEDULER_INSTANCE",
        "PROCURA_LOGGING_LEVEL",
        "PROCURA_LOGGING_FORMAT",
        "PROCURA_LOG_LEVEL",
        "PROCURA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
