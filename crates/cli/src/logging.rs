use procura_core::config::{LogFormat, LoggingConfig};
use tracing::Level;

/// Diagnostics go to stderr; stdout carries only command outcome lines.
/// Repeat calls in one process keep the first subscriber.
pub(crate) fn init(config: &LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);

    let _ = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
    };
}
