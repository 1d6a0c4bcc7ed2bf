use anyhow::bail;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Default filter directives when `RUST_LOG` is unset.
///
/// sqlx logs every statement at info; those stay at warn unless `log_sql`
/// is on, so transfer logs are not buried under BEGIN/UPDATE/COMMIT lines.
pub fn filter_directives(config: &AppConfig) -> String {
    if config.log_sql {
        format!("{},sqlx=info", config.log_level)
    } else {
        format!("{},sqlx=warn", config.log_level)
    }
}

pub fn parse_rotation(rotation: &str) -> anyhow::Result<Rotation> {
    Ok(match rotation {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        "never" => Rotation::NEVER,
        other => bail!("unknown log rotation {:?} (minutely|hourly|daily|never)", other),
    })
}

/// Install the global subscriber. Keep the guard alive for the process
/// lifetime or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let rotation = parse_rotation(&config.rotation)?;
    let file_appender = RollingFileAppender::new(rotation, &config.log_dir, &config.log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // transfer_id / account_id fields are queried from the JSON file
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    Ok(guard)
}
