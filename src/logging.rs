//! Logging bootstrap: rolling file output plus colored stdout.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Initialize the global tracing subscriber from config.
///
/// Returns the appender guard; dropping it flushes and stops the
/// background log writer, so the caller must hold it for the process
/// lifetime. `RUST_LOG` overrides the configured filter when set.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_filter(config)));

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    let registry = tracing_subscriber::registry().with(filter);
    if config.use_json {
        // Structured output keeps targets for per-component queries.
        registry.with(file_layer.json().with_target(true)).init();
    } else {
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry
            .with(file_layer.with_target(false))
            .with(stdout_layer)
            .init();
    }
    guard
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// High-frequency lifecycle targets live under the "CHRONO" hierarchy
/// (CHRONO::LEDGER, CHRONO::PROC, ...) so they toggle as a group.
fn base_filter(config: &AppConfig) -> String {
    if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},CHRONO=off", config.log_level)
    }
}
