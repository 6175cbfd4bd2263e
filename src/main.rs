use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;

use chronobank::bank::Bank;
use chronobank::config::AppConfig;
use chronobank::fraud::FraudDetectionAgent;
use chronobank::journal::JournalWriter;
use chronobank::logging;
use chronobank::metrics::MetricsRegistry;
use chronobank::server::BankServer;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let env = std::env::var("CHRONO_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = logging::init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        env = %env,
        "starting chronobank server"
    );

    let bank = if config.journal.enabled {
        if let Some(parent) = std::path::Path::new(&config.journal.path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal dir for {}", config.journal.path))?;
        }
        let journal = JournalWriter::create(&config.journal.path)
            .with_context(|| format!("Failed to create journal at {}", config.journal.path))?;
        tracing::info!(path = %config.journal.path, "event journal enabled");
        Arc::new(Bank::with_journal(journal))
    } else {
        Arc::new(Bank::new())
    };

    let fraud = Arc::new(FraudDetectionAgent::new(
        config.fraud.analysis_window_seconds,
        config.fraud.max_history,
    ));
    let metrics = Arc::new(MetricsRegistry::new());

    let mut server = BankServer::new(config.server.clone(), bank, fraud, metrics);
    server
        .start()
        .context("Failed to start banking server")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .context("Failed to register SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
        .context("Failed to register SIGINT handler")?;

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(STATS_INTERVAL);
        let stats = server.stats();
        tracing::info!(
            connections = stats.active_connections,
            processed = stats.transaction_stats.transactions_processed,
            queued = stats.transaction_stats.transactions_queued,
            avg_ms = stats.transaction_stats.avg_processing_time_ms,
            fraud_alerts = stats.fraud_stats.fraud_alerts_generated,
            avg_risk = stats.fraud_stats.average_risk_score,
            "server statistics"
        );
    }

    tracing::info!("shutdown signal received");
    server.stop();
    tracing::info!("server shutdown complete");
    Ok(())
}
