use serde::{Deserialize, Serialize};
use std::fs;

use anyhow::{Context, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub server: ServerConfig,
    #[serde(default)]
    pub fraud: FraudConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: usize,
    pub queue_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FraudConfig {
    /// Analysis window in logical time units.
    pub analysis_window_seconds: i64,
    /// Max transactions retained per account window.
    pub max_history: usize,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            analysis_window_seconds: 3600,
            max_history: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./data/chronobank.journal".to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from YAML file based on environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config.
    /// Format: CHRONO_<SECTION>_<FIELD> (uppercase with underscores)
    ///
    /// Supported overrides:
    /// - CHRONO_SERVER_PORT: Listener port (u16)
    /// - CHRONO_SERVER_HOST: Listener host (String)
    /// - CHRONO_WORKER_THREADS: Transaction worker count
    /// - CHRONO_LOG_LEVEL: Log level (trace/debug/info/warn/error)
    /// - CHRONO_JOURNAL_ENABLED: Enable the event journal (true/false)
    /// - CHRONO_JOURNAL_PATH: Journal file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CHRONO_SERVER_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                tracing::info!("Config override: server.port = {} (from CHRONO_SERVER_PORT)", p);
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("CHRONO_SERVER_HOST") {
            tracing::info!("Config override: server.host = {} (from CHRONO_SERVER_HOST)", host);
            self.server.host = host;
        }
        if let Ok(workers) = std::env::var("CHRONO_WORKER_THREADS") {
            if let Ok(w) = workers.parse::<usize>() {
                tracing::info!(
                    "Config override: server.worker_threads = {} (from CHRONO_WORKER_THREADS)",
                    w
                );
                self.server.worker_threads = w;
            }
        }
        if let Ok(level) = std::env::var("CHRONO_LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from CHRONO_LOG_LEVEL)", level);
            self.log_level = level;
        }
        if let Ok(enabled) = std::env::var("CHRONO_JOURNAL_ENABLED") {
            if let Ok(e) = enabled.parse::<bool>() {
                tracing::info!(
                    "Config override: journal.enabled = {} (from CHRONO_JOURNAL_ENABLED)",
                    e
                );
                self.journal.enabled = e;
            }
        }
        if let Ok(path) = std::env::var("CHRONO_JOURNAL_PATH") {
            tracing::info!("Config override: journal.path = {} (from CHRONO_JOURNAL_PATH)", path);
            self.journal.path = path;
        }
    }

    /// Validate configuration at startup
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid server.port: must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if self.server.worker_threads == 0 {
            anyhow::bail!("Invalid server.worker_threads: must be > 0");
        }
        if self.server.queue_size == 0 {
            anyhow::bail!("Invalid server.queue_size: must be > 0");
        }
        if self.fraud.analysis_window_seconds <= 0 {
            anyhow::bail!("Invalid fraud.analysis_window_seconds: must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "chronobank.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_tracing: false,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                worker_threads: 4,
                queue_size: 1024,
            },
            fraud: FraudConfig::default(),
            journal: JournalConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = base_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = base_config();
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = base_config();
        config.server.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_with_defaults() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: chronobank.log
use_json: false
rotation: daily
enable_tracing: false
server:
  host: 127.0.0.1
  port: 9090
  worker_threads: 2
  queue_size: 256
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        // Omitted sections fall back to defaults
        assert_eq!(config.fraud.analysis_window_seconds, 3600);
        assert!(!config.journal.enabled);
    }
}
