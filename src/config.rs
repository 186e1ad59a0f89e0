use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::documents::RetryPolicy;

/// Main configuration structure for petition-flow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PetitionFlowConfig {
    pub database: DatabaseConfig,
    pub documents: DocumentConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite file path or `sqlite:` URL
    pub url: String,
    /// Maximum connections in pool (at least 2 are always opened)
    pub max_connections: u32,
    /// Run embedded migrations on startup
    pub auto_migrate: bool,
    /// How long a transition waits for another writer before reporting a conflict
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentConfig {
    /// Pending document jobs before new ones are dropped
    pub queue_capacity: usize,
    /// Where `FileTemplateRenderer` writes artifacts
    pub output_dir: String,
    pub retry: DocumentRetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: ".petition-flow/petition-flow.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            output_dir: ".petition-flow/documents".to_string(),
            retry: DocumentRetryConfig::default(),
        }
    }
}

impl Default for DocumentRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl Default for PetitionFlowConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            documents: DocumentConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl DocumentRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl PetitionFlowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (petition-flow.toml, .petition-flow-rc)
    /// 3. Environment variables (PETITION_FLOW_DATABASE__URL, ...)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`load`](Self::load) with config files looked up in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_file = dir.join("petition-flow.toml");
        if toml_file.exists() {
            builder = builder.add_source(File::from(toml_file));
        }

        let rc_file = dir.join(".petition-flow-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(config::FileFormat::Toml));
        }

        // Field names contain underscores, so nesting uses a double one.
        builder = builder.add_source(
            Environment::with_prefix("PETITION_FLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<PetitionFlowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = PetitionFlowConfig::load_env_file();
        PetitionFlowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static PetitionFlowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_load_without_files() {
        let dir = TempDir::new().unwrap();
        let config = PetitionFlowConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.documents.retry.max_attempts, 3);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("petition-flow.toml"),
            "[database]\nurl = \"custom.db\"\nbusy_timeout_ms = 250\n",
        )
        .unwrap();

        let config = PetitionFlowConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.database.url, "custom.db");
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(config.database.auto_migrate);
    }

    #[test]
    fn test_save_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("petition-flow.toml");
        let mut config = PetitionFlowConfig::default();
        config.documents.queue_capacity = 8;
        config.save_to_file(&path).unwrap();

        let loaded = PetitionFlowConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.documents.queue_capacity, 8);
    }

    #[test]
    fn test_retry_policy_never_drops_below_one_attempt() {
        let retry = DocumentRetryConfig {
            max_attempts: 0,
            ..DocumentRetryConfig::default()
        };
        assert_eq!(retry.policy().max_attempts, 1);
        assert_eq!(retry.policy().base_delay, Duration::from_millis(500));
    }
}
