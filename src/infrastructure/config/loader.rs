use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::AgentKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid max_concurrency: {0}, must be between 1 and 64")]
    InvalidMaxConcurrency(usize),

    #[error("invalid logging.level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid logging.format: {0}, must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("invalid logging.rotation: {0}, must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("storage.root cannot be empty")]
    EmptyStorageRoot,

    #[error("invalid storage.max_connections: {0}, must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid retry.max_retries: {0}, cannot be zero")]
    InvalidMaxRetries(u32),

    #[error("invalid retry backoff: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("invalid registry override: unknown agent_kind {0}")]
    UnknownAgentKind(String),

    #[error("mcp server config invalid: {0}")]
    InvalidMcpServer(String),
}

/// Loads `Config` with figment's layered-merge precedence (lowest to highest):
/// 1. Compiled-in defaults
/// 2. `.agentrt/config.yaml` (project config)
/// 3. `.agentrt/local.yaml` (developer-local overrides, optional, gitignored)
/// 4. `AGENTRT_*` environment variables, `__`-nested (e.g. `AGENTRT_LOGGING__LEVEL`)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".agentrt/config.yaml"))
            .merge(Yaml::file(".agentrt/local.yaml"))
            .merge(Env::prefixed("AGENTRT_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrency == 0 || config.max_concurrency > 64 {
            return Err(ConfigError::InvalidMaxConcurrency(config.max_concurrency));
        }

        if config.storage.root.is_empty() {
            return Err(ConfigError::EmptyStorageRoot);
        }
        if config.storage.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.storage.max_connections));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(0));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(config.retry.initial_backoff_ms, config.retry.max_backoff_ms));
        }

        for server in &config.mcp_servers {
            if server.name.is_empty() {
                return Err(ConfigError::InvalidMcpServer("server name cannot be empty".to_string()));
            }
            if server.command.is_empty() {
                return Err(ConfigError::InvalidMcpServer(format!("server '{}' command cannot be empty", server.name)));
            }
        }

        for over in &config.registry_overrides {
            if AgentKind::ALL.iter().all(|k| k.as_str() != over.agent_kind) {
                return Err(ConfigError::UnknownAgentKind(over.agent_kind.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_zero_max_concurrency() {
        let config = Config { max_concurrency: 0, ..Config::default() };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxConcurrency(0))));
    }

    #[test]
    fn rejects_unknown_registry_override_kind() {
        use crate::domain::models::RegistryOverride;
        let mut config = Config::default();
        config.registry_overrides.push(RegistryOverride {
            agent_kind: "not-a-real-agent".to_string(),
            binary_path: None,
            extra_args: Vec::new(),
        });
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::UnknownAgentKind(_))));
    }

    #[test]
    fn rejects_backwards_backoff() {
        use crate::domain::models::RetryConfig;
        let config = Config {
            retry: RetryConfig { max_retries: 3, initial_backoff_ms: 5000, max_backoff_ms: 1000, verify_max_attempts: 3 },
            ..Config::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff(_, _))));
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let yaml = "max_concurrency: 8\nlogging:\n  level: debug\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        ConfigLoader::validate(&config).unwrap();
    }
}
