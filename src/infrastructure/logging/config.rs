//! Typed view over `domain::models::LoggingConfig` for the tracing-subscriber
//! wiring in `logger.rs`. The domain config stays string-based so it merges
//! cleanly through figment/env; this module is where those strings get
//! validated into enums.

use std::path::PathBuf;

use crate::domain::errors::RuntimeError;
use crate::domain::models::LoggingConfig as DomainLoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub log_dir: Option<PathBuf>,
    pub enable_stdout: bool,
    pub rotation: RotationPolicy,
}

impl TryFrom<&DomainLoggingConfig> for LogConfig {
    type Error = RuntimeError;

    fn try_from(config: &DomainLoggingConfig) -> Result<Self, Self::Error> {
        let format = match config.format.as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => return Err(RuntimeError::Configuration(format!("invalid logging.format: {other}"))),
        };
        let rotation = match config.rotation.as_str() {
            "daily" => RotationPolicy::Daily,
            "hourly" => RotationPolicy::Hourly,
            "never" => RotationPolicy::Never,
            other => return Err(RuntimeError::Configuration(format!("invalid logging.rotation: {other}"))),
        };
        Ok(Self {
            level: config.level.clone(),
            format,
            log_dir: config.log_dir.clone().map(PathBuf::from),
            enable_stdout: config.enable_stdout,
            rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_format() {
        let domain = DomainLoggingConfig { format: "xml".to_string(), ..Default::default() };
        assert!(LogConfig::try_from(&domain).is_err());
    }

    #[test]
    fn accepts_defaults() {
        let domain = DomainLoggingConfig::default();
        let config = LogConfig::try_from(&domain).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.rotation, RotationPolicy::Daily);
    }
}
