//! Process-wide `tracing` subscriber wiring.

use std::io;
use std::sync::Arc;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::models::LoggingConfig as DomainLoggingConfig;

use super::config::{LogConfig, LogFormat, RotationPolicy};
use super::secret_scrubbing::SecretScrubber;

/// Holds the non-blocking file appender's guard alive for the process
/// lifetime; dropping it early would silently stop flushing buffered lines.
pub struct LoggerHandle {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global `tracing` subscriber from ambient config. Every
/// writer (file and/or stdout) is wrapped in `ScrubbingWriter` so secrets an
/// agent process might echo never reach disk or the terminal unredacted.
#[allow(clippy::too_many_lines)]
pub fn init(domain_config: &DomainLoggingConfig) -> RuntimeResult<LoggerHandle> {
    let config = LogConfig::try_from(domain_config)?;
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();
    let scrubber = Arc::new(SecretScrubber::new());

    let guard = if let Some(ref log_dir) = config.log_dir {
        let file_appender = match config.rotation {
            RotationPolicy::Daily => rolling::daily(log_dir, "agentrt.log"),
            RotationPolicy::Hourly => rolling::hourly(log_dir, "agentrt.log"),
            RotationPolicy::Never => rolling::never(log_dir, "agentrt.log"),
        };
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
        let file_scrubber = scrubber.clone();
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(move || super::secret_scrubbing::ScrubbingWriter::new(non_blocking_file.clone(), file_scrubber.clone()))
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true)
            .with_filter(env_filter.clone());

        if config.enable_stdout {
            let stdout_scrubber = scrubber.clone();
            match config.format {
                LogFormat::Json => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(move || super::secret_scrubbing::ScrubbingWriter::new(io::stdout(), stdout_scrubber.clone()))
                        .with_target(true)
                        .with_line_number(true)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
                }
                LogFormat::Pretty => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(move || super::secret_scrubbing::ScrubbingWriter::new(io::stdout(), stdout_scrubber.clone()))
                        .with_target(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
                }
            }
        } else {
            tracing_subscriber::registry().with(file_layer).init();
        }
        Some(guard)
    } else {
        let stdout_scrubber = scrubber.clone();
        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(move || super::secret_scrubbing::ScrubbingWriter::new(io::stdout(), stdout_scrubber.clone()))
                    .with_target(true)
                    .with_line_number(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(move || super::secret_scrubbing::ScrubbingWriter::new(io::stdout(), stdout_scrubber.clone()))
                    .with_target(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout_layer).init();
            }
        }
        None
    };

    tracing::info!(level = %config.level, file_output = config.log_dir.is_some(), "logger initialized");
    Ok(LoggerHandle { _guard: guard })
}

fn parse_log_level(level: &str) -> RuntimeResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(RuntimeError::Configuration(format!("invalid log level: {other}"))),
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_level() {
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn accepts_known_levels() {
        for level in ["trace", "debug", "info", "warn", "error", "TRACE"] {
            assert!(parse_log_level(level).is_ok());
        }
    }
}
