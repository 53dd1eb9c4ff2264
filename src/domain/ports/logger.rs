use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Log level, ordered from most verbose to most severe.
///
/// ```
/// use agentrt::domain::ports::Level;
/// assert!(Level::Error > Level::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Port for structured process-wide diagnostic logging (distinct from the
/// per-session NDJSON log `ObservabilityLogger` writes — this is the
/// tracing-backed log for the runtime itself).
#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, level: Level, message: &str, fields: HashMap<String, Value>);
    async fn trace(&self, message: &str);
    async fn debug(&self, message: &str);
    async fn info(&self, message: &str);
    async fn warn(&self, message: &str);
    async fn error(&self, message: &str);
}
