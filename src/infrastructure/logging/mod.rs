//! Structured logging: tracing-subscriber wiring, secret scrubbing, rotation.

pub mod config;
pub mod logger;
pub mod observability;
pub mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::{init, LoggerHandle};
pub use observability::{ObservabilityLogger, SessionLog};
pub use secret_scrubbing::{ScrubbingWriter, SecretScrubber};
