//! Application layer: orchestration logic that composes domain ports into
//! the runtime's public session/swarm/pipeline contracts.

pub mod concurrency;
pub mod parser;
pub mod pipeline_engine;
pub mod session_engine;
pub mod stream;
pub mod swarm_engine;
