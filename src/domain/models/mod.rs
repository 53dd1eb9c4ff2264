//! Domain models: pure entities and state types with no infrastructure concerns.

pub mod agent_config;
pub mod agent_registry;
pub mod checkpoint;
pub mod config;
pub mod session;
pub mod swarm_result;

pub use agent_config::{AgentConfig, Credential};
pub use agent_registry::{
    registry, AgentKind, AgentRegistryEntry, AuthShape, McpConfigLayout, ParserId, WorkspaceMode,
};
pub use checkpoint::{CheckpointInfo, CompatibilityCheck};
pub use config::{Config, LoggingConfig, McpServerConfig, RegistryOverride, RetryConfig, StorageConfig};
pub use session::{
    ActiveOperation, AgentState, InterruptedOps, LifecycleEvent, LifecycleReason, OperationKind,
    SandboxState, SessionOptions, SessionStatus, SessionTag,
};
pub use swarm_result::{
    BestOfInfo, FileMap, IndexedMeta, ReduceResult, SessionRole, SwarmResult, SwarmStatus, VerifyInfo,
};
