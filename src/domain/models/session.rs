//! Session identity and state machines.
//!
//! A `Session` is the runtime identity of one agent bound to one sandbox. The
//! struct itself lives in `application::session_engine` (it owns a handle to
//! the sandbox provider); this module holds the pure state types so they can
//! be unit tested without a provider.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent_registry::WorkspaceMode;

/// Sandbox-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Stopped,
    Booting,
    Ready,
    Running,
    Paused,
    Interrupted,
    Error,
}

/// Agent-level runtime state, orthogonal to the sandbox's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Interrupted,
    Error,
}

/// Closed set of lifecycle event reasons emitted on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleReason {
    SandboxBoot,
    SandboxReady,
    SandboxConnected,
    SandboxPause,
    SandboxResume,
    SandboxError,
    SandboxKilled,
    RunStart,
    RunComplete,
    RunFailed,
    RunInterrupted,
    RunBackgroundComplete,
    RunBackgroundFailed,
    CommandStart,
    CommandComplete,
    CommandFailed,
    CommandInterrupted,
    CommandBackgroundComplete,
    CommandBackgroundFailed,
}

/// One lifecycle event, as emitted on the session's `"lifecycle"` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub sandbox_id: Option<String>,
    pub sandbox: SandboxState,
    pub agent: AgentState,
    pub timestamp: DateTime<Utc>,
    pub reason: LifecycleReason,
}

/// What the currently active operation is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Run,
    Command,
}

/// Descriptor for the single in-flight operation a `Session` may have.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub op_id: u64,
    pub kind: OperationKind,
    pub process_id: Option<u32>,
}

/// Options a caller attaches to a session at construction time.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub workspace_mode: Option<WorkspaceMode>,
    pub result_schema: Option<serde_json::Value>,
    pub storage_scope_tag: Option<String>,
}

/// Tracks interrupted operation ids so a late-arriving wait result is
/// classified correctly (interrupted, not failed) per the session engine's
/// cancellation-correctness rule.
#[derive(Debug, Default)]
pub struct InterruptedOps(HashSet<u64>);

impl InterruptedOps {
    pub fn mark(&mut self, op_id: u64) {
        self.0.insert(op_id);
    }

    pub fn was_interrupted(&self, op_id: u64) -> bool {
        self.0.contains(&op_id)
    }

    pub fn clear(&mut self, op_id: u64) {
        self.0.remove(&op_id);
    }
}

/// A monotonic, rotating correlation id for one sandbox's lifetime: used for
/// both observability grouping and the gateway spend-tracking
/// `x-litellm-customer-id` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTag(String);

impl SessionTag {
    pub fn new() -> Self {
        Self(format!("sess_{}", Uuid::new_v4().simple()))
    }

    /// Seeds the tag with a caller-supplied scope prefix (a swarm/pipeline
    /// tag) instead of the bare `sess_` prefix, so spend metering and log
    /// grouping can trace a session back to the operation that spawned it.
    pub fn with_prefix(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot of a session's two state machines, returned by `Session::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub sandbox: SandboxState,
    pub agent: AgentState,
    pub active_process_id: Option<u32>,
    pub session_tag: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_ops_reclassify_late_wait_results() {
        let mut ops = InterruptedOps::default();
        assert!(!ops.was_interrupted(1));
        ops.mark(1);
        assert!(ops.was_interrupted(1));
        ops.clear(1);
        assert!(!ops.was_interrupted(1));
    }

    #[test]
    fn session_tags_are_unique() {
        assert_ne!(SessionTag::new(), SessionTag::new());
    }
}
