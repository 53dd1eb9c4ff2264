//! Checkpoint metadata: content-addressed snapshots of a session's workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent_registry::{AgentKind, WorkspaceMode};

/// Metadata record for one checkpoint. The blob itself (a gzipped tar) is
/// stored separately, addressed by `hash`; several `CheckpointInfo` ids may
/// point at the same hash when a run produces byte-identical workspace state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: Uuid,
    /// Lowercase 64-hex SHA-256 of the archive bytes.
    pub hash: String,
    pub tag: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub agent_type: AgentKind,
    pub model: Option<String>,
    pub workspace_mode: WorkspaceMode,
    pub comment: Option<String>,
    /// The checkpoint this one was created from, forming a DAG by lineage.
    pub parent_id: Option<Uuid>,
}

/// Raised when a restore target's structural shape doesn't match the current
/// session (agent kind or workspace mode mismatch). Model mismatches are
/// allowed; structural mismatches are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityCheck {
    Compatible,
    AgentKindMismatch,
    WorkspaceModeMismatch,
}

impl CheckpointInfo {
    pub fn check_compatibility(&self, kind: AgentKind, mode: WorkspaceMode) -> CompatibilityCheck {
        if self.agent_type != kind {
            CompatibilityCheck::AgentKindMismatch
        } else if self.workspace_mode != mode {
            CompatibilityCheck::WorkspaceModeMismatch
        } else {
            CompatibilityCheck::Compatible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CheckpointInfo {
        CheckpointInfo {
            id: Uuid::new_v4(),
            hash: "a".repeat(64),
            tag: "sess_abc".to_string(),
            timestamp: Utc::now(),
            size_bytes: 128,
            agent_type: AgentKind::Claude,
            model: None,
            workspace_mode: WorkspaceMode::Knowledge,
            comment: None,
            parent_id: None,
        }
    }

    #[test]
    fn model_mismatch_is_allowed() {
        let mut cp = sample();
        cp.model = Some("opus".to_string());
        assert_eq!(
            cp.check_compatibility(AgentKind::Claude, WorkspaceMode::Knowledge),
            CompatibilityCheck::Compatible
        );
    }

    #[test]
    fn agent_kind_mismatch_is_rejected() {
        let cp = sample();
        assert_eq!(
            cp.check_compatibility(AgentKind::Codex, WorkspaceMode::Knowledge),
            CompatibilityCheck::AgentKindMismatch
        );
    }

    #[test]
    fn workspace_mode_mismatch_is_rejected() {
        let cp = sample();
        assert_eq!(
            cp.check_compatibility(AgentKind::Claude, WorkspaceMode::Swe),
            CompatibilityCheck::WorkspaceModeMismatch
        );
    }
}
