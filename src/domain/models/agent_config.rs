//! Resolved per-session agent configuration: model choice and the auth shape
//! actually supplied by the caller, independent of the registry's declared
//! `AuthShape` (a caller can supply an OAuth file for an agent whose default
//! auth shape is `SingleKeyEnv`, for instance, if the registry entry allows it).

use super::agent_registry::AgentKind;
use serde::{Deserialize, Serialize};

/// The credential material supplied for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// Routed through a gateway; `is_direct` is always false here.
    Gateway { api_key: String },
    /// Bring-your-own-key, talking directly to the provider.
    Direct {
        api_key: String,
        base_url: Option<String>,
    },
    /// A bearer OAuth token passed directly as an env var.
    OAuthBearer { token: String },
    /// The raw contents of an OAuth credentials file to write into the
    /// agent's settings directory.
    OAuthFile { file_content: String },
}

impl Credential {
    pub const fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    pub const fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuthBearer { .. } | Self::OAuthFile { .. })
    }
}

/// Fully resolved configuration for one `Session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub credential: Credential,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    /// Extra beta/feature headers the caller wants merged into the agent's
    /// custom-headers env var, in addition to the spend-tracking headers the
    /// session engine always merges in.
    pub extra_headers: Vec<(String, String)>,
}

impl AgentConfig {
    pub fn gateway(kind: AgentKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            credential: Credential::Gateway { api_key: api_key.into() },
            model: None,
            reasoning_effort: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn direct(kind: AgentKind, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            kind,
            credential: Credential::Direct { api_key: api_key.into(), base_url },
            model: None,
            reasoning_effort: None,
            extra_headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_is_not_direct() {
        let cfg = AgentConfig::gateway(AgentKind::Claude, "sk-test");
        assert!(!cfg.credential.is_direct());
    }

    #[test]
    fn direct_reports_direct() {
        let cfg = AgentConfig::direct(AgentKind::Claude, "sk-test", None);
        assert!(cfg.credential.is_direct());
    }
}
