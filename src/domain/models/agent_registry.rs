//! The agent registry: static, per-agent-kind data.
//!
//! Each supported CLI agent (Claude, Codex, Gemini, Qwen, OpenCode, Kimi) has
//! its own command template, environment-variable names, parser, and
//! workspace layout, but none of that is code — it is data looked up by
//! [`AgentKind`]. Adding a new agent kind means adding a registry entry, not
//! a new code path through the session engine.

use std::collections::HashMap;

/// The set of agent CLIs the runtime knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Qwen,
    OpenCode,
    Kimi,
}

impl AgentKind {
    pub const ALL: [Self; 6] = [
        Self::Claude,
        Self::Codex,
        Self::Gemini,
        Self::Qwen,
        Self::OpenCode,
        Self::Kimi,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Qwen => "qwen",
            Self::OpenCode => "opencode",
            Self::Kimi => "kimi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects which line-parser a session's stdout stream is run through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserId {
    /// Claude Code's `stream-json` output.
    ClaudeStreamJson,
    /// Codex's event-per-line JSON.
    CodexEvents,
    /// Gemini CLI's JSON events.
    GeminiEvents,
    /// Plain text fallback: every non-empty line is one assistant-text event.
    PlainText,
}

/// How the agent authenticates against its backing model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthShape {
    /// A single API key environment variable is set (gateway or direct).
    SingleKeyEnv,
    /// The registry declares one env var per provider prefix so any
    /// `provider/model` string resolves through the gateway.
    MultiProviderGatewayEnv,
    /// Auth material is a file written into the agent's settings directory.
    OAuthFile,
    /// A JSON literal describing a custom OpenAI-compatible provider is
    /// written into one environment variable (OpenCode's `opencode.json`-style
    /// provider config passed via env).
    GatewayConfigEnv,
}

/// The workspace skeleton a session creates before running an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    /// `context/`, `scripts/`, `temp/`, `output/`.
    Knowledge,
    /// The above plus `repo/` for repository work.
    Swe,
}

impl WorkspaceMode {
    pub const fn directories(self) -> &'static [&'static str] {
        match self {
            Self::Knowledge => &["context", "scripts", "temp", "output"],
            Self::Swe => &["context", "scripts", "temp", "output", "repo"],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Swe => "swe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "knowledge" => Some(Self::Knowledge),
            "swe" => Some(Self::Swe),
            _ => None,
        }
    }
}

/// Where and how an agent's MCP configuration is written.
#[derive(Debug, Clone)]
pub struct McpConfigLayout {
    /// Directory (relative to the sandbox home) the config file lives in.
    pub settings_dir: &'static str,
    /// File name of the MCP config within `settings_dir`.
    pub file_name: &'static str,
    /// JSON key under which the per-server map is nested (`"mcpServers"` for
    /// Claude-shaped configs).
    pub servers_key: &'static str,
}

/// The static, immutable-for-process-lifetime record describing one agent kind.
#[derive(Debug, Clone)]
pub struct AgentRegistryEntry {
    pub kind: AgentKind,
    /// File name of the system-prompt envelope, relative to the sandbox home.
    pub system_prompt_file: &'static str,
    pub parser: ParserId,
    pub auth_shape: AuthShape,
    /// Env var name carrying the API key (used by `SingleKeyEnv`/`OAuthFile` activation).
    pub api_key_env: &'static str,
    /// Env var name carrying a base URL override, for BYOK direct mode.
    pub base_url_env: Option<&'static str>,
    /// Env var name carrying an OAuth bearer token, if the agent supports it directly.
    pub oauth_token_env: Option<&'static str>,
    /// Settings-dir-relative path an OAuth file is written to, for `OAuthFile` auth.
    pub oauth_file_path: Option<&'static str>,
    /// Env var toggled on when OAuth file auth is active.
    pub oauth_activation_env: Option<&'static str>,
    /// Provider-prefix -> env-var-name map for `MultiProviderGatewayEnv`.
    pub provider_env_map: &'static [(&'static str, &'static str)],
    /// Env var name carrying a gateway custom-provider JSON literal.
    pub gateway_config_env: Option<&'static str>,
    /// Env var name carrying custom headers (spend-tracking headers are merged in here).
    pub custom_headers_env: Option<&'static str>,
    pub mcp: McpConfigLayout,
    /// Settings-dir-relative path skills are copied into.
    pub skills_target_dir: &'static str,
    /// One-shot setup command run once per sandbox before the first agent run.
    pub setup_command: Option<&'static str>,
    /// Shell binary name invoked to run this agent.
    pub binary: &'static str,
}

impl AgentRegistryEntry {
    /// Build the argv for one invocation.
    ///
    /// `is_resume` selects the resume-flavored template once `Session::has_run`
    /// is true; the first run of a sandbox always uses the first-run template.
    pub fn build_command(
        &self,
        prompt: &str,
        model: Option<&str>,
        is_resume: bool,
        reasoning_effort: Option<&str>,
    ) -> Vec<String> {
        let mut args = Vec::new();
        match self.kind {
            AgentKind::Claude => {
                args.push("--print".to_string());
                args.push("--output-format".to_string());
                args.push("stream-json".to_string());
                args.push("--verbose".to_string());
                if is_resume {
                    args.push("--continue".to_string());
                }
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
            AgentKind::Codex => {
                args.push("exec".to_string());
                args.push("--json".to_string());
                if is_resume {
                    args.push("resume".to_string());
                    args.push("--last".to_string());
                }
                if let Some(effort) = reasoning_effort {
                    args.push("--reasoning-effort".to_string());
                    args.push(effort.to_string());
                }
                args.push(prompt.to_string());
            }
            AgentKind::Gemini | AgentKind::Qwen => {
                args.push("--output-format".to_string());
                args.push("json".to_string());
                if is_resume {
                    args.push("--continue".to_string());
                }
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
            AgentKind::OpenCode | AgentKind::Kimi => {
                args.push("run".to_string());
                if is_resume {
                    args.push("--continue".to_string());
                }
                args.push(prompt.to_string());
            }
        }
        args
    }
}

fn mcp_claude_shaped() -> McpConfigLayout {
    McpConfigLayout {
        settings_dir: ".claude",
        file_name: ".mcp.json",
        servers_key: "mcpServers",
    }
}

/// Static registry lookup: `registry().get(kind)` is the only way code should
/// branch on agent-kind behavior.
pub fn registry() -> &'static HashMap<AgentKind, AgentRegistryEntry> {
    static REGISTRY: std::sync::OnceLock<HashMap<AgentKind, AgentRegistryEntry>> =
        std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            AgentKind::Claude,
            AgentRegistryEntry {
                kind: AgentKind::Claude,
                system_prompt_file: ".claude/CLAUDE.md",
                parser: ParserId::ClaudeStreamJson,
                auth_shape: AuthShape::OAuthFile,
                api_key_env: "ANTHROPIC_API_KEY",
                base_url_env: Some("ANTHROPIC_BASE_URL"),
                oauth_token_env: None,
                oauth_file_path: Some(".claude/.credentials.json"),
                oauth_activation_env: Some("CLAUDE_CODE_USE_OAUTH"),
                provider_env_map: &[],
                gateway_config_env: None,
                custom_headers_env: Some("ANTHROPIC_CUSTOM_HEADERS"),
                mcp: mcp_claude_shaped(),
                skills_target_dir: ".claude/skills",
                setup_command: None,
                binary: "claude",
            },
        );
        map.insert(
            AgentKind::Codex,
            AgentRegistryEntry {
                kind: AgentKind::Codex,
                system_prompt_file: ".codex/AGENTS.md",
                parser: ParserId::CodexEvents,
                auth_shape: AuthShape::SingleKeyEnv,
                api_key_env: "OPENAI_API_KEY",
                base_url_env: Some("OPENAI_BASE_URL"),
                oauth_token_env: None,
                oauth_file_path: None,
                oauth_activation_env: None,
                provider_env_map: &[],
                gateway_config_env: None,
                custom_headers_env: Some("OPENAI_CUSTOM_HEADERS"),
                mcp: McpConfigLayout {
                    settings_dir: ".codex",
                    file_name: "config.toml.mcp.json",
                    servers_key: "mcpServers",
                },
                skills_target_dir: ".codex/skills",
                setup_command: None,
                binary: "codex",
            },
        );
        map.insert(
            AgentKind::Gemini,
            AgentRegistryEntry {
                kind: AgentKind::Gemini,
                system_prompt_file: ".gemini/GEMINI.md",
                parser: ParserId::GeminiEvents,
                auth_shape: AuthShape::SingleKeyEnv,
                api_key_env: "GEMINI_API_KEY",
                base_url_env: Some("GOOGLE_GEMINI_BASE_URL"),
                oauth_token_env: None,
                oauth_file_path: None,
                oauth_activation_env: None,
                provider_env_map: &[],
                gateway_config_env: None,
                custom_headers_env: Some("GEMINI_CUSTOM_HEADERS"),
                mcp: McpConfigLayout {
                    settings_dir: ".gemini",
                    file_name: "settings.json",
                    servers_key: "mcpServers",
                },
                skills_target_dir: ".gemini/skills",
                setup_command: None,
                binary: "gemini",
            },
        );
        map.insert(
            AgentKind::Qwen,
            AgentRegistryEntry {
                kind: AgentKind::Qwen,
                system_prompt_file: ".qwen/QWEN.md",
                parser: ParserId::GeminiEvents,
                auth_shape: AuthShape::SingleKeyEnv,
                api_key_env: "QWEN_API_KEY",
                base_url_env: Some("QWEN_BASE_URL"),
                oauth_token_env: None,
                oauth_file_path: None,
                oauth_activation_env: None,
                provider_env_map: &[],
                gateway_config_env: None,
                custom_headers_env: Some("QWEN_CUSTOM_HEADERS"),
                mcp: McpConfigLayout {
                    settings_dir: ".qwen",
                    file_name: "settings.json",
                    servers_key: "mcpServers",
                },
                skills_target_dir: ".qwen/skills",
                setup_command: None,
                binary: "qwen",
            },
        );
        map.insert(
            AgentKind::OpenCode,
            AgentRegistryEntry {
                kind: AgentKind::OpenCode,
                system_prompt_file: "AGENTS.md",
                parser: ParserId::PlainText,
                auth_shape: AuthShape::GatewayConfigEnv,
                api_key_env: "OPENCODE_API_KEY",
                base_url_env: None,
                oauth_token_env: None,
                oauth_file_path: None,
                oauth_activation_env: None,
                provider_env_map: &[
                    ("anthropic", "ANTHROPIC_API_KEY"),
                    ("openai", "OPENAI_API_KEY"),
                    ("google", "GEMINI_API_KEY"),
                ],
                gateway_config_env: Some("OPENCODE_CONFIG_CONTENT"),
                custom_headers_env: Some("OPENCODE_CUSTOM_HEADERS"),
                mcp: McpConfigLayout {
                    settings_dir: ".",
                    file_name: "opencode.json",
                    servers_key: "mcp",
                },
                skills_target_dir: ".opencode/skills",
                setup_command: None,
                binary: "opencode",
            },
        );
        map.insert(
            AgentKind::Kimi,
            AgentRegistryEntry {
                kind: AgentKind::Kimi,
                system_prompt_file: ".kimi/AGENTS.md",
                parser: ParserId::PlainText,
                auth_shape: AuthShape::MultiProviderGatewayEnv,
                api_key_env: "MOONSHOT_API_KEY",
                base_url_env: Some("MOONSHOT_BASE_URL"),
                oauth_token_env: None,
                oauth_file_path: None,
                oauth_activation_env: None,
                provider_env_map: &[("moonshot", "MOONSHOT_API_KEY")],
                gateway_config_env: None,
                custom_headers_env: Some("MOONSHOT_CUSTOM_HEADERS"),
                mcp: McpConfigLayout {
                    settings_dir: ".kimi",
                    file_name: "mcp.json",
                    servers_key: "mcpServers",
                },
                skills_target_dir: ".kimi/skills",
                setup_command: None,
                binary: "kimi",
            },
        );
        map
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_an_entry() {
        let reg = registry();
        for kind in AgentKind::ALL {
            assert!(reg.contains_key(&kind), "missing registry entry for {kind}");
        }
    }

    #[test]
    fn claude_resume_adds_continue_flag() {
        let entry = &registry()[&AgentKind::Claude];
        let first = entry.build_command("hello", None, false, None);
        let resume = entry.build_command("hello", None, true, None);
        assert!(!first.contains(&"--continue".to_string()));
        assert!(resume.contains(&"--continue".to_string()));
    }

    #[test]
    fn workspace_modes_have_output_dir() {
        assert!(WorkspaceMode::Knowledge.directories().contains(&"output"));
        assert!(WorkspaceMode::Swe.directories().contains(&"repo"));
    }

    #[test]
    fn agent_kind_str_round_trips() {
        for kind in AgentKind::ALL {
            assert_eq!(AgentKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(AgentKind::from_str("not-a-kind"), None);
    }

    #[test]
    fn workspace_mode_str_round_trips() {
        for mode in [WorkspaceMode::Knowledge, WorkspaceMode::Swe] {
            assert_eq!(WorkspaceMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(WorkspaceMode::from_str("bogus"), None);
    }
}
