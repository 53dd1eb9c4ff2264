//! Pure env-derivation: turns an `AgentConfig` plus a session tag into the
//! environment variables a sandbox spawn needs, branching on the registry
//! entry's `AuthShape`. No I/O; `session_engine` is the only caller and it
//! owns writing OAuth files into the sandbox separately.

use std::collections::HashMap;

use crate::domain::models::{AgentRegistryEntry, AuthShape, Credential, SessionTag};

/// Gateway spend-tracking header, attached whenever a session tag is known so
/// per-run spend can be attributed in the billing backend.
const SPEND_TRACKING_HEADER: &str = "x-litellm-customer-id";

/// Derive the environment map for one agent invocation. Does not mutate or
/// read any external state; callers merge the result into `SpawnOptions::envs`.
pub fn derive_env(
    entry: &AgentRegistryEntry,
    credential: &Credential,
    session_tag: &SessionTag,
    extra_headers: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    match (entry.auth_shape, credential) {
        (AuthShape::SingleKeyEnv, Credential::Direct { api_key, base_url }) => {
            env.insert(entry.api_key_env.to_string(), api_key.clone());
            if let (Some(base_url_env), Some(base_url)) = (entry.base_url_env, base_url) {
                env.insert(base_url_env.to_string(), base_url.clone());
            }
        }
        (AuthShape::SingleKeyEnv, Credential::Gateway { api_key }) => {
            env.insert(entry.api_key_env.to_string(), api_key.clone());
        }
        (AuthShape::OAuthFile, Credential::OAuthFile { .. }) => {
            if let Some(activation_env) = entry.oauth_activation_env {
                env.insert(activation_env.to_string(), "1".to_string());
            }
        }
        (AuthShape::OAuthFile, Credential::Gateway { api_key } | Credential::Direct { api_key, .. }) => {
            // Gateway/BYOK mode for an otherwise-OAuth agent: fall back to the key env.
            env.insert(entry.api_key_env.to_string(), api_key.clone());
        }
        (AuthShape::MultiProviderGatewayEnv, Credential::Gateway { api_key } | Credential::Direct { api_key, .. }) => {
            for (_, env_var) in entry.provider_env_map {
                env.insert((*env_var).to_string(), api_key.clone());
            }
        }
        (AuthShape::GatewayConfigEnv, Credential::Gateway { api_key } | Credential::Direct { api_key, .. }) => {
            if let Some(config_env) = entry.gateway_config_env {
                env.insert(config_env.to_string(), api_key.clone());
            }
        }
        _ => {}
    }

    if let Some(token) = oauth_bearer(credential) {
        if let Some(token_env) = entry.oauth_token_env {
            env.insert(token_env.to_string(), token);
        }
    }

    if let Some(headers_env) = entry.custom_headers_env {
        let mut headers = extra_headers.clone();
        headers.insert(SPEND_TRACKING_HEADER.to_string(), session_tag.as_str().to_string());
        if let Ok(json) = serde_json::to_string(&headers) {
            env.insert(headers_env.to_string(), json);
        }
    }

    env
}

fn oauth_bearer(credential: &Credential) -> Option<String> {
    match credential {
        Credential::OAuthBearer { token } => Some(token.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{registry, AgentKind};

    #[test]
    fn single_key_env_sets_api_key_and_base_url() {
        let entry = &registry()[&AgentKind::Codex];
        let cred = Credential::Direct { api_key: "abc123".to_string(), base_url: Some("https://example.com".to_string()) };
        let tag = SessionTag::new();
        let env = derive_env(entry, &cred, &tag, &HashMap::new());
        assert_eq!(env.get("OPENAI_API_KEY"), Some(&"abc123".to_string()));
        assert_eq!(env.get("OPENAI_BASE_URL"), Some(&"https://example.com".to_string()));
    }

    #[test]
    fn oauth_file_activation_env_is_set() {
        let entry = &registry()[&AgentKind::Claude];
        let cred = Credential::OAuthFile { file_content: "{}".to_string() };
        let tag = SessionTag::new();
        let env = derive_env(entry, &cred, &tag, &HashMap::new());
        assert_eq!(env.get("CLAUDE_CODE_USE_OAUTH"), Some(&"1".to_string()));
    }

    #[test]
    fn custom_headers_carry_spend_tracking_tag() {
        let entry = &registry()[&AgentKind::Claude];
        let cred = Credential::OAuthFile { file_content: "{}".to_string() };
        let tag = SessionTag::new();
        let env = derive_env(entry, &cred, &tag, &HashMap::new());
        let headers_json = env.get("ANTHROPIC_CUSTOM_HEADERS").unwrap();
        assert!(headers_json.contains(tag.as_str()));
    }

    #[test]
    fn multi_provider_gateway_env_populates_every_provider() {
        let entry = &registry()[&AgentKind::Kimi];
        let cred = Credential::Gateway { api_key: "shared-key".to_string() };
        let tag = SessionTag::new();
        let env = derive_env(entry, &cred, &tag, &HashMap::new());
        assert_eq!(env.get("MOONSHOT_API_KEY"), Some(&"shared-key".to_string()));
    }
}
