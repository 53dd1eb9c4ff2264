//! Demonstration entry point: wires a `SwarmEngine` over a mock sandbox
//! provider and an in-memory checkpoint store, then runs a tiny `map` over a
//! couple of prompts so the whole stack (config, logging, session, swarm) is
//! exercised end to end without a real sandbox backend.

use std::sync::Arc;

use agentrt::adapters::sandbox::mock::{MockSandboxProvider, ScriptedReply};
use agentrt::adapters::storage::InMemoryStorageClient;
use agentrt::application::swarm_engine::{OpOptions, SwarmEngine, WorkItem};
use agentrt::domain::models::{AgentConfig, AgentKind};
use agentrt::domain::ports::SandboxProvider;
use agentrt::infrastructure::config::ConfigLoader;
use agentrt::infrastructure::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger_handle = logging::init(&config.logging)?;

    let provider = MockSandboxProvider::new();
    provider
        .script(ScriptedReply::success(
            "greet",
            vec![r#"{"type":"result","output":{"result.json":"{\"greeting\":\"hello\"}"}}"#.to_string()],
        ))
        .await;
    let provider: Arc<dyn SandboxProvider> = Arc::new(provider);
    let storage = Arc::new(InMemoryStorageClient::new());

    let engine = SwarmEngine::new(provider, Some(storage), config.max_concurrency);

    let agent = AgentConfig::gateway(AgentKind::Claude, std::env::var("ANTHROPIC_API_KEY").unwrap_or_default());
    let opts = OpOptions { agent, operation_name: "demo_greet".to_string(), ..Default::default() };
    let items = vec![WorkItem::new("greet the user"), WorkItem::new("greet the team")];

    let results = engine.map::<serde_json::Value>(items, opts).await;
    for result in results {
        match result.data {
            Some(data) => tracing::info!(item_index = result.meta.item_index, data = %data, "worker completed"),
            None => tracing::warn!(item_index = result.meta.item_index, error = ?result.error, "worker failed"),
        }
    }

    Ok(())
}
