//! Composes `SwarmEngine` operations into an ordered, typed sequence sharing
//! one pipeline-run identity and one event stream.
//!
//! Pipeline items and step outputs are carried as `serde_json::Value`: each
//! step's output becomes the next step's mounted `data.json`, so steps don't
//! need to agree on a single Rust type ahead of time. `SwarmEngine` returns
//! only final per-item results, not a live sub-event stream, so the forwarded
//! `ItemComplete` events here are synthesized from those results rather than
//! true blow-by-blow forwarding of nested worker/verifier/judge events.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::models::{ReduceResult, SessionRole, SwarmResult, SwarmStatus};

use super::swarm_engine::{OpOptions, SwarmEngine, WorkItem};

/// Which side(s) of a `filter` step forward to the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterEmit {
    #[default]
    Success,
    Filtered,
    All,
}

#[derive(Clone)]
enum StepKind {
    Map(OpOptions),
    Filter(OpOptions, FilterEmit, Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Reduce(OpOptions),
}

#[derive(Clone)]
struct Step {
    name: String,
    kind: StepKind,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StepStart { pipeline_run_id: String, step_index: usize, step_name: String },
    StepComplete { pipeline_run_id: String, step_index: usize, step_name: String },
    StepError { pipeline_run_id: String, step_index: usize, step_name: String, error: String },
    ItemComplete {
        pipeline_run_id: String,
        step_index: usize,
        step_name: String,
        item_index: usize,
        role: Option<SessionRole>,
        status: SwarmStatus,
    },
}

pub enum PipelineOutcome {
    Items(Vec<SwarmResult<Value>>),
    Reduced(ReduceResult<Value>),
}

/// A linked sequence of swarm steps built by chaining `map`/`filter`/`reduce`.
/// `reduce` is terminal: appending any step after it is a configuration error
/// raised synchronously at build time, not at `run`.
pub struct Pipeline {
    engine: SwarmEngine,
    steps: Vec<Step>,
    reduced: bool,
    events_tx: broadcast::Sender<PipelineEvent>,
}

impl Pipeline {
    pub fn new(engine: SwarmEngine) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self { engine, steps: Vec::new(), reduced: false, events_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    pub fn map(self, name: impl Into<String>, opts: OpOptions) -> RuntimeResult<Self> {
        self.push_step(name.into(), StepKind::Map(opts))
    }

    pub fn filter<P>(self, name: impl Into<String>, opts: OpOptions, emit: FilterEmit, predicate: P) -> RuntimeResult<Self>
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.push_step(name.into(), StepKind::Filter(opts, emit, Arc::new(predicate)))
    }

    pub fn reduce(self, name: impl Into<String>, opts: OpOptions) -> RuntimeResult<Self> {
        self.push_step(name.into(), StepKind::Reduce(opts))
    }

    fn push_step(mut self, name: String, kind: StepKind) -> RuntimeResult<Self> {
        if self.reduced {
            return Err(RuntimeError::Configuration("cannot append a pipeline step after reduce".to_string()));
        }
        if matches!(kind, StepKind::Reduce(_)) {
            self.reduced = true;
        }
        self.steps.push(Step { name, kind });
        Ok(self)
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_items(&self, pipeline_run_id: &str, step_index: usize, step_name: &str, results: &[SwarmResult<Value>]) {
        for result in results {
            self.emit(PipelineEvent::ItemComplete {
                pipeline_run_id: pipeline_run_id.to_string(),
                step_index,
                step_name: step_name.to_string(),
                item_index: result.meta.item_index,
                role: result.meta.role,
                status: result.status,
            });
        }
    }

    /// Renames a result's `result.json` to `data.json` (or serializes
    /// `result.data` under that name if no file was written) so the next
    /// step's own `output/result.json` can't collide with it, then pairs it
    /// back with the item that produced it so the item's prompt survives.
    fn carry_forward(source: &WorkItem, result: &SwarmResult<Value>) -> WorkItem {
        let mut files = result.files.clone();
        if let Some(bytes) = files.remove("result.json") {
            files.insert("data.json".to_string(), bytes);
        } else if let Some(data) = &result.data {
            if let Ok(bytes) = serde_json::to_vec(data) {
                files.insert("data.json".to_string(), bytes);
            }
        }
        WorkItem { prompt: source.prompt.clone(), files: files.into_iter().collect() }
    }

    pub async fn run(&self, inputs: Vec<WorkItem>) -> RuntimeResult<PipelineOutcome> {
        let pipeline_run_id = Uuid::new_v4().to_string();
        let mut current = inputs;
        let mut last_results: Vec<SwarmResult<Value>> = Vec::new();
        let mut reduced: Option<ReduceResult<Value>> = None;

        for (step_index, step) in self.steps.iter().enumerate() {
            self.emit(PipelineEvent::StepStart {
                pipeline_run_id: pipeline_run_id.clone(),
                step_index,
                step_name: step.name.clone(),
            });

            match &step.kind {
                StepKind::Map(opts) => {
                    let mut opts = opts.clone();
                    opts.pipeline_run_id = Some(pipeline_run_id.clone());
                    opts.pipeline_step_index = Some(step_index);
                    let step_input = current.clone();
                    let results = self.engine.map::<Value>(step_input.clone(), opts).await;
                    self.emit_items(&pipeline_run_id, step_index, &step.name, &results);

                    if let Some(err) = results.iter().find_map(|r| r.is_error().then(|| r.error.clone()).flatten()) {
                        self.emit(PipelineEvent::StepError {
                            pipeline_run_id: pipeline_run_id.clone(),
                            step_index,
                            step_name: step.name.clone(),
                            error: err.clone(),
                        });
                        return Err(RuntimeError::Execution(format!("pipeline step '{}' failed: {err}", step.name)));
                    }

                    current = step_input.iter().zip(results.iter()).map(|(item, r)| Self::carry_forward(item, r)).collect();
                    last_results = results;
                }
                StepKind::Filter(opts, emit, predicate) => {
                    let mut opts = opts.clone();
                    opts.pipeline_run_id = Some(pipeline_run_id.clone());
                    opts.pipeline_step_index = Some(step_index);
                    let step_input = current.clone();
                    let predicate = predicate.clone();
                    let results = self.engine.filter::<Value, _>(step_input.clone(), opts, move |v| predicate(v)).await;
                    self.emit_items(&pipeline_run_id, step_index, &step.name, &results);

                    let kept: Vec<WorkItem> = step_input
                        .iter()
                        .zip(results.iter())
                        .filter(|(_, r)| match emit {
                            FilterEmit::Success => r.status == SwarmStatus::Success,
                            FilterEmit::Filtered => r.status == SwarmStatus::Filtered,
                            FilterEmit::All => true,
                        })
                        .map(|(item, r)| Self::carry_forward(item, r))
                        .collect();
                    current = kept;
                    last_results = results;
                }
                StepKind::Reduce(opts) => {
                    let mut opts = opts.clone();
                    opts.pipeline_run_id = Some(pipeline_run_id.clone());
                    opts.pipeline_step_index = Some(step_index);
                    let result = self.engine.reduce::<Value>(current.clone(), opts).await;
                    if result.is_error() {
                        let error = result.error.clone().unwrap_or_default();
                        self.emit(PipelineEvent::StepError {
                            pipeline_run_id: pipeline_run_id.clone(),
                            step_index,
                            step_name: step.name.clone(),
                            error: error.clone(),
                        });
                        return Err(RuntimeError::Execution(format!("pipeline step '{}' failed: {error}", step.name)));
                    }
                    reduced = Some(result);
                }
            }

            self.emit(PipelineEvent::StepComplete {
                pipeline_run_id: pipeline_run_id.clone(),
                step_index,
                step_name: step.name.clone(),
            });
        }

        Ok(reduced.map_or_else(|| PipelineOutcome::Items(last_results.clone()), PipelineOutcome::Reduced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sandbox::mock::MockSandboxProvider;
    use crate::domain::models::{AgentConfig, AgentKind};

    fn claude() -> AgentConfig {
        AgentConfig::gateway(AgentKind::Claude, "sk-test")
    }

    fn engine() -> SwarmEngine {
        let provider: Arc<dyn crate::domain::ports::SandboxProvider> = Arc::new(MockSandboxProvider::new());
        SwarmEngine::new(provider, None, 4)
    }

    #[test]
    fn appending_a_step_after_reduce_is_a_configuration_error() {
        let pipeline = Pipeline::new(engine())
            .reduce("summarize", OpOptions { agent: claude(), ..Default::default() })
            .unwrap();
        let result = pipeline.map("extra", OpOptions { agent: claude(), ..Default::default() });
        assert!(matches!(result, Err(RuntimeError::Configuration(_))));
    }

    #[tokio::test]
    async fn map_then_filter_runs_each_step_in_order() {
        let pipeline = Pipeline::new(engine())
            .map("score", OpOptions { agent: claude(), ..Default::default() })
            .unwrap()
            .filter("keep_all", OpOptions { agent: claude(), ..Default::default() }, FilterEmit::All, |_| true)
            .unwrap();

        let mut events = pipeline.subscribe();
        let items = vec![WorkItem::new("a"), WorkItem::new("b")];
        let outcome = pipeline.run(items).await.unwrap();
        match outcome {
            PipelineOutcome::Items(results) => assert_eq!(results.len(), 2),
            PipelineOutcome::Reduced(_) => panic!("expected item-list outcome, not a reduce"),
        }

        let mut saw_step_starts = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::StepStart { .. }) {
                saw_step_starts += 1;
            }
        }
        assert_eq!(saw_step_starts, 2);
    }
}
