//! Fan-out execution over many `Session`s under a shared concurrency budget:
//! `map`, `filter`, `reduce`, and `bestOf`, each with an optional
//! feedback-retry verify loop and an error-retry policy.
//!
//! A single `SwarmEngine` owns the process-wide `ConcurrencyGate`: every
//! worker, candidate, verifier, and judge acquires one permit for the full
//! span of its sandbox's life (boot → run → collect output → kill).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::{
    AgentConfig, BestOfInfo, FileMap, IndexedMeta, ReduceResult, RetryConfig, SessionOptions, SessionRole,
    SwarmResult, SwarmStatus, VerifyInfo, WorkspaceMode,
};
use crate::domain::ports::{SandboxProvider, StorageClient};
use crate::infrastructure::logging::ObservabilityLogger;

use super::concurrency::ConcurrencyGate;
use super::session_engine::{RunOptions, Session};

/// One unit of work: the prompt an agent receives plus files to mount under
/// `context/` (map/filter/bestOf) or `item_<idx>/` (reduce).
#[derive(Debug, Clone, Default)]
pub struct WorkItem {
    pub prompt: String,
    pub files: Vec<(String, Vec<u8>)>,
}

impl WorkItem {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), files: Vec::new() }
    }
}

/// A per-item quality strategy layered on top of the plain worker run.
/// `bestOf` is not a variant here: it is its own top-level operation over a
/// single item, not a per-item modifier of `map`/`filter`/`reduce`.
#[derive(Clone, Default)]
pub enum QualityLoop {
    #[default]
    None,
    Verify(VerifyOptions),
}

#[derive(Clone)]
pub struct VerifyOptions {
    pub verifier: AgentConfig,
    /// Default 3.
    pub max_attempts: u32,
}

#[derive(Clone)]
pub struct BestOfOptions {
    pub judge: AgentConfig,
    /// Must be ≥ 2.
    pub candidates: usize,
}

/// Shared knobs for one swarm call.
#[derive(Clone)]
pub struct OpOptions {
    pub agent: AgentConfig,
    pub workspace_mode: Option<WorkspaceMode>,
    pub result_schema: Option<Value>,
    pub timeout_ms: Option<u64>,
    pub operation_name: String,
    pub quality: QualityLoop,
    pub pipeline_run_id: Option<String>,
    pub pipeline_step_index: Option<usize>,
}

impl Default for OpOptions {
    fn default() -> Self {
        Self {
            agent: AgentConfig::gateway(crate::domain::models::AgentKind::Claude, ""),
            workspace_mode: None,
            result_schema: None,
            timeout_ms: None,
            operation_name: "swarm_op".to_string(),
            quality: QualityLoop::None,
            pipeline_run_id: None,
            pipeline_step_index: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifierVerdict {
    passed: bool,
    reasoning: Option<String>,
    feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    winner: usize,
    reasoning: String,
}

fn verifier_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["passed"],
        "properties": {
            "passed": {"type": "boolean"},
            "reasoning": {"type": "string"},
            "feedback": {"type": "string"},
        },
    })
}

fn judge_schema(n: usize) -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["winner", "reasoning"],
        "properties": {
            "winner": {"type": "integer", "minimum": 0, "maximum": n.saturating_sub(1)},
            "reasoning": {"type": "string"},
        },
    })
}

fn new_swarm_tag(operation_name: &str) -> String {
    let sanitized: String = operation_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("swarm_{sanitized}_{}", Uuid::new_v4().simple())
}

/// Applies a `filter` predicate's verdict to an already-`Success` result:
/// passing items keep their original input files, failing ones become
/// `Filtered` with no data/files. Pulled out of `filter`'s async closure so
/// the partition rule can be exercised directly, without a sandbox, by
/// `filter_partition_is_exhaustive_and_disjoint` below.
fn apply_filter_outcome<T>(result: &mut SwarmResult<T>, passes: bool, original_files: FileMap) {
    if passes {
        result.files = original_files;
    } else {
        result.status = SwarmStatus::Filtered;
        result.data = None;
        result.files = FileMap::new();
    }
}

/// Raw result of one worker/candidate/verifier/judge execution, before it is
/// wrapped into a `SwarmResult`/`ReduceResult`.
struct WorkerOutcome<T> {
    data: Option<T>,
    files: FileMap,
    error: Option<String>,
    raw_data: Option<String>,
}

impl<T> WorkerOutcome<T> {
    fn err(message: impl Into<String>) -> Self {
        Self { data: None, files: FileMap::new(), error: Some(message.into()), raw_data: None }
    }
}

#[derive(Clone)]
pub struct SwarmEngine {
    provider: Arc<dyn SandboxProvider>,
    storage: Option<Arc<dyn StorageClient>>,
    gate: ConcurrencyGate,
    retry: RetryConfig,
    observability: Option<Arc<ObservabilityLogger>>,
}

impl SwarmEngine {
    pub fn new(provider: Arc<dyn SandboxProvider>, storage: Option<Arc<dyn StorageClient>>, max_concurrency: usize) -> Self {
        Self {
            provider,
            storage,
            gate: ConcurrencyGate::new(max_concurrency),
            retry: RetryConfig::default(),
            observability: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_observability(mut self, observability: Arc<ObservabilityLogger>) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Runs one sandboxed worker to completion: acquires a concurrency
    /// permit, boots a `Session`, mounts `files`, runs `prompt`, collects and
    /// deserializes `output/result.json`, and kills the sandbox. Holds its
    /// permit for the whole span.
    async fn execute_once<T: DeserializeOwned>(
        &self,
        agent: &AgentConfig,
        prompt: &str,
        files: &[(String, Vec<u8>)],
        result_schema: Option<&Value>,
        workspace_mode: Option<WorkspaceMode>,
        timeout_ms: Option<u64>,
        tag: String,
    ) -> WorkerOutcome<T> {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(err) => return WorkerOutcome::err(err.to_string()),
        };

        let options = SessionOptions { workspace_mode, result_schema: result_schema.cloned(), storage_scope_tag: Some(tag) };
        let session = match Session::new_with_observability(
            agent.clone(),
            options,
            self.provider.clone(),
            self.storage.clone(),
            self.observability.clone(),
        ) {
            Ok(session) => session,
            Err(err) => return WorkerOutcome::err(err.to_string()),
        };

        if !files.is_empty() {
            if let Err(err) = session.upload_files(files).await {
                let _ = session.kill().await;
                return WorkerOutcome::err(err.to_string());
            }
        }

        let run = session.run(RunOptions { prompt: prompt.to_string(), timeout_ms, ..Default::default() }).await;
        let outcome = match run {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = session.kill().await;
                return WorkerOutcome::err(err.to_string());
            }
        };
        if outcome.exit_code != 0 {
            let _ = session.kill().await;
            return WorkerOutcome::err(format!("agent exited with code {}", outcome.exit_code));
        }

        let output = match session.get_output_files().await {
            Ok(output) => output,
            Err(err) => {
                let _ = session.kill().await;
                return WorkerOutcome::err(err.to_string());
            }
        };
        let _ = session.kill().await;

        if let Some(err) = output.error {
            return WorkerOutcome { data: None, files: output.files, error: Some(err), raw_data: output.raw_data };
        }

        let data = match output.data {
            Some(value) => serde_json::from_value::<T>(value).ok(),
            None => output.files.get("result.json").and_then(|bytes| serde_json::from_slice::<T>(bytes).ok()),
        };

        match data {
            Some(data) => WorkerOutcome { data: Some(data), files: output.files, error: None, raw_data: None },
            None => WorkerOutcome::err("result.json missing or did not match the expected shape"),
        }
    }

    /// Wraps `execute_once` in the error-retry policy: retries up to
    /// `retry.max_retries` additional attempts while the outcome is an
    /// error, tagging each retry `-er<n>` for trace correlation. Returns the
    /// outcome together with the number of retries actually consumed.
    async fn execute_with_retry<T: DeserializeOwned>(
        &self,
        agent: &AgentConfig,
        prompt: &str,
        files: &[(String, Vec<u8>)],
        result_schema: Option<&Value>,
        workspace_mode: Option<WorkspaceMode>,
        timeout_ms: Option<u64>,
        swarm_tag: &str,
    ) -> (WorkerOutcome<T>, u32) {
        let mut attempt = 0;
        loop {
            let tag = if attempt == 0 { swarm_tag.to_string() } else { format!("{swarm_tag}-er{attempt}") };
            let outcome =
                self.execute_once::<T>(agent, prompt, files, result_schema, workspace_mode, timeout_ms, tag).await;
            if outcome.error.is_none() || attempt >= self.retry.max_retries {
                return (outcome, attempt);
            }
            attempt += 1;
        }
    }

    fn build_meta(
        operation_id: &str,
        operation_name: &str,
        item_index: usize,
        candidate_index: Option<usize>,
        role: SessionRole,
        error_retry: u32,
        verify_retry: u32,
        swarm_tag: &str,
        opts: &OpOptions,
    ) -> IndexedMeta {
        IndexedMeta {
            operation_id: operation_id.to_string(),
            operation_name: operation_name.to_string(),
            item_index,
            error_retry,
            verify_retry,
            candidate_index,
            pipeline_run_id: opts.pipeline_run_id.clone(),
            pipeline_step_index: opts.pipeline_step_index,
            swarm_tag: Some(swarm_tag.to_string()),
            session_tag: None,
            role: Some(role),
        }
    }

    fn finish_result<T>(outcome: WorkerOutcome<T>, meta: IndexedMeta, verify: Option<VerifyInfo>) -> SwarmResult<T> {
        let mut result = match outcome.error {
            Some(err) => SwarmResult::error(err, meta, outcome.raw_data),
            None => SwarmResult::success(outcome.data.expect("data present on non-error outcome"), meta, outcome.files),
        };
        result.verify = verify;
        result
    }

    async fn run_verify_loop<T: DeserializeOwned + Send + Sync + 'static>(
        &self,
        item: &WorkItem,
        item_index: usize,
        operation_id: &str,
        swarm_tag: &str,
        opts: &OpOptions,
        verify_opts: &VerifyOptions,
        role: SessionRole,
    ) -> SwarmResult<T> {
        // `item.files` are expected to already carry their final mount
        // prefix (`context/` for map/filter, `item_<idx>/` for reduce) —
        // callers prefix before invoking this loop, not this function,
        // since the two ops mount differently.
        let max_attempts = verify_opts.max_attempts.max(1);
        let context_files = item.files.clone();
        let mut prompt = item.prompt.clone();
        let mut last_outcome: Option<WorkerOutcome<T>> = None;
        let mut last_error_retry = 0;

        for attempt in 1..=max_attempts {
            let worker_tag = format!("{swarm_tag}-vr{}", attempt - 1);
            let (outcome, error_retry) = self
                .execute_with_retry::<T>(
                    &opts.agent,
                    &prompt,
                    &context_files,
                    opts.result_schema.as_ref(),
                    opts.workspace_mode,
                    opts.timeout_ms,
                    &worker_tag,
                )
                .await;
            if outcome.error.is_some() {
                let meta =
                    Self::build_meta(operation_id, &opts.operation_name, item_index, None, role, error_retry, attempt - 1, swarm_tag, opts);
                return Self::finish_result(outcome, meta, None);
            }

            let verdict = self.run_verifier(&verify_opts.verifier, &item.prompt, &outcome.files, &format!("{worker_tag}-judge")).await;
            match verdict {
                Ok(v) if v.passed => {
                    let verify_info = VerifyInfo { attempts: attempt, passed: true, reasoning: v.reasoning };
                    let meta = Self::build_meta(
                        operation_id,
                        &opts.operation_name,
                        item_index,
                        None,
                        role,
                        error_retry,
                        attempt - 1,
                        swarm_tag,
                        opts,
                    );
                    return Self::finish_result(outcome, meta, Some(verify_info));
                }
                Ok(v) => {
                    let feedback = v.feedback.or(v.reasoning).unwrap_or_else(|| "no feedback provided".to_string());
                    prompt = format!("{}\n\nA previous attempt was rejected. Feedback: {}", item.prompt, feedback);
                    last_error_retry = error_retry;
                    last_outcome = Some(outcome);
                }
                Err(_) => {
                    prompt = format!("{}\n\nA previous attempt could not be verified; try again.", item.prompt);
                    last_error_retry = error_retry;
                    last_outcome = Some(outcome);
                }
            }
        }

        let outcome = last_outcome.expect("loop runs at least once");
        let verify_info = VerifyInfo { attempts: max_attempts, passed: false, reasoning: None };
        let meta = Self::build_meta(
            operation_id,
            &opts.operation_name,
            item_index,
            None,
            role,
            last_error_retry,
            max_attempts - 1,
            swarm_tag,
            opts,
        );
        let mut result = Self::finish_result(outcome, meta, Some(verify_info));
        result.status = SwarmStatus::Error;
        if result.error.is_none() {
            result.error = Some("verify attempts exhausted without passing".to_string());
        }
        result.data = None;
        result
    }

    async fn run_verifier(
        &self,
        verifier: &AgentConfig,
        original_prompt: &str,
        worker_files: &FileMap,
        tag: &str,
    ) -> Result<VerifierVerdict, String> {
        let schema = verifier_schema();
        let mut files: Vec<(String, Vec<u8>)> = vec![("worker_task/prompt.txt".to_string(), original_prompt.as_bytes().to_vec())];
        for (path, bytes) in worker_files {
            files.push((format!("worker_output/{path}"), bytes.clone()));
        }
        let prompt = "Review worker_task/prompt.txt against worker_output/*. Decide pass or fail and explain why.".to_string();
        let (outcome, _) =
            self.execute_with_retry::<VerifierVerdict>(verifier, &prompt, &files, Some(&schema), None, None, tag).await;
        outcome.data.ok_or_else(|| outcome.error.unwrap_or_else(|| "verifier produced no verdict".to_string()))
    }

    /// One item for `map`/`filter`: runs the plain worker or its verify
    /// loop, depending on `opts.quality`.
    async fn run_item<T: DeserializeOwned + Send + Sync + 'static>(
        &self,
        item: WorkItem,
        item_index: usize,
        operation_id: &str,
        swarm_tag: &str,
        opts: &OpOptions,
    ) -> SwarmResult<T> {
        match &opts.quality {
            QualityLoop::None => {
                let context_files: Vec<(String, Vec<u8>)> =
                    item.files.iter().map(|(p, b)| (format!("context/{p}"), b.clone())).collect();
                let (outcome, error_retry) = self
                    .execute_with_retry::<T>(
                        &opts.agent,
                        &item.prompt,
                        &context_files,
                        opts.result_schema.as_ref(),
                        opts.workspace_mode,
                        opts.timeout_ms,
                        swarm_tag,
                    )
                    .await;
                let meta = Self::build_meta(
                    operation_id,
                    &opts.operation_name,
                    item_index,
                    None,
                    SessionRole::Worker,
                    error_retry,
                    0,
                    swarm_tag,
                    opts,
                );
                Self::finish_result(outcome, meta, None)
            }
            QualityLoop::Verify(verify_opts) => {
                let prefixed = WorkItem {
                    prompt: item.prompt.clone(),
                    files: item.files.iter().map(|(p, b)| (format!("context/{p}"), b.clone())).collect(),
                };
                self.run_verify_loop(&prefixed, item_index, operation_id, swarm_tag, opts, verify_opts, SessionRole::Worker).await
            }
        }
    }

    /// One `SwarmResult<T>` per input item, each its own Session.
    pub async fn map<T: DeserializeOwned + Send + Sync + 'static>(&self, items: Vec<WorkItem>, opts: OpOptions) -> Vec<SwarmResult<T>> {
        let swarm_tag = new_swarm_tag(&opts.operation_name);
        let operation_id = Uuid::new_v4().to_string();
        let futures = items.into_iter().enumerate().map(|(idx, item)| {
            let engine = self.clone();
            let opts = opts.clone();
            let swarm_tag = swarm_tag.clone();
            let operation_id = operation_id.clone();
            async move { engine.run_item::<T>(item, idx, &operation_id, &swarm_tag, &opts).await }
        });
        futures::future::join_all(futures).await
    }

    /// Runs the worker on every item, then applies `predicate` to the
    /// successful ones. Passing items forward their *original input files*,
    /// not the worker's `output/*`.
    pub async fn filter<T, P>(&self, items: Vec<WorkItem>, opts: OpOptions, predicate: P) -> Vec<SwarmResult<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let swarm_tag = new_swarm_tag(&opts.operation_name);
        let operation_id = Uuid::new_v4().to_string();
        let predicate = Arc::new(predicate);
        let futures = items.into_iter().enumerate().map(|(idx, item)| {
            let engine = self.clone();
            let opts = opts.clone();
            let swarm_tag = swarm_tag.clone();
            let operation_id = operation_id.clone();
            let predicate = predicate.clone();
            let original_files: FileMap = item.files.iter().cloned().collect();
            async move {
                let mut result = engine.run_item::<T>(item, idx, &operation_id, &swarm_tag, &opts).await;
                if result.status == SwarmStatus::Success {
                    let passes = result.data.as_ref().is_some_and(|data| predicate(data));
                    apply_filter_outcome(&mut result, passes, original_files);
                }
                result
            }
        });
        futures::future::join_all(futures).await
    }

    /// Mounts every item under `item_<idx>/*` in a single Session and
    /// summarises them in one pass.
    pub async fn reduce<T: DeserializeOwned + Send + Sync + 'static>(&self, items: Vec<WorkItem>, opts: OpOptions) -> ReduceResult<T> {
        let swarm_tag = new_swarm_tag(&opts.operation_name);
        let operation_id = Uuid::new_v4().to_string();

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        let mut prompt = String::new();
        for (idx, item) in items.iter().enumerate() {
            for (path, bytes) in &item.files {
                files.push((format!("item_{idx}/{path}"), bytes.clone()));
            }
            prompt.push_str(&format!("item_{idx}: {}\n", item.prompt));
        }

        match &opts.quality {
            QualityLoop::None => {
                let (outcome, error_retry) = self
                    .execute_with_retry::<T>(
                        &opts.agent,
                        &prompt,
                        &files,
                        opts.result_schema.as_ref(),
                        opts.workspace_mode,
                        opts.timeout_ms,
                        &swarm_tag,
                    )
                    .await;
                let meta =
                    Self::build_meta(&operation_id, &opts.operation_name, 0, None, SessionRole::Worker, error_retry, 0, &swarm_tag, &opts);
                match outcome.error {
                    Some(err) => ReduceResult::error(err, meta, outcome.raw_data),
                    None => ReduceResult::success(outcome.data.expect("data present on non-error outcome"), meta, outcome.files),
                }
            }
            QualityLoop::Verify(verify_opts) => {
                let item = WorkItem { prompt, files };
                let result = self.run_verify_loop::<T>(&item, 0, &operation_id, &swarm_tag, &opts, verify_opts, SessionRole::Worker).await;
                ReduceResult {
                    status: result.status,
                    data: result.data,
                    files: result.files,
                    meta: result.meta,
                    error: result.error,
                    raw_data: result.raw_data,
                    verify: result.verify,
                }
            }
        }
    }

    /// N candidates run in parallel; a judge Session picks a winner from
    /// `worker_task/*` + `candidate_<i>/*` (or `candidate_<i>/_failed.txt`).
    pub async fn best_of<T: DeserializeOwned + Send + Sync + 'static>(
        &self,
        item: WorkItem,
        opts: OpOptions,
        best_of_opts: BestOfOptions,
    ) -> SwarmResult<T> {
        if best_of_opts.candidates < 2 {
            let meta = IndexedMeta { operation_name: opts.operation_name.clone(), ..Default::default() };
            return SwarmResult::error("bestOf requires at least 2 candidates", meta, None);
        }

        let swarm_tag = new_swarm_tag(&opts.operation_name);
        let operation_id = Uuid::new_v4().to_string();
        let context_files: Vec<(String, Vec<u8>)> =
            item.files.iter().map(|(p, b)| (format!("context/{p}"), b.clone())).collect();

        let candidate_futures = (0..best_of_opts.candidates).map(|i| {
            let engine = self.clone();
            let opts = opts.clone();
            let files = context_files.clone();
            let prompt = item.prompt.clone();
            let swarm_tag = swarm_tag.clone();
            let operation_id = operation_id.clone();
            async move {
                let tag = format!("{swarm_tag}-c{i}");
                let (outcome, error_retry) = engine
                    .execute_with_retry::<T>(&opts.agent, &prompt, &files, opts.result_schema.as_ref(), opts.workspace_mode, opts.timeout_ms, &tag)
                    .await;
                let meta = Self::build_meta(
                    &operation_id,
                    &opts.operation_name,
                    0,
                    Some(i),
                    SessionRole::Candidate,
                    error_retry,
                    0,
                    &swarm_tag,
                    &opts,
                );
                Self::finish_result(outcome, meta, None)
            }
        });
        let candidates: Vec<SwarmResult<T>> = futures::future::join_all(candidate_futures).await;

        let mut judge_files: Vec<(String, Vec<u8>)> = vec![("worker_task/prompt.txt".to_string(), item.prompt.as_bytes().to_vec())];
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.is_error() {
                let message = candidate.error.clone().unwrap_or_default();
                judge_files.push((format!("candidate_{i}/_failed.txt"), message.into_bytes()));
            } else {
                for (path, bytes) in &candidate.files {
                    judge_files.push((format!("candidate_{i}/{path}"), bytes.clone()));
                }
            }
        }

        let schema = judge_schema(best_of_opts.candidates);
        let judge_prompt = "Review worker_task/prompt.txt and each candidate_<i>/ folder, then pick the best.".to_string();
        let judge_tag = format!("{swarm_tag}-judge");
        let (judge_outcome, _) = self
            .execute_with_retry::<JudgeVerdict>(&best_of_opts.judge, &judge_prompt, &judge_files, Some(&schema), opts.workspace_mode, opts.timeout_ms, &judge_tag)
            .await;

        let first_success = candidates.iter().position(|c| !c.is_error());
        let (winner_index, judge_reasoning, judge_defaulted) = match judge_outcome.data {
            Some(verdict) if verdict.winner < best_of_opts.candidates => (verdict.winner, Some(verdict.reasoning), false),
            Some(verdict) => (0, Some(verdict.reasoning), true),
            None => (first_success.unwrap_or(0), None, true),
        };

        let best_of_info = BestOfInfo {
            candidate_count: best_of_opts.candidates,
            winner_index,
            judge_reasoning,
            judge_defaulted,
        };

        let mut winner = candidates.into_iter().nth(winner_index).expect("winner_index within candidate_count");
        winner.meta.role = Some(SessionRole::Worker);
        winner.meta.operation_id = operation_id;
        winner.best_of = Some(best_of_info);
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sandbox::mock::{MockSandboxProvider, ScriptedReply};
    use crate::domain::models::{AgentKind, IndexedMeta};
    use proptest::prelude::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        score: u32,
    }

    fn schema() -> Value {
        serde_json::json!({"type": "object", "required": ["score"], "properties": {"score": {"type": "integer"}}})
    }

    fn claude() -> AgentConfig {
        AgentConfig::gateway(AgentKind::Claude, "sk-test")
    }

    async fn provider_with(replies: Vec<ScriptedReply>) -> Arc<dyn SandboxProvider> {
        let mock = MockSandboxProvider::new();
        for reply in replies {
            mock.script(reply).await;
        }
        Arc::new(mock)
    }

    #[tokio::test]
    async fn map_runs_one_session_per_item_indexed_by_position() {
        let provider = provider_with(vec![
            ScriptedReply::success("item_0", vec!["done".to_string()]),
            ScriptedReply::success("item_1", vec!["done".to_string()]),
        ])
        .await;
        let engine = SwarmEngine::new(provider, None, 4);
        let opts = OpOptions { agent: claude(), result_schema: Some(schema()), ..Default::default() };
        let items = vec![WorkItem::new("item_0"), WorkItem::new("item_1")];
        let results = engine.map::<Item>(items, opts).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].meta.item_index, 0);
        assert_eq!(results[1].meta.item_index, 1);
    }

    #[tokio::test]
    async fn filter_partition_covers_every_input() {
        let provider: Arc<dyn SandboxProvider> = Arc::new(MockSandboxProvider::new());
        let engine = SwarmEngine::new(provider, None, 4);
        let opts = OpOptions { agent: claude(), result_schema: Some(schema()), ..Default::default() };
        let items = vec![WorkItem::new("a"), WorkItem::new("b"), WorkItem::new("c")];
        let results = engine.filter::<Item, _>(items, opts, |_| true).await;
        assert_eq!(results.len(), 3);
        let total: usize = results
            .iter()
            .map(|r| usize::from(matches!(r.status, SwarmStatus::Success | SwarmStatus::Filtered | SwarmStatus::Error)))
            .sum();
        assert_eq!(total, 3);
    }

    /// `apply_filter_outcome` is the partition rule `filter` applies to every
    /// already-`Success` result; every input must land in exactly one of
    /// success (kept), filtered, or its original status if not a success.
    #[test_strategy::proptest]
    fn filter_partition_is_exhaustive_and_disjoint(was_success: bool, passes: bool) {
        let meta = IndexedMeta::default();
        let mut result: SwarmResult<Item> = if was_success {
            SwarmResult::success(Item { score: 1 }, meta, FileMap::new())
        } else {
            SwarmResult::error("worker failed", meta, None)
        };

        if result.status == SwarmStatus::Success {
            apply_filter_outcome(&mut result, passes, FileMap::new());
        }

        match (was_success, passes) {
            (true, true) => prop_assert_eq!(result.status, SwarmStatus::Success),
            (true, false) => prop_assert_eq!(result.status, SwarmStatus::Filtered),
            (false, _) => prop_assert_eq!(result.status, SwarmStatus::Error),
        }

        // exactly one of the three statuses, never more than one, never none.
        let statuses = [
            result.status == SwarmStatus::Success,
            result.status == SwarmStatus::Filtered,
            result.status == SwarmStatus::Error,
        ];
        prop_assert_eq!(statuses.iter().filter(|matched| **matched).count(), 1);
    }

    #[tokio::test]
    async fn best_of_requires_at_least_two_candidates() {
        let provider: Arc<dyn SandboxProvider> = Arc::new(MockSandboxProvider::new());
        let engine = SwarmEngine::new(provider, None, 4);
        let opts = OpOptions { agent: claude(), result_schema: Some(schema()), ..Default::default() };
        let judge = claude();
        let result = engine.best_of::<Item>(WorkItem::new("x"), opts, BestOfOptions { judge, candidates: 1 }).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn concurrency_gate_bounds_parallel_sessions() {
        let provider: Arc<dyn SandboxProvider> = Arc::new(MockSandboxProvider::new());
        let engine = SwarmEngine::new(provider, None, 2);
        assert_eq!(engine.available_permits(), 2);
        let opts = OpOptions { agent: claude(), result_schema: Some(schema()), ..Default::default() };
        let items: Vec<WorkItem> = (0..5).map(|i| WorkItem::new(format!("item_{i}"))).collect();
        let results = engine.map::<Item>(items, opts).await;
        assert_eq!(results.len(), 5);
        assert_eq!(engine.available_permits(), 2);
    }
}
