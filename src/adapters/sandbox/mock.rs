//! In-memory `SandboxProvider` for tests: no subprocesses, no filesystem
//! access outside an in-memory file map. Scripted responses let tests drive
//! the session/swarm engines through specific agent-output shapes without a
//! real CLI binary installed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::ports::sandbox_provider::{
    CommandHandle, CreateOptions, OutputLine, ProviderCapabilities, SandboxInstance,
    SandboxProvider, SpawnOptions, WaitResult,
};

/// One scripted reply: if `trigger` is a substring of the joined command
/// line, these lines and exit code are returned instead of the default.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub trigger: String,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub exit_code: i32,
}

impl ScriptedReply {
    pub fn success(trigger: impl Into<String>, stdout_lines: Vec<String>) -> Self {
        Self { trigger: trigger.into(), stdout_lines, stderr_lines: Vec::new(), exit_code: 0 }
    }

    pub fn failure(trigger: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { trigger: trigger.into(), stdout_lines: Vec::new(), stderr_lines: vec![stderr.into()], exit_code }
    }
}

#[derive(Debug, Clone)]
struct DefaultReply {
    stdout_lines: Vec<String>,
    exit_code: i32,
}

impl Default for DefaultReply {
    fn default() -> Self {
        Self { stdout_lines: vec!["mock agent completed the task".to_string()], exit_code: 0 }
    }
}

struct ScriptBook {
    scripts: RwLock<Vec<ScriptedReply>>,
    default_reply: RwLock<DefaultReply>,
}

impl ScriptBook {
    async fn resolve(&self, joined_command: &str) -> (Vec<String>, Vec<String>, i32) {
        let scripts = self.scripts.read().await;
        for reply in scripts.iter() {
            if joined_command.contains(&reply.trigger) {
                return (reply.stdout_lines.clone(), reply.stderr_lines.clone(), reply.exit_code);
            }
        }
        drop(scripts);
        let default = self.default_reply.read().await.clone();
        (default.stdout_lines, Vec::new(), default.exit_code)
    }
}

/// Scriptable in-memory sandbox provider. Cheap to clone: every clone shares
/// the same script book and per-sandbox file maps.
pub struct MockSandboxProvider {
    book: Arc<ScriptBook>,
}

impl MockSandboxProvider {
    pub fn new() -> Self {
        Self {
            book: Arc::new(ScriptBook {
                scripts: RwLock::new(Vec::new()),
                default_reply: RwLock::new(DefaultReply::default()),
            }),
        }
    }

    pub async fn script(&self, reply: ScriptedReply) {
        self.book.scripts.write().await.push(reply);
    }

    pub async fn set_default(&self, stdout_lines: Vec<String>, exit_code: i32) {
        *self.book.default_reply.write().await = DefaultReply { stdout_lines, exit_code };
    }
}

impl Default for MockSandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { supports_pause: true, supports_interrupt: true }
    }

    async fn create(&self, _opts: CreateOptions) -> RuntimeResult<Box<dyn SandboxInstance>> {
        Ok(Box::new(MockInstance {
            id: uuid::Uuid::new_v4().to_string(),
            files: Arc::new(Mutex::new(HashMap::new())),
            book: self.book.clone(),
        }))
    }

    async fn connect(&self, sandbox_id: &str) -> RuntimeResult<Box<dyn SandboxInstance>> {
        Ok(Box::new(MockInstance {
            id: sandbox_id.to_string(),
            files: Arc::new(Mutex::new(HashMap::new())),
            book: self.book.clone(),
        }))
    }
}

struct MockInstance {
    id: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    book: Arc<ScriptBook>,
}

#[async_trait]
impl SandboxInstance for MockInstance {
    fn sandbox_id(&self) -> String {
        self.id.clone()
    }

    async fn spawn(&self, command: &[String], _opts: SpawnOptions) -> RuntimeResult<Box<dyn CommandHandle>> {
        if command.is_empty() {
            return Err(RuntimeError::Execution("empty command".to_string()));
        }
        let joined = command.join(" ");
        let (stdout_lines, stderr_lines, exit_code) = self.book.resolve(&joined).await;
        let mut lines: Vec<OutputLine> = stdout_lines.into_iter().map(OutputLine::Stdout).collect();
        lines.extend(stderr_lines.into_iter().map(OutputLine::Stderr));
        Ok(Box::new(MockCommandHandle { lines: Mutex::new(lines.into_iter()), exit_code }))
    }

    async fn kill_process(&self, _pid: u32) -> RuntimeResult<bool> {
        Ok(true)
    }

    async fn read_file(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound { resource: "file", id: path.to_string() })
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> RuntimeResult<()> {
        self.files.lock().await.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn write_files(&self, files: &[(String, Vec<u8>)]) -> RuntimeResult<()> {
        let mut guard = self.files.lock().await;
        for (path, data) in files {
            guard.insert(path.clone(), data.clone());
        }
        Ok(())
    }

    async fn make_dir(&self, _path: &str) -> RuntimeResult<()> {
        Ok(())
    }

    async fn get_host(&self, _port: u16) -> RuntimeResult<Option<String>> {
        Ok(Some("127.0.0.1:0".to_string()))
    }

    async fn pause(&self) -> RuntimeResult<bool> {
        Ok(true)
    }

    async fn kill(&self) -> RuntimeResult<()> {
        self.files.lock().await.clear();
        Ok(())
    }
}

struct MockCommandHandle {
    lines: Mutex<std::vec::IntoIter<OutputLine>>,
    exit_code: i32,
}

#[async_trait]
impl CommandHandle for MockCommandHandle {
    fn process_id(&self) -> Option<u32> {
        None
    }

    async fn write_stdin(&self, _data: &[u8]) -> RuntimeResult<()> {
        Ok(())
    }

    async fn next_line(&self) -> Option<OutputLine> {
        self.lines.lock().await.next()
    }

    async fn kill(&self) -> RuntimeResult<bool> {
        Ok(true)
    }

    async fn wait(&self) -> RuntimeResult<WaitResult> {
        Ok(WaitResult { exit_code: self.exit_code, stdout: String::new(), stderr: String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_reply_reports_success() {
        let provider = MockSandboxProvider::new();
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        let handle = sandbox
            .spawn(&["claude".to_string(), "-p".to_string(), "hi".to_string()], SpawnOptions::default())
            .await
            .unwrap();
        let mut saw_line = false;
        while handle.next_line().await.is_some() {
            saw_line = true;
        }
        assert!(saw_line);
        let result = handle.wait().await.unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn scripted_trigger_overrides_default() {
        let provider = MockSandboxProvider::new();
        provider.script(ScriptedReply::failure("rm -rf", 1, "refused")).await;
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        let handle = sandbox
            .spawn(&["bash".to_string(), "-c".to_string(), "rm -rf /".to_string()], SpawnOptions::default())
            .await
            .unwrap();
        while handle.next_line().await.is_some() {}
        let result = handle.wait().await.unwrap();
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn files_round_trip_through_memory() {
        let provider = MockSandboxProvider::new();
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        sandbox.write_file("output/result.json", b"{}").await.unwrap();
        let data = sandbox.read_file("output/result.json").await.unwrap();
        assert_eq!(data, b"{}");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let provider = MockSandboxProvider::new();
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        let result = sandbox.spawn(&[], SpawnOptions::default()).await;
        assert!(result.is_err());
    }
}
