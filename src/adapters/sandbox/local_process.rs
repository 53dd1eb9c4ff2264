//! Reference `SandboxProvider`: runs agent CLIs as real local subprocesses
//! rooted under per-sandbox directories on the host filesystem. This is the
//! adapter the crate's own tests and demo binary exercise; production
//! container/VM-backed providers live outside this crate and implement the
//! same port.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::ports::sandbox_provider::{
    CommandHandle, CreateOptions, OutputLine, ProviderCapabilities, SandboxInstance,
    SandboxProvider, SpawnOptions, WaitResult,
};

struct SandboxRecord {
    root: PathBuf,
    envs: HashMap<String, String>,
}

/// Spawns agent CLIs as host subprocesses. Sandbox isolation here is purely
/// directory-scoped, not process- or filesystem-namespace-isolated; that
/// tradeoff is acceptable for local development and tests, not for untrusted
/// code, which is why production deployments plug in a real container
/// provider at this same port.
pub struct LocalProcessSandboxProvider {
    base_dir: PathBuf,
    sandboxes: Arc<RwLock<HashMap<String, SandboxRecord>>>,
}

impl LocalProcessSandboxProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), sandboxes: Arc::new(RwLock::new(HashMap::new())) }
    }
}

#[async_trait]
impl SandboxProvider for LocalProcessSandboxProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { supports_pause: false, supports_interrupt: true }
    }

    async fn create(&self, opts: CreateOptions) -> RuntimeResult<Box<dyn SandboxInstance>> {
        let id = uuid::Uuid::new_v4().to_string();
        let root = opts
            .working_directory
            .map(PathBuf::from)
            .unwrap_or_else(|| self.base_dir.join(&id));
        tokio::fs::create_dir_all(&root).await.map_err(RuntimeError::from)?;
        self.sandboxes
            .write()
            .await
            .insert(id.clone(), SandboxRecord { root: root.clone(), envs: opts.envs.clone() });
        Ok(Box::new(LocalProcessInstance { id, root, envs: opts.envs }))
    }

    async fn connect(&self, sandbox_id: &str) -> RuntimeResult<Box<dyn SandboxInstance>> {
        let sandboxes = self.sandboxes.read().await;
        let record = sandboxes
            .get(sandbox_id)
            .ok_or_else(|| RuntimeError::NotFound { resource: "sandbox", id: sandbox_id.to_string() })?;
        Ok(Box::new(LocalProcessInstance {
            id: sandbox_id.to_string(),
            root: record.root.clone(),
            envs: record.envs.clone(),
        }))
    }
}

struct LocalProcessInstance {
    id: String,
    root: PathBuf,
    envs: HashMap<String, String>,
}

impl LocalProcessInstance {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl SandboxInstance for LocalProcessInstance {
    fn sandbox_id(&self) -> String {
        self.id.clone()
    }

    async fn spawn(&self, command: &[String], opts: SpawnOptions) -> RuntimeResult<Box<dyn CommandHandle>> {
        let Some((program, args)) = command.split_first() else {
            return Err(RuntimeError::Execution("empty command".to_string()));
        };
        let cwd = opts.cwd.map(|c| self.resolve(&c)).unwrap_or_else(|| self.root.clone());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        for (key, value) in &opts.envs {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Execution(format!("failed to spawn {program}: {e}")))?;
        let pid = child.id();
        let stdin = child.stdin.take();

        let (line_tx, line_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();
        let stdout_buf = Arc::new(StdMutex::new(String::new()));
        let stderr_buf = Arc::new(StdMutex::new(String::new()));

        tokio::spawn(supervise(child, line_tx, exit_tx, stdout_buf.clone(), stderr_buf.clone()));

        Ok(Box::new(LocalCommandHandle {
            pid,
            stdin: Mutex::new(stdin),
            line_rx: Mutex::new(line_rx),
            exit_rx: Mutex::new(Some(exit_rx)),
            stdout_buf,
            stderr_buf,
            timeout_ms: opts.timeout_ms,
        }))
    }

    async fn kill_process(&self, pid: u32) -> RuntimeResult<bool> {
        Ok(kill_pid(pid))
    }

    async fn read_file(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        tokio::fs::read(self.resolve(path)).await.map_err(|e| RuntimeError::from(e))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> RuntimeResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(RuntimeError::from)?;
        }
        tokio::fs::write(full, data).await.map_err(RuntimeError::from)
    }

    async fn write_files(&self, files: &[(String, Vec<u8>)]) -> RuntimeResult<()> {
        for (path, data) in files {
            self.write_file(path, data).await?;
        }
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> RuntimeResult<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await.map_err(RuntimeError::from)
    }

    async fn get_host(&self, _port: u16) -> RuntimeResult<Option<String>> {
        Ok(None)
    }

    async fn pause(&self) -> RuntimeResult<bool> {
        Ok(false)
    }

    async fn kill(&self) -> RuntimeResult<()> {
        let _ = tokio::fs::remove_dir_all(&self.root).await;
        Ok(())
    }
}

async fn supervise(
    mut child: Child,
    line_tx: mpsc::Sender<OutputLine>,
    exit_tx: oneshot::Sender<i32>,
    stdout_buf: Arc<StdMutex<String>>,
    stderr_buf: Arc<StdMutex<String>>,
) {
    let Some(stdout) = child.stdout.take() else { return };
    let Some(stderr) = child.stderr.take() else { return };

    let stderr_tx = line_tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            stderr_buf.lock().unwrap().push_str(&line);
            stderr_buf.lock().unwrap().push('\n');
            if stderr_tx.send(OutputLine::Stderr(line)).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        stdout_buf.lock().unwrap().push_str(&line);
        stdout_buf.lock().unwrap().push('\n');
        if line_tx.send(OutputLine::Stdout(line)).await.is_err() {
            break;
        }
    }
    let _ = stderr_task.await;

    let code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    };
    let _ = exit_tx.send(code);
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL).is_ok()
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) -> bool {
    false
}

struct LocalCommandHandle {
    pid: Option<u32>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    line_rx: Mutex<mpsc::Receiver<OutputLine>>,
    exit_rx: Mutex<Option<oneshot::Receiver<i32>>>,
    stdout_buf: Arc<StdMutex<String>>,
    stderr_buf: Arc<StdMutex<String>>,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl CommandHandle for LocalCommandHandle {
    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    async fn write_stdin(&self, data: &[u8]) -> RuntimeResult<()> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => stdin.write_all(data).await.map_err(RuntimeError::from),
            None => Err(RuntimeError::Execution("stdin already closed".to_string())),
        }
    }

    async fn next_line(&self) -> Option<OutputLine> {
        self.line_rx.lock().await.recv().await
    }

    async fn kill(&self) -> RuntimeResult<bool> {
        match self.pid {
            Some(pid) => Ok(kill_pid(pid)),
            None => Ok(false),
        }
    }

    async fn wait(&self) -> RuntimeResult<WaitResult> {
        let rx = self.exit_rx.lock().await.take();
        let Some(rx) = rx else {
            return Err(RuntimeError::Execution("wait already consumed".to_string()));
        };
        let exit_code = match self.timeout_ms {
            Some(ms) => tokio::time::timeout(std::time::Duration::from_millis(ms), rx)
                .await
                .map_err(|_| RuntimeError::Timeout { timeout_ms: ms })?
                .unwrap_or(-1),
            None => rx.await.unwrap_or(-1),
        };
        Ok(WaitResult {
            exit_code,
            stdout: self.stdout_buf.lock().unwrap().clone(),
            stderr: self.stderr_buf.lock().unwrap().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_echo_and_collects_output() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProcessSandboxProvider::new(dir.path());
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        let handle = sandbox
            .spawn(&["echo".to_string(), "hello".to_string()], SpawnOptions::default())
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = handle.next_line().await {
            lines.push(line);
        }
        let result = handle.wait().await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(lines.iter().any(|l| matches!(l, OutputLine::Stdout(s) if s == "hello")));
    }

    #[tokio::test]
    async fn write_and_read_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProcessSandboxProvider::new(dir.path());
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        sandbox.write_file("output/note.txt", b"hi there").await.unwrap();
        let data = sandbox.read_file("output/note.txt").await.unwrap();
        assert_eq!(data, b"hi there");
    }

    #[tokio::test]
    async fn connect_reuses_existing_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProcessSandboxProvider::new(dir.path());
        let sandbox = provider.create(CreateOptions::default()).await.unwrap();
        let id = sandbox.sandbox_id();
        sandbox.write_file("marker.txt", b"x").await.unwrap();

        let reconnected = provider.connect(&id).await.unwrap();
        let data = reconnected.read_file("marker.txt").await.unwrap();
        assert_eq!(data, b"x");
    }
}
