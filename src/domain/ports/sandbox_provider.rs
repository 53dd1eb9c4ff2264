//! `SandboxProvider` port — the boundary between the session engine and
//! whatever actually creates containers, runs commands, and reads/writes
//! files. Production sandbox providers (cloud container services) are out of
//! scope for this crate; it ships two in-tree adapters
//! (`adapters::sandbox::local_process`, `adapters::sandbox::mock`) purely so
//! the engine above this port is exercisable and testable.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::errors::RuntimeResult;

/// Arguments for spawning one command inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<String>,
    pub timeout_ms: Option<u64>,
    pub envs: HashMap<String, String>,
}

/// The terminal result of waiting on a spawned command.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A line of output from a running command, tagged by stream.
#[derive(Debug, Clone)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// A handle to one spawned command.
#[async_trait]
pub trait CommandHandle: Send + Sync {
    fn process_id(&self) -> Option<u32>;

    /// Write bytes to the process's stdin.
    async fn write_stdin(&self, data: &[u8]) -> RuntimeResult<()>;

    /// Receive the next line of output, or `None` once the process has
    /// closed both streams. Implementations buffer partial lines internally
    /// and must flush any trailing unterminated line when the stream ends.
    async fn next_line(&self) -> Option<OutputLine>;

    /// Request termination of the process. Returns whether the provider
    /// reports the kill as effective; providers without kill support return
    /// `Ok(false)` rather than erroring.
    async fn kill(&self) -> RuntimeResult<bool>;

    /// Block until the process exits (or the handle's configured timeout
    /// elapses, surfaced as `RuntimeError::Timeout`).
    async fn wait(&self) -> RuntimeResult<WaitResult>;
}

/// One live sandbox: a running container/VM/process group plus the file and
/// command primitives the session engine needs.
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    fn sandbox_id(&self) -> String;

    async fn spawn(&self, command: &[String], opts: SpawnOptions) -> RuntimeResult<Box<dyn CommandHandle>>;

    /// Best-effort kill of a process by id, for out-of-band termination
    /// (e.g. killing a background run's pid after the handle was dropped).
    async fn kill_process(&self, pid: u32) -> RuntimeResult<bool>;

    async fn read_file(&self, path: &str) -> RuntimeResult<Vec<u8>>;
    async fn write_file(&self, path: &str, data: &[u8]) -> RuntimeResult<()>;
    async fn write_files(&self, files: &[(String, Vec<u8>)]) -> RuntimeResult<()>;
    async fn make_dir(&self, path: &str) -> RuntimeResult<()>;

    /// Resolve an externally reachable host:port for a port exposed inside
    /// the sandbox. Not all providers support this.
    async fn get_host(&self, port: u16) -> RuntimeResult<Option<String>>;

    /// Suspend the sandbox without destroying it, if the provider supports it.
    async fn pause(&self) -> RuntimeResult<bool>;

    /// Destroy the sandbox. Always safe to call more than once.
    async fn kill(&self) -> RuntimeResult<()>;
}

/// Arguments for creating a fresh sandbox.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub envs: HashMap<String, String>,
    pub working_directory: Option<String>,
}

/// Capability flags a provider reports so the session engine can degrade
/// gracefully (e.g. treat an unsupported pause as a no-op rather than erroring).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub supports_pause: bool,
    pub supports_interrupt: bool,
}

/// Creates and reconnects to sandboxes. This is the single seam through
/// which every real container/VM backend plugs into the runtime.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn capabilities(&self) -> ProviderCapabilities;

    async fn create(&self, opts: CreateOptions) -> RuntimeResult<Box<dyn SandboxInstance>>;

    async fn connect(&self, sandbox_id: &str) -> RuntimeResult<Box<dyn SandboxInstance>>;
}
