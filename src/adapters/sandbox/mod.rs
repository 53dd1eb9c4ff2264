//! `SandboxProvider` adapters: a real local-process implementation and an
//! in-memory scripted double for tests.

pub mod local_process;
pub mod mock;

pub use local_process::LocalProcessSandboxProvider;
pub use mock::MockSandboxProvider;
