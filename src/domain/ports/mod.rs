//! Domain ports: the interfaces infrastructure adapters implement.

pub mod logger;
pub mod sandbox_provider;
pub mod storage_client;

pub use logger::{Level, Logger};
pub use sandbox_provider::{
    CommandHandle, CreateOptions, OutputLine, ProviderCapabilities, SandboxInstance,
    SandboxProvider, SpawnOptions, WaitResult,
};
pub use storage_client::{ListCheckpointsFilter, StorageClient};
