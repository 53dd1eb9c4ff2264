//! `StorageClient` port — the narrow contract checkpoints are read/written
//! through. Object stores themselves are out of scope; this crate ships a
//! filesystem-backed reference adapter plus an in-memory one for tests.

use async_trait::async_trait;

use crate::domain::errors::RuntimeResult;
use crate::domain::models::{CheckpointInfo, FileMap};

/// Optional filter for `list_checkpoints`.
#[derive(Debug, Clone, Default)]
pub struct ListCheckpointsFilter {
    pub limit: Option<usize>,
    pub tag: Option<String>,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Newest-first, optionally scoped to a session tag.
    async fn list_checkpoints(&self, filter: ListCheckpointsFilter) -> RuntimeResult<Vec<CheckpointInfo>>;

    async fn get_checkpoint(&self, id: &str) -> RuntimeResult<CheckpointInfo>;

    /// Download and extract a checkpoint's archive to `to`.
    async fn download_checkpoint(&self, id: &str, to: &str) -> RuntimeResult<()>;

    /// Download a subset of files from a checkpoint without extracting the
    /// whole archive. `id` may be `"latest"`.
    async fn download_files(&self, id: &str, paths: &[String]) -> RuntimeResult<FileMap>;

    /// Upload an archive blob keyed by its content hash. A no-op if the hash
    /// already exists in storage (content-addressed dedup).
    async fn put_archive(&self, hash: &str, bytes: &[u8]) -> RuntimeResult<()>;

    async fn put_metadata(&self, record: CheckpointInfo) -> RuntimeResult<()>;
}
