//! Filesystem-backed `StorageClient`: archives on disk, metadata in SQLite.
//!
//! Archives are gzipped tars keyed by content hash under `archive_root/`;
//! reusing a hash that already exists on disk is a no-op (content-addressed
//! dedup). Metadata lives in the `checkpoints` table behind `DatabaseConnection`.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::domain::errors::{RuntimeError, RuntimeResult, StorageError};
use crate::domain::models::{AgentKind, CheckpointInfo, FileMap, WorkspaceMode};
use crate::domain::ports::{ListCheckpointsFilter, StorageClient};
use crate::infrastructure::database::DatabaseConnection;

type CheckpointRow = (String, String, String, String, i64, String, Option<String>, String, Option<String>, Option<String>);

pub struct FilesystemStorageClient {
    archive_root: PathBuf,
    db: DatabaseConnection,
}

impl FilesystemStorageClient {
    pub fn new(archive_root: impl Into<PathBuf>, db: DatabaseConnection) -> Self {
        Self { archive_root: archive_root.into(), db }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        self.db.migrate().await
    }

    fn archive_path(&self, hash: &str) -> PathBuf {
        self.archive_root.join(format!("{hash}.tar.gz"))
    }

    fn row_to_checkpoint(row: CheckpointRow) -> Result<CheckpointInfo, StorageError> {
        let (id, hash, tag, timestamp, size_bytes, agent_type, model, workspace_mode, comment, parent_id) = row;
        Ok(CheckpointInfo {
            id: Uuid::parse_str(&id)?,
            hash,
            tag,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
            size_bytes: size_bytes as u64,
            agent_type: AgentKind::from_str(&agent_type)
                .ok_or_else(|| StorageError::MigrationError(format!("unknown agent_type in database: {agent_type}")))?,
            model,
            workspace_mode: WorkspaceMode::from_str(&workspace_mode)
                .ok_or_else(|| StorageError::MigrationError(format!("unknown workspace_mode in database: {workspace_mode}")))?,
            comment,
            parent_id: parent_id.map(|s| Uuid::parse_str(&s)).transpose()?,
        })
    }
}

#[async_trait::async_trait]
impl StorageClient for FilesystemStorageClient {
    async fn list_checkpoints(&self, filter: ListCheckpointsFilter) -> RuntimeResult<Vec<CheckpointInfo>> {
        let limit = filter.limit.unwrap_or(1000) as i64;
        let rows: Vec<CheckpointRow> = if let Some(tag) = filter.tag {
            sqlx::query_as(
                "SELECT id, hash, tag, timestamp, size_bytes, agent_type, model, workspace_mode, comment, parent_id \
                 FROM checkpoints WHERE tag = ? ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(tag)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await
            .map_err(StorageError::QueryFailed)?
        } else {
            sqlx::query_as(
                "SELECT id, hash, tag, timestamp, size_bytes, agent_type, model, workspace_mode, comment, parent_id \
                 FROM checkpoints ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.db.pool())
            .await
            .map_err(StorageError::QueryFailed)?
        };

        rows.into_iter().map(Self::row_to_checkpoint).collect::<Result<Vec<_>, _>>().map_err(RuntimeError::from)
    }

    async fn get_checkpoint(&self, id: &str) -> RuntimeResult<CheckpointInfo> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT id, hash, tag, timestamp, size_bytes, agent_type, model, workspace_mode, comment, parent_id \
             FROM checkpoints WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(StorageError::QueryFailed)?;

        match row {
            Some(row) => Self::row_to_checkpoint(row).map_err(RuntimeError::from),
            None => Err(RuntimeError::NotFound { resource: "checkpoint", id: id.to_string() }),
        }
    }

    async fn download_checkpoint(&self, id: &str, to: &str) -> RuntimeResult<()> {
        let info = self.get_checkpoint(id).await?;
        let bytes = tokio::fs::read(self.archive_path(&info.hash)).await.map_err(RuntimeError::Io)?;
        extract_archive(&bytes, Path::new(to)).map_err(RuntimeError::Io)
    }

    async fn download_files(&self, id: &str, paths: &[String]) -> RuntimeResult<FileMap> {
        let info = if id == "latest" {
            let mut all = self.list_checkpoints(ListCheckpointsFilter { limit: Some(1), tag: None }).await?;
            all.pop().ok_or_else(|| RuntimeError::NotFound { resource: "checkpoint", id: "latest".to_string() })?
        } else {
            self.get_checkpoint(id).await?
        };

        let bytes = tokio::fs::read(self.archive_path(&info.hash)).await.map_err(RuntimeError::Io)?;
        extract_files(&bytes, paths).map_err(RuntimeError::Io)
    }

    async fn put_archive(&self, hash: &str, bytes: &[u8]) -> RuntimeResult<()> {
        let path = self.archive_path(hash);
        if tokio::fs::try_exists(&path).await.map_err(RuntimeError::Io)? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(RuntimeError::Io)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(RuntimeError::Io)
    }

    async fn put_metadata(&self, record: CheckpointInfo) -> RuntimeResult<()> {
        sqlx::query(
            "INSERT INTO checkpoints (id, hash, tag, timestamp, size_bytes, agent_type, model, workspace_mode, comment, parent_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.hash)
        .bind(record.tag)
        .bind(record.timestamp.to_rfc3339())
        .bind(record.size_bytes as i64)
        .bind(record.agent_type.as_str())
        .bind(record.model)
        .bind(record.workspace_mode.as_str())
        .bind(record.comment)
        .bind(record.parent_id.map(|id| id.to_string()))
        .execute(self.db.pool())
        .await
        .map_err(StorageError::QueryFailed)
        .map_err(RuntimeError::from)?;
        Ok(())
    }
}

/// Builds a gzipped tar from a set of (archive-relative path, bytes) entries.
pub fn build_archive(entries: &[(String, Vec<u8>)]) -> std::io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, &bytes[..])?;
    }
    builder.into_inner()?.finish()
}

pub(crate) fn extract_archive(archive_bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    let decoder = GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)
}

pub(crate) fn extract_files(archive_bytes: &[u8], paths: &[String]) -> std::io::Result<FileMap> {
    let decoder = GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut out = FileMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if paths.is_empty() || paths.iter().any(|p| p == &path) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            out.insert(path, bytes);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionTag;

    async fn make_client() -> (FilesystemStorageClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConnection::new("sqlite::memory:", 5).await.unwrap();
        let client = FilesystemStorageClient::new(dir.path().join("archives"), db);
        client.migrate().await.unwrap();
        (client, dir)
    }

    fn sample_checkpoint(hash: &str, tag: &str) -> CheckpointInfo {
        CheckpointInfo {
            id: Uuid::new_v4(),
            hash: hash.to_string(),
            tag: tag.to_string(),
            timestamp: Utc::now(),
            size_bytes: 10,
            agent_type: AgentKind::Claude,
            model: None,
            workspace_mode: WorkspaceMode::Knowledge,
            comment: None,
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn put_and_get_checkpoint_round_trips() {
        let (client, _dir) = make_client().await;
        let info = sample_checkpoint("a".repeat(64).as_str(), "sess_abc");
        client.put_archive(&info.hash, b"archive bytes").await.unwrap();
        client.put_metadata(info.clone()).await.unwrap();

        let fetched = client.get_checkpoint(&info.id.to_string()).await.unwrap();
        assert_eq!(fetched.hash, info.hash);
        assert_eq!(fetched.tag, info.tag);
    }

    #[tokio::test]
    async fn list_checkpoints_orders_newest_first_and_filters_by_tag() {
        let (client, _dir) = make_client().await;
        let tag = SessionTag::new();
        let older = sample_checkpoint(&"b".repeat(64), tag.as_str());
        client.put_archive(&older.hash, b"one").await.unwrap();
        client.put_metadata(older.clone()).await.unwrap();

        let mut newer = sample_checkpoint(&"c".repeat(64), tag.as_str());
        newer.timestamp = older.timestamp + chrono::Duration::seconds(10);
        client.put_archive(&newer.hash, b"two").await.unwrap();
        client.put_metadata(newer.clone()).await.unwrap();

        let list = client.list_checkpoints(ListCheckpointsFilter { limit: None, tag: Some(tag.as_str().to_string()) }).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, newer.id);
    }

    #[tokio::test]
    async fn get_missing_checkpoint_errors_not_found() {
        let (client, _dir) = make_client().await;
        let result = client.get_checkpoint(&Uuid::new_v4().to_string()).await;
        assert!(matches!(result, Err(RuntimeError::NotFound { resource: "checkpoint", .. })));
    }

    #[tokio::test]
    async fn archive_round_trips_through_tar_gzip() {
        let (client, dir) = make_client().await;
        let entries = vec![("result.txt".to_string(), b"hello".to_vec())];
        let archive = build_archive(&entries).unwrap();
        let hash = "d".repeat(64);
        client.put_archive(&hash, &archive).await.unwrap();

        let info = sample_checkpoint(&hash, "sess_xyz");
        client.put_metadata(info.clone()).await.unwrap();

        let dest = dir.path().join("restored");
        client.download_checkpoint(&info.id.to_string(), dest.to_str().unwrap()).await.unwrap();
        let restored = tokio::fs::read_to_string(dest.join("result.txt")).await.unwrap();
        assert_eq!(restored, "hello");
    }

    #[tokio::test]
    async fn download_files_extracts_subset_without_full_restore() {
        let (client, _dir) = make_client().await;
        let entries = vec![
            ("result.txt".to_string(), b"keep me".to_vec()),
            ("ignored.txt".to_string(), b"skip me".to_vec()),
        ];
        let archive = build_archive(&entries).unwrap();
        let hash = "e".repeat(64);
        client.put_archive(&hash, &archive).await.unwrap();
        let info = sample_checkpoint(&hash, "sess_subset");
        client.put_metadata(info.clone()).await.unwrap();

        let files = client.download_files(&info.id.to_string(), &["result.txt".to_string()]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("result.txt").unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn putting_archive_twice_is_a_noop_dedup() {
        let (client, _dir) = make_client().await;
        let hash = "f".repeat(64);
        client.put_archive(&hash, b"first write").await.unwrap();
        client.put_archive(&hash, b"second write should be ignored").await.unwrap();
        let bytes = tokio::fs::read(client.archive_path(&hash)).await.unwrap();
        assert_eq!(bytes, b"first write");
    }
}
