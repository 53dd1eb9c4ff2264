//! Outcome types for swarm operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Raw bytes keyed by path relative to the collection root (`output/` for
/// workers, the working directory for context uploads).
pub type FileMap = HashMap<String, Vec<u8>>;

/// Which side of a `filter` predicate an item landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Success,
    Filtered,
    Error,
}

/// Which role a session played within a swarm/pipeline run, attached to every
/// item's observability metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Worker,
    Candidate,
    Judge,
    Verifier,
}

/// Observability metadata threaded through swarm and pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexedMeta {
    pub operation_id: String,
    pub operation_name: String,
    pub item_index: usize,
    pub error_retry: u32,
    pub verify_retry: u32,
    pub candidate_index: Option<usize>,
    pub pipeline_run_id: Option<String>,
    pub pipeline_step_index: Option<usize>,
    pub swarm_tag: Option<String>,
    pub session_tag: Option<String>,
    pub role: Option<SessionRole>,
}

/// Outcome of the verify feedback loop for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyInfo {
    pub attempts: u32,
    pub passed: bool,
    pub reasoning: Option<String>,
}

/// Outcome of the bestOf candidate+judge loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestOfInfo {
    pub candidate_count: usize,
    pub winner_index: usize,
    pub judge_reasoning: Option<String>,
    /// True if the judge itself failed and the engine defaulted the winner.
    pub judge_defaulted: bool,
}

/// Outcome of one worker item run by `map`, `filter`, or a `bestOf` candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmResult<T> {
    pub status: SwarmStatus,
    pub data: Option<T>,
    #[serde(skip)]
    pub files: FileMap,
    pub meta: IndexedMeta,
    pub error: Option<String>,
    pub raw_data: Option<String>,
    pub best_of: Option<BestOfInfo>,
    pub verify: Option<VerifyInfo>,
}

impl<T> SwarmResult<T> {
    pub fn success(data: T, meta: IndexedMeta, files: FileMap) -> Self {
        Self {
            status: SwarmStatus::Success,
            data: Some(data),
            files,
            meta,
            error: None,
            raw_data: None,
            best_of: None,
            verify: None,
        }
    }

    pub fn filtered(meta: IndexedMeta, files: FileMap) -> Self {
        Self {
            status: SwarmStatus::Filtered,
            data: None,
            files,
            meta,
            error: None,
            raw_data: None,
            best_of: None,
            verify: None,
        }
    }

    pub fn error(error: impl Into<String>, meta: IndexedMeta, raw_data: Option<String>) -> Self {
        Self {
            status: SwarmStatus::Error,
            data: None,
            files: FileMap::new(),
            meta,
            error: Some(error.into()),
            raw_data,
            best_of: None,
            verify: None,
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, SwarmStatus::Error)
    }
}

/// Outcome of a `reduce` operation: a single result over all input items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceResult<T> {
    pub status: SwarmStatus,
    pub data: Option<T>,
    #[serde(skip)]
    pub files: FileMap,
    pub meta: IndexedMeta,
    pub error: Option<String>,
    pub raw_data: Option<String>,
    pub verify: Option<VerifyInfo>,
}

impl<T> ReduceResult<T> {
    pub fn success(data: T, meta: IndexedMeta, files: FileMap) -> Self {
        Self {
            status: SwarmStatus::Success,
            data: Some(data),
            files,
            meta,
            error: None,
            raw_data: None,
            verify: None,
        }
    }

    pub fn error(error: impl Into<String>, meta: IndexedMeta, raw_data: Option<String>) -> Self {
        Self {
            status: SwarmStatus::Error,
            data: None,
            files: FileMap::new(),
            meta,
            error: Some(error.into()),
            raw_data,
            verify: None,
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, SwarmStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_partition_invariant() {
        let results: Vec<SwarmResult<()>> = vec![
            SwarmResult::success((), IndexedMeta::default(), FileMap::new()),
            SwarmResult::filtered(IndexedMeta::default(), FileMap::new()),
            SwarmResult::error("boom", IndexedMeta::default(), None),
        ];
        let success = results.iter().filter(|r| r.status == SwarmStatus::Success).count();
        let filtered = results.iter().filter(|r| r.status == SwarmStatus::Filtered).count();
        let error = results.iter().filter(|r| r.status == SwarmStatus::Error).count();
        assert_eq!(success + filtered + error, results.len());
    }
}
