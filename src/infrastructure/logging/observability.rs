//! Per-session NDJSON logging, distinct from the process-wide `tracing`
//! subscriber in `logger.rs`: one append-only file per sandbox lifetime,
//! scrubbed through the same `SecretScrubber` patterns.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use crate::domain::errors::{RuntimeError, RuntimeResult};

use super::secret_scrubbing::SecretScrubber;

/// Opens one NDJSON log file per session under `<root>/sessions/`.
pub struct ObservabilityLogger {
    root: PathBuf,
    scrubber: SecretScrubber,
}

impl ObservabilityLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), scrubber: SecretScrubber::new() }
    }

    /// Opens `<root>/sessions/<tag>_<provider>_<sandboxId>_<agent>_<isoTs>.jsonl`
    /// and writes the `_meta` header line. `:` and `.` in the timestamp are
    /// replaced with `-` so the filename is filesystem-safe everywhere.
    pub fn open_session(&self, tag: &str, provider: &str, sandbox_id: &str, agent: &str) -> RuntimeResult<SessionLog> {
        let sessions_dir = self.root.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;

        let iso_ts = Utc::now().to_rfc3339();
        let safe_ts: String = iso_ts.chars().map(|c| if c == ':' || c == '.' { '-' } else { c }).collect();
        let filename = format!("{tag}_{provider}_{sandbox_id}_{agent}_{safe_ts}.jsonl");
        let path = sessions_dir.join(filename);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let log = SessionLog { file: Mutex::new(file), scrubber: self.scrubber.clone(), path };
        log.write_value(&serde_json::json!({
            "_meta": {
                "tag": tag,
                "provider": provider,
                "sandboxId": sandbox_id,
                "agent": agent,
                "startedAt": iso_ts,
            }
        }))?;
        Ok(log)
    }
}

/// One open NDJSON file. `write_prompt` records the text handed to `run`;
/// `write_raw_line` records one line of agent-emitted stdout, as JSON if it
/// parses as JSON and as a `_raw` wrapper otherwise.
pub struct SessionLog {
    file: Mutex<std::fs::File>,
    scrubber: SecretScrubber,
    path: PathBuf,
}

impl SessionLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_prompt(&self, text: &str) -> RuntimeResult<()> {
        self.write_value(&serde_json::json!({"_prompt": {"text": text}}))
    }

    pub fn write_raw_line(&self, line: &str) -> RuntimeResult<()> {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => self.write_value(&value),
            Err(_) => self.write_value(&serde_json::json!({"_raw": line})),
        }
    }

    fn write_value(&self, value: &Value) -> RuntimeResult<()> {
        let serialized = serde_json::to_string(value).map_err(|err| RuntimeError::Execution(err.to_string()))?;
        let mut scrubbed = self.scrubber.scrub(&serialized);
        scrubbed.push('\n');
        let mut file = self.file.lock().expect("session log file lock poisoned");
        file.write_all(scrubbed.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_log_filename_has_no_colons_or_dots_in_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ObservabilityLogger::new(dir.path());
        let log = logger.open_session("swarm_score_ab12", "modal", "sbx_1", "claude").unwrap();
        let name = log.path().file_name().unwrap().to_str().unwrap();
        assert!(!name.contains(':'));
        let stem = name.trim_end_matches(".jsonl");
        assert!(!stem.contains('.'));
    }

    #[test]
    fn first_line_is_meta_and_prompts_append_as_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ObservabilityLogger::new(dir.path());
        let log = logger.open_session("sess_1", "modal", "sbx_1", "claude").unwrap();
        log.write_prompt("do the thing").unwrap();
        log.write_raw_line(r#"{"type":"assistant","text":"ok"}"#).unwrap();
        log.write_raw_line("not json").unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("_meta"));
        assert!(lines[1].contains("_prompt"));
        assert!(lines[2].contains("\"type\":\"assistant\""));
        assert!(lines[3].contains("_raw"));
    }

    #[test]
    fn scrubs_secrets_embedded_in_agent_output() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ObservabilityLogger::new(dir.path());
        let log = logger.open_session("sess_1", "modal", "sbx_1", "claude").unwrap();
        log.write_raw_line(r#"{"note":"Bearer abc.def.ghi123456789012345"}"#).unwrap();
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(!contents.contains("abc.def.ghi123456789012345"));
    }
}
