//! Fans one command's stdout/stderr lines out to every interested listener:
//! the session's own `"content"`/`"raw"` channels and the observability
//! logger. Adapted from the SSE buffer-until-boundary-then-flush pattern used
//! for HTTP streaming, but the boundary here is a newline the sandbox
//! provider has already split on, so there is no partial-frame buffering left
//! to do at this layer — only fan-out and parsing.

use tokio::sync::broadcast;

use crate::domain::models::ParserId;
use crate::domain::ports::sandbox_provider::{CommandHandle, OutputLine};

use super::parser::{parse_line, ContentEvent};

/// One multiplexed item delivered to subscribers.
#[derive(Debug, Clone)]
pub enum MultiplexedEvent {
    Content(ContentEvent),
    RawLine { line: String, is_stderr: bool },
}

/// Drains a command's stdout/stderr through a parser, broadcasting every
/// event to all subscribers until the process closes both streams.
///
/// Capacity bounds how far a slow subscriber may lag before it starts
/// missing events; `RecvError::Lagged` is the subscriber's signal that it
/// fell behind, not this multiplexer's.
pub struct StreamMultiplexer {
    parser: ParserId,
    sender: broadcast::Sender<MultiplexedEvent>,
}

impl StreamMultiplexer {
    pub fn new(parser: ParserId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { parser, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MultiplexedEvent> {
        self.sender.subscribe()
    }

    /// Pump lines from `handle` until it closes. Returns the number of lines
    /// processed. Send failures (no subscribers left) are not errors; the
    /// pump keeps draining so the process isn't left blocked on a full pipe.
    pub async fn pump(&self, handle: &dyn CommandHandle) -> u64 {
        let mut count = 0u64;
        while let Some(line) = handle.next_line().await {
            count += 1;
            let (text, is_stderr) = match &line {
                OutputLine::Stdout(s) => (s.as_str(), false),
                OutputLine::Stderr(s) => (s.as_str(), true),
            };
            let _ = self.sender.send(MultiplexedEvent::RawLine {
                line: text.to_string(),
                is_stderr,
            });
            if !is_stderr {
                for event in parse_line(self.parser, text) {
                    let _ = self.sender.send(MultiplexedEvent::Content(event));
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::RuntimeResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedHandle {
        lines: Mutex<Vec<OutputLine>>,
        cursor: AtomicUsize,
    }

    #[async_trait]
    impl CommandHandle for ScriptedHandle {
        fn process_id(&self) -> Option<u32> {
            Some(1)
        }

        async fn write_stdin(&self, _data: &[u8]) -> RuntimeResult<()> {
            Ok(())
        }

        async fn next_line(&self) -> Option<OutputLine> {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.lines.lock().unwrap().get(idx).cloned()
        }

        async fn kill(&self) -> RuntimeResult<bool> {
            Ok(true)
        }

        async fn wait(&self) -> RuntimeResult<crate::domain::ports::sandbox_provider::WaitResult> {
            Ok(crate::domain::ports::sandbox_provider::WaitResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn pumps_all_lines_and_parses_content() {
        let handle = ScriptedHandle {
            lines: Mutex::new(vec![
                OutputLine::Stdout(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#.to_string()),
                OutputLine::Stderr("warning: something".to_string()),
            ]),
            cursor: AtomicUsize::new(0),
        };
        let mux = StreamMultiplexer::new(ParserId::ClaudeStreamJson, 16);
        let mut rx = mux.subscribe();
        let count = mux.pump(&handle).await;
        assert_eq!(count, 2);

        let mut saw_content = false;
        let mut saw_stderr = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                MultiplexedEvent::Content(ContentEvent::AssistantText { content }) => {
                    assert_eq!(content, "hi");
                    saw_content = true;
                }
                MultiplexedEvent::RawLine { is_stderr: true, .. } => saw_stderr = true,
                _ => {}
            }
        }
        assert!(saw_content);
        assert!(saw_stderr);
    }
}
