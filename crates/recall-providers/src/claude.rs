use crate::error::{Error, Result};
use crate::traits::{ChatMessage, ChatProvider, ChatReply, Role, Spawner};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Marker argument present on every extractor child's command line. The
/// supervisor's orphan scan keys on it.
pub const OBSERVER_CMD_MARKER: &str = "--output-format=stream-json";

/// Drives the vendor CLI's streaming session API.
///
/// The CLI holds the conversation server-side: the first call ships the
/// system prompt and opening turn, later calls resume by session id and only
/// ship the newest user turn. One child process per call; every spawn is
/// reported to the `Spawner` before any output is read.
pub struct ClaudeCliProvider {
    binary: PathBuf,
    model: Option<String>,
    spawner: Arc<dyn Spawner>,
    session: Mutex<Option<String>>,
    call_timeout: Duration,
}

impl ClaudeCliProvider {
    pub fn new(binary: PathBuf, model: Option<String>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            binary,
            model,
            spawner,
            session: Mutex::new(None),
            call_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Seed the CLI session to resume, e.g. after a worker restart when the
    /// store already holds the extractor's session id.
    pub fn with_session(self, session_id: Option<String>) -> Self {
        *self.session.lock().unwrap() = session_id;
        self
    }

    fn build_args(&self, messages: &[ChatMessage], resume: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            OBSERVER_CMD_MARKER.to_string(),
            "--verbose".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        match resume {
            Some(session_id) => {
                args.push("--resume".to_string());
                args.push(session_id.to_string());
            }
            None => {
                if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
                    args.push("--append-system-prompt".to_string());
                    args.push(system.content.clone());
                }
            }
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        args.push(prompt);
        args
    }
}

#[async_trait]
impl ChatProvider for ClaudeCliProvider {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        let resume = self.session.lock().unwrap().clone();
        let args = self.build_args(messages, resume.as_deref());

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::Spawn(format!("{}: {}", self.binary.display(), err)))?;

        if let Some(pid) = child.id() {
            self.spawner.spawned(pid);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("child stdout unavailable".to_string()))?;

        let read_stream = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut session_id: Option<String> = None;
            let mut result_text: Option<String> = None;
            let mut assistant_text = String::new();

            while let Some(line) = lines.next_line().await? {
                let Ok(event) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if let Some(id) = event.get("session_id").and_then(Value::as_str) {
                    session_id = Some(id.to_string());
                }
                match event.get("type").and_then(Value::as_str) {
                    Some("result") => {
                        if let Some(text) = event.get("result").and_then(Value::as_str) {
                            result_text = Some(text.to_string());
                        }
                    }
                    Some("assistant") => {
                        // fallback when the stream ends without a result event
                        if let Some(blocks) =
                            event.pointer("/message/content").and_then(Value::as_array)
                        {
                            for block in blocks {
                                if let Some(text) = block.get("text").and_then(Value::as_str) {
                                    assistant_text.push_str(text);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok::<_, Error>((session_id, result_text, assistant_text))
        };

        let (session_id, result_text, assistant_text) =
            match tokio::time::timeout(self.call_timeout, read_stream).await {
                Ok(parsed) => parsed?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(Error::Timeout(format!(
                        "no result from {} within {:?}",
                        self.binary.display(),
                        self.call_timeout
                    )));
                }
            };

        let status = child.wait().await?;
        let text = match result_text {
            Some(text) => text,
            None if !assistant_text.is_empty() => assistant_text,
            None => {
                return Err(Error::InvalidResponse(format!(
                    "stream ended without a result event (exit: {})",
                    status
                )));
            }
        };

        if let Some(id) = &session_id {
            let mut slot = self.session.lock().unwrap();
            if slot.as_deref() != Some(id) {
                debug!("claude session established: {}", id);
                *slot = Some(id.clone());
            }
        } else if resume.is_none() {
            warn!("claude CLI did not echo a session id; caller will synthesize one");
        }

        Ok(ChatReply {
            text,
            provider_session_id: session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NullSpawner;

    #[test]
    fn test_first_call_ships_system_prompt_and_marker() {
        let provider = ClaudeCliProvider::new(
            PathBuf::from("claude"),
            Some("claude-sonnet".to_string()),
            Arc::new(NullSpawner),
        );
        let messages = vec![
            ChatMessage::system("you extract observations"),
            ChatMessage::user("first tool event"),
        ];

        let args = provider.build_args(&messages, None);
        assert!(args.contains(&OBSERVER_CMD_MARKER.to_string()));
        assert!(args.contains(&"--append-system-prompt".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
        assert_eq!(args.last().unwrap(), "first tool event");
    }

    #[test]
    fn test_resumed_call_ships_only_newest_turn() {
        let provider =
            ClaudeCliProvider::new(PathBuf::from("claude"), None, Arc::new(NullSpawner));
        let messages = vec![
            ChatMessage::system("you extract observations"),
            ChatMessage::user("old turn"),
            ChatMessage::assistant("<observation/>"),
            ChatMessage::user("new turn"),
        ];

        let args = provider.build_args(&messages, Some("sess-1"));
        assert!(args.contains(&"--resume".to_string()));
        assert!(!args.contains(&"--append-system-prompt".to_string()));
        assert_eq!(args.last().unwrap(), "new turn");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient_spawn_error() {
        let provider = ClaudeCliProvider::new(
            PathBuf::from("/nonexistent/claude-binary"),
            None,
            Arc::new(NullSpawner),
        );
        let err = provider
            .send(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parses_stream_json_from_stub_binary() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("claude-stub.sh");
        {
            let mut file = std::fs::File::create(&script).unwrap();
            writeln!(file, "#!/bin/sh").unwrap();
            writeln!(
                file,
                r#"echo '{{"type":"system","subtype":"init","session_id":"sess-stub"}}'"#
            )
            .unwrap();
            writeln!(
                file,
                r#"echo '{{"type":"result","result":"<observation><title>t</title></observation>","session_id":"sess-stub"}}'"#
            )
            .unwrap();
        }
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let provider = ClaudeCliProvider::new(script, None, Arc::new(NullSpawner));
        let reply = provider
            .send(&[ChatMessage::user("extract this")])
            .await
            .unwrap();

        assert_eq!(reply.provider_session_id.as_deref(), Some("sess-stub"));
        assert!(reply.text.contains("<observation>"));
    }
}
