use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::auth::is_rate_limit_message;
use crate::sdk::{
    ModelSdk, ModelTurnStream, SdkError, TranscriptEntry, TranscriptRole, TurnEvent, TurnRequest,
};

const UNKNOWN_SESSION_MARKER: &str = "No conversation found";

/// Configuration for the model CLI the production SDK shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliModelSdkConfig {
    pub executable: String,
    pub extra_args: Vec<String>,
}

impl Default for CliModelSdkConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Production SDK: drives the model CLI in bidirectional stream-json mode,
/// so follow-up user messages enter the live turn over the child's stdin.
#[derive(Debug, Clone)]
pub struct CliModelSdk {
    config: CliModelSdkConfig,
}

impl CliModelSdk {
    pub fn new(config: CliModelSdkConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        let mut config = CliModelSdkConfig::default();
        if let Ok(executable) = std::env::var("NANOCLAW_MODEL_CLI") {
            if !executable.trim().is_empty() {
                config.executable = executable;
            }
        }
        Self::new(config)
    }
}

#[async_trait]
impl ModelSdk for CliModelSdk {
    async fn open_turn(&self, request: &TurnRequest) -> Result<Box<dyn ModelTurnStream>, SdkError> {
        let mut command = Command::new(&self.config.executable);
        command.kill_on_drop(true);
        command.arg("-p").arg(&request.prompt);
        command.args([
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
        ]);
        if let Some(session_id) = &request.session_id {
            command.args(["--resume", session_id]);
        }
        command.args(&self.config.extra_args);
        for (key, value) in &request.env {
            command.env(key, value);
        }
        // Downstream tool wrappers read this to scrub credentials from the
        // shell commands they execute.
        command.env(
            "NANOCLAW_SECRET_ENV_KEYS",
            request.secret_env_keys.join(" "),
        );
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|error| SdkError::Stream(format!("failed to spawn model cli: {error}")))?;
        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(SdkError::Stream("model cli stdout was not piped".to_string()));
        };

        Ok(Box::new(CliTurnStream {
            _child: child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            transcript: vec![TranscriptEntry {
                role: TranscriptRole::User,
                text: request.prompt.clone(),
            }],
        }))
    }
}

struct CliTurnStream {
    _child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    transcript: Vec<TranscriptEntry>,
}

#[async_trait]
impl ModelTurnStream for CliTurnStream {
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, SdkError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|error| SdkError::Stream(format!("model cli stream failed: {error}")))?;
            let Some(line) = line else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
                continue;
            };
            match value.get("type").and_then(|kind| kind.as_str()) {
                Some("assistant") => {
                    let (text, tool_name) = assistant_message_parts(&value);
                    if text.is_empty() && tool_name.is_none() {
                        continue;
                    }
                    self.transcript.push(TranscriptEntry {
                        role: TranscriptRole::Assistant,
                        text: text.clone(),
                    });
                    return Ok(Some(TurnEvent::Assistant { text, tool_name }));
                }
                Some("result") => {
                    let text = value
                        .get("result")
                        .and_then(|result| result.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let session_id = value
                        .get("session_id")
                        .and_then(|session| session.as_str())
                        .map(str::to_string);
                    let is_error = value
                        .get("is_error")
                        .and_then(|flag| flag.as_bool())
                        .unwrap_or(false);
                    if is_error {
                        if text.contains(UNKNOWN_SESSION_MARKER) {
                            return Err(SdkError::UnknownSession(text));
                        }
                        if is_rate_limit_message(&text) {
                            return Err(SdkError::RateLimited(text));
                        }
                        return Err(SdkError::Stream(text));
                    }
                    self.transcript.push(TranscriptEntry {
                        role: TranscriptRole::Assistant,
                        text: text.clone(),
                    });
                    return Ok(Some(TurnEvent::Result { text, session_id }));
                }
                Some("system") => {
                    let subtype = value
                        .get("subtype")
                        .and_then(|subtype| subtype.as_str())
                        .unwrap_or_default();
                    if subtype == "compact_boundary" || subtype == "pre_compact" {
                        return Ok(Some(TurnEvent::CompactionImminent));
                    }
                }
                _ => {}
            }
        }
    }

    async fn push_user_message(&mut self, text: &str) -> Result<(), SdkError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SdkError::Stream("model cli stdin already closed".to_string()));
        };
        let message = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": text}],
            },
        });
        let mut line = message.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|error| SdkError::Stream(format!("follow-up write failed: {error}")))?;
        stdin
            .flush()
            .await
            .map_err(|error| SdkError::Stream(format!("follow-up flush failed: {error}")))?;
        self.transcript.push(TranscriptEntry {
            role: TranscriptRole::User,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn end_input(&mut self) -> Result<(), SdkError> {
        self.stdin.take();
        Ok(())
    }

    fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.clone()
    }
}

fn assistant_message_parts(value: &serde_json::Value) -> (String, Option<String>) {
    let blocks = value
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_array());
    let Some(blocks) = blocks else {
        return (String::new(), None);
    };

    let mut texts = Vec::new();
    let mut tool_name = None;
    for block in blocks {
        match block.get("type").and_then(|kind| kind.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|text| text.as_str()) {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                if tool_name.is_none() {
                    tool_name = block
                        .get("name")
                        .and_then(|name| name.as_str())
                        .map(str::to_string);
                }
            }
            _ => {}
        }
    }
    (texts.join("\n"), tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_assistant_message_parts_extracts_text_and_tool() {
        let value = serde_json::json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "running tests"},
                    {"type": "tool_use", "name": "bash", "input": {"command": "cargo test"}},
                ],
            },
        });
        let (text, tool_name) = assistant_message_parts(&value);
        assert_eq!(text, "running tests");
        assert_eq!(tool_name.as_deref(), Some("bash"));
    }

    #[test]
    fn unit_assistant_message_parts_handles_missing_content() {
        let value = serde_json::json!({"type": "assistant"});
        let (text, tool_name) = assistant_message_parts(&value);
        assert!(text.is_empty());
        assert!(tool_name.is_none());
    }
}
