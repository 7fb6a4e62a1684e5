use serde::{Deserialize, Serialize};

pub const OUTPUT_START_MARKER: &str = "---NANOCLAW_OUTPUT_START---";
pub const OUTPUT_END_MARKER: &str = "---NANOCLAW_OUTPUT_END---";

/// Literal stderr token that resets the runner's no-output deadline. The
/// agent emits it every 60 s, distinguishing silent model compute from a
/// wedged process.
pub const HEARTBEAT_STDERR_TOKEN: &str = "heartbeat";

/// Stderr lines with this prefix are lifted into structured host logs.
pub const AGENT_STDERR_PREFIX: &str = "[agent-runner]";

/// Frame-level status reported by the in-container agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Success,
    Error,
}

/// One START/END-delimited JSON object on the container's stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputFrame {
    pub status: FrameStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_resume_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_resume_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one pushed stdout line amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameScanEvent {
    /// A complete frame was closed by this line.
    Frame(OutputFrame),
    /// The line belongs to an open frame body; nothing to surface yet.
    Buffered,
    /// A frame body failed to parse as JSON; the raw body is returned for
    /// logging and the scanner resets.
    Malformed(String),
    /// The line sits outside any frame and is discarded by the host.
    Outside(String),
}

/// Incremental line-fed parser for the stdout framing protocol.
#[derive(Debug, Default)]
pub struct FrameScanner {
    in_frame: bool,
    body: String,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> FrameScanEvent {
        let trimmed = line.trim_end_matches('\r');
        if trimmed == OUTPUT_START_MARKER {
            // A reopened frame abandons any half-built body.
            self.in_frame = true;
            self.body.clear();
            return FrameScanEvent::Buffered;
        }
        if trimmed == OUTPUT_END_MARKER {
            if !self.in_frame {
                return FrameScanEvent::Outside(trimmed.to_string());
            }
            self.in_frame = false;
            let body = std::mem::take(&mut self.body);
            return match serde_json::from_str::<OutputFrame>(&body) {
                Ok(frame) => FrameScanEvent::Frame(frame),
                Err(_) => FrameScanEvent::Malformed(body),
            };
        }
        if self.in_frame {
            self.body.push_str(trimmed);
            return FrameScanEvent::Buffered;
        }
        FrameScanEvent::Outside(trimmed.to_string())
    }
}
