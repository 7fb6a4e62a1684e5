use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use nanoclaw_queue::OutboundDelivery;

const STDIO_CHAT_JID: &str = "stdio@local";

/// One inbound chat message from the channel driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChat {
    pub chat_jid: String,
    pub group_folder: String,
    pub body: String,
}

/// The chat channel collaborator. The real driver (message polling plus
/// an outbound send queue) lives outside this repo; the host only needs
/// this seam.
#[async_trait]
pub trait ChatChannel: Send {
    /// Next inbound message; `None` once the channel is closed.
    async fn next_inbound(&mut self) -> Option<InboundChat>;

    async fn send_outbound(&mut self, delivery: &OutboundDelivery) -> Result<()>;
}

/// Line-oriented operator channel over the host's own stdio. Lines of the
/// form `@group text` address a specific group; anything else goes to the
/// default group.
pub struct StdioChatChannel {
    lines: Lines<BufReader<Stdin>>,
    default_group: String,
}

impl StdioChatChannel {
    pub fn new(default_group: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            default_group: default_group.into(),
        }
    }
}

#[async_trait]
impl ChatChannel for StdioChatChannel {
    async fn next_inbound(&mut self) -> Option<InboundChat> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (group_folder, body) = parse_channel_line(trimmed, &self.default_group);
            return Some(InboundChat {
                chat_jid: STDIO_CHAT_JID.to_string(),
                group_folder,
                body,
            });
        }
    }

    async fn send_outbound(&mut self, delivery: &OutboundDelivery) -> Result<()> {
        println!("[{}] {}", delivery.group, delivery.text);
        Ok(())
    }
}

fn parse_channel_line(line: &str, default_group: &str) -> (String, String) {
    if let Some(addressed) = line.strip_prefix('@') {
        if let Some((group, body)) = addressed.split_once(' ') {
            if !group.is_empty() && !body.trim().is_empty() {
                return (group.to_string(), body.trim().to_string());
            }
        }
    }
    (default_group.to_string(), line.to_string())
}
