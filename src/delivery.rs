use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::render::Block;

/// A Slack-compatible message: plain text, optionally with Block Kit blocks.
/// `text` doubles as the notification fallback when blocks are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: Vec::new(),
        }
    }

    pub fn with_blocks(fallback: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            text: fallback.into(),
            blocks,
        }
    }
}

pub trait ChatDelivery: Send + Sync {
    /// Deliver one message. Non-success responses are errors.
    fn deliver(&self, message: &ChatMessage) -> Result<()>;
}

/// Slack incoming-webhook delivery.
pub struct SlackWebhook {
    url: String,
    agent: ureq::Agent,
}

impl SlackWebhook {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl ChatDelivery for SlackWebhook {
    fn deliver(&self, message: &ChatMessage) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(message)
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let text = response.into_string().unwrap_or_default();
                    Error::Delivery(format!("webhook returned {code}: {}", text.trim()))
                }
                ureq::Error::Transport(t) => Error::Delivery(format!("webhook request failed: {t}")),
            })?;
        info!(blocks = message.blocks.len(), "posted message to webhook");
        Ok(())
    }
}

/// Writes messages to stdout; used for `--dry-run` and when no webhook is configured.
#[derive(Default)]
pub struct StdoutDelivery;

impl StdoutDelivery {
    pub fn new() -> Self {
        Self
    }
}

impl ChatDelivery for StdoutDelivery {
    fn deliver(&self, message: &ChatMessage) -> Result<()> {
        let mut out = std::io::stdout().lock();
        write_message(&mut out, message)
    }
}

/// Blocks are printed as the JSON payload a webhook would receive.
pub fn write_message(out: &mut dyn Write, message: &ChatMessage) -> Result<()> {
    if message.blocks.is_empty() {
        writeln!(out, "{}", message.text.trim_end())?;
    } else {
        let payload = serde_json::to_string_pretty(message)
            .map_err(|e| Error::Render(format!("failed to serialize message: {e}")))?;
        writeln!(out, "{payload}")?;
    }
    writeln!(out)?;
    Ok(())
}

pub enum AnyDelivery {
    Slack(SlackWebhook),
    Stdout(StdoutDelivery),
}

impl ChatDelivery for AnyDelivery {
    fn deliver(&self, message: &ChatMessage) -> Result<()> {
        match self {
            AnyDelivery::Slack(d) => d.deliver(message),
            AnyDelivery::Stdout(d) => d.deliver(message),
        }
    }
}
