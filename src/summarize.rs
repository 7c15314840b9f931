use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";

pub trait Summarizer: Send + Sync {
    /// Turn a rendered prompt into free-form prose.
    fn summarize(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI chat-completions summarizer.
pub struct OpenAiSummarizer {
    api_key: String,
    model: String,
    agent: ureq::Agent,
}

impl OpenAiSummarizer {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

impl Summarizer for OpenAiSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String> {
        let response = self
            .agent
            .post(OPENAI_CHAT_URL)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(self.request_body(prompt))
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let text = response.into_string().unwrap_or_default();
                    Error::Summarizer(format!("OpenAI returned {code}: {text}"))
                }
                ureq::Error::Transport(t) => {
                    Error::Summarizer(format!("OpenAI request failed: {t}"))
                }
            })?;

        let completion: ChatCompletion = response
            .into_json()
            .map_err(|e| Error::Summarizer(format!("failed to parse OpenAI response: {e}")))?;

        let summary = extract_summary(completion)?;
        debug!(model = %self.model, chars = summary.len(), "received summary");
        Ok(summary)
    }
}

fn extract_summary(completion: ChatCompletion) -> Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| Error::Summarizer("OpenAI response contained no summary".to_string()))
}
