use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("issue source error: {0}")]
    IssueSource(String),

    #[error("malformed issue record: {0}")]
    MalformedIssue(String),

    #[error("summarizer error: {0}")]
    Summarizer(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("render error: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;
