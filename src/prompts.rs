use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

const DEFAULT_REPORT_SUMMARY: &str = include_str!("default_prompts/report-summary.md");
const DEFAULT_CYCLE_SUMMARY: &str = include_str!("default_prompts/cycle-summary.md");

/// Prompt kinds sent to the summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    ReportSummary,
    CycleSummary,
}

impl PromptKind {
    fn filename(self) -> &'static str {
        match self {
            PromptKind::ReportSummary => "report-summary.md",
            PromptKind::CycleSummary => "cycle-summary.md",
        }
    }

    fn default_template(self) -> &'static str {
        match self {
            PromptKind::ReportSummary => DEFAULT_REPORT_SUMMARY,
            PromptKind::CycleSummary => DEFAULT_CYCLE_SUMMARY,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportPromptVars<'a> {
    pub recipient: &'a str,
    pub report: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CyclePromptVars<'a> {
    pub cycle: u32,
    pub issues: &'a str,
}

/// Prompt template engine with embedded defaults and per-file user overrides.
pub struct PromptEngine {
    override_dir: Option<String>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<String>) -> Self {
        Self { override_dir }
    }

    /// User overrides in `override_dir` take precedence over defaults.
    pub fn load_template(&self, kind: PromptKind) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(kind.filename());
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }
        Ok(kind.default_template().to_string())
    }

    pub fn render(&self, kind: PromptKind, vars: impl Serialize) -> Result<String> {
        let template = self.load_template(kind)?;
        render_template(&template, vars)
    }
}

/// Render with `upon`. Undefined variables are an error.
pub fn render_template(template: &str, vars: impl Serialize) -> Result<String> {
    let engine = upon::Engine::new();
    let compiled = engine
        .compile(template)
        .map_err(|e| Error::Prompt(format!("invalid template: {e}")))?;
    compiled
        .render(&engine, vars)
        .to_string()
        .map_err(|e| Error::Prompt(format!("failed to render template: {e}")))
}
