//! Plain-text and Slack Block Kit renderings of a [`Report`].

use serde::Serialize;

use crate::report::{AssigneeSection, Issue, Report};

/// Slack rejects section text over 3000 characters.
pub const DEFAULT_BLOCK_CHAR_BUDGET: usize = 2900;
pub const TRUNCATION_MARKER: &str = "\n_…list truncated_";
/// Slack rejects messages carrying more than 50 blocks.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Text,
    #[default]
    Blocks,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(OutputFormat::Text),
            "blocks" => Some(OutputFormat::Blocks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "plain_text",
            text: text.into(),
        }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header { text: TextObject },
    Section { text: TextObject },
    Divider,
}

pub fn issue_line(issue: &Issue) -> String {
    format!("- [{}] {}", issue.state_name, issue.title)
}

/// Render the whole report, one block of text per assignee.
pub fn render_text(report: &Report) -> String {
    report
        .assignees()
        .map(|(name, section)| render_assignee_text(name, section))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_assignee_text(name: &str, section: &AssigneeSection) -> String {
    let mut out = format!("{name}\n");
    for (team, team_section) in section.teams() {
        if team_section.is_empty() {
            continue;
        }
        out.push_str(&format!("  {team}\n"));
        for (category, issues) in team_section.categories() {
            out.push_str(&format!("    {}\n", category.label()));
            for issue in issues {
                out.push_str(&format!("      {}\n", issue_line(issue)));
            }
        }
    }
    out
}

/// Render the whole report as Block Kit blocks, assignees separated by dividers.
pub fn render_blocks(report: &Report, char_budget: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    for (i, (name, section)) in report.assignees().enumerate() {
        if i > 0 {
            blocks.push(Block::Divider);
        }
        blocks.extend(render_assignee_blocks(name, section, char_budget));
    }
    blocks
}

pub fn render_assignee_blocks(
    name: &str,
    section: &AssigneeSection,
    char_budget: usize,
) -> Vec<Block> {
    let mut blocks = vec![Block::Header {
        text: TextObject::plain(name),
    }];
    for (team, team_section) in section.teams() {
        if team_section.is_empty() {
            continue;
        }
        blocks.push(Block::Section {
            text: TextObject::mrkdwn(format!("*{}*", escape_mrkdwn(team))),
        });
        for (category, issues) in team_section.categories() {
            let list = issues
                .iter()
                .map(|issue| {
                    format!(
                        "• {} _({})_",
                        escape_mrkdwn(&issue.title),
                        escape_mrkdwn(&issue.state_name)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(Block::Section {
                text: TextObject::mrkdwn(format!(
                    "*{}*\n{}",
                    category.label(),
                    truncate_to_budget(&list, char_budget)
                )),
            });
        }
    }
    blocks
}

/// Split blocks into consecutive messages of at most `max` blocks.
/// No chunk starts or ends with a divider.
pub fn chunk_blocks(blocks: Vec<Block>, max: usize) -> Vec<Vec<Block>> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<Block> = Vec::new();
    for block in blocks {
        if current.is_empty() && block == Block::Divider {
            continue;
        }
        current.push(block);
        if current.len() == max {
            chunks.push(std::mem::take(&mut current));
        }
    }
    chunks.push(current);

    for chunk in &mut chunks {
        if chunk.last() == Some(&Block::Divider) {
            chunk.pop();
        }
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

/// Cut `text` to at most `budget` characters and append [`TRUNCATION_MARKER`].
/// Prefers the last line break inside the budget so no issue is cut mid-line.
pub fn truncate_to_budget(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(budget).collect();
    let ends_on_line = text.chars().nth(budget) == Some('\n');
    if !ends_on_line
        && let Some(pos) = cut.rfind('\n')
        && pos > 0
    {
        cut.truncate(pos);
    }
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// Slack mrkdwn requires `&`, `<` and `>` to be entity-escaped.
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
