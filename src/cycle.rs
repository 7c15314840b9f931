//! Cycle digests: pick a cycle, list its issues, and summarize them.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::report::Issue;
use crate::sources::IssueSource;

/// Use the requested cycle, else the active one, else the latest completed one.
pub fn resolve_cycle_number<S: IssueSource + ?Sized>(
    source: &S,
    team_id: &str,
    requested: Option<u32>,
) -> Result<u32> {
    if let Some(number) = requested {
        return Ok(number);
    }

    if let Some(number) = source.find_active_cycle(team_id)? {
        info!(cycle = number, "detected active cycle");
        return Ok(number);
    }

    warn!(team_id, "no active cycle; falling back to latest completed cycle");
    match source.find_latest_completed_cycle(team_id)? {
        Some(number) => {
            info!(cycle = number, "using latest completed cycle");
            Ok(number)
        }
        None => Err(Error::IssueSource(format!(
            "no active or completed cycle found for team '{team_id}'"
        ))),
    }
}

pub fn cycle_issue_line(issue: &Issue) -> String {
    format!(
        "- [{}] {} — {}",
        issue.state_name,
        issue.title,
        issue.assignee_name.as_deref().unwrap_or("Unassigned")
    )
}

pub fn format_cycle_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(cycle_issue_line)
        .collect::<Vec<_>>()
        .join("\n")
}
