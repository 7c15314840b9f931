pub mod linear;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::report::Issue;

/// Linear API page size cap.
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub key: String,
}

impl Team {
    /// Match a user-supplied filter against the team name or key.
    pub fn matches(&self, filter: &str) -> bool {
        let filter = filter.trim();
        self.name.eq_ignore_ascii_case(filter) || self.key.eq_ignore_ascii_case(filter)
    }
}

/// A page of issues plus the number of records rejected as malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedIssues {
    pub issues: Vec<Issue>,
    pub skipped: usize,
}

pub trait IssueSource: Send + Sync {
    /// List every team visible to the credential.
    fn list_teams(&self) -> Result<Vec<Team>>;

    /// Fetch the first `limit` issues of a team. No pagination.
    fn fetch_team_issues(&self, team: &Team, limit: u32) -> Result<FetchedIssues>;

    /// Number of the team's active cycle, if any.
    fn find_active_cycle(&self, team_id: &str) -> Result<Option<u32>>;

    /// Number of the team's most recently completed cycle, if any.
    fn find_latest_completed_cycle(&self, team_id: &str) -> Result<Option<u32>>;

    /// Fetch the issues in a team's cycle.
    fn fetch_cycle_issues(&self, team_id: &str, number: u32, limit: u32)
    -> Result<FetchedIssues>;
}

/// Keep only the teams named by `filter`; an empty filter keeps everything.
pub fn select_teams(teams: Vec<Team>, filter: &[String]) -> Vec<Team> {
    if filter.is_empty() {
        return teams;
    }
    teams
        .into_iter()
        .filter(|team| filter.iter().any(|f| team.matches(f)))
        .collect()
}
