//! Issue report builder: groups fetched issues by assignee, team and
//! category, then orders and de-duplicates them for rendering.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_RECENT_DAYS: i64 = 7;
pub const DEFAULT_EXCLUDED_STATES: &[&str] = &["Duplicate", "Canceled"];

/// A single issue as reported by the issue source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub title: String,
    pub state_name: String,
    pub assignee_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Validate raw record fields into an `Issue`.
    /// `updated_at` accepts RFC 3339 in either `Z` or offset form.
    pub fn try_new(
        title: &str,
        state_name: &str,
        assignee_name: Option<&str>,
        updated_at: &str,
    ) -> Result<Self> {
        if title.trim().is_empty() {
            return Err(Error::MalformedIssue("missing title".to_string()));
        }
        if state_name.trim().is_empty() {
            return Err(Error::MalformedIssue(format!(
                "missing state name for '{title}'"
            )));
        }
        let updated_at = DateTime::parse_from_rfc3339(updated_at)
            .map_err(|e| {
                Error::MalformedIssue(format!(
                    "invalid updatedAt '{updated_at}' for '{title}': {e}"
                ))
            })?
            .with_timezone(&Utc);

        Ok(Self {
            title: title.to_string(),
            state_name: state_name.to_string(),
            assignee_name: assignee_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            updated_at,
        })
    }
}

/// Report categories, declared in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    RecentlyUpdated,
    ToDo,
    InProgress,
    InReview,
    ReadyForQA,
    /// Only populated when unmatched states are kept.
    Other,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::RecentlyUpdated => "Recently Updated",
            Category::ToDo => "To Do",
            Category::InProgress => "In Progress",
            Category::InReview => "In Review",
            Category::ReadyForQA => "Ready for QA",
            Category::Other => "Other",
        }
    }

    /// Look up the status category for a state name. Case-insensitive.
    pub fn from_state(state_name: &str) -> Option<Self> {
        match normalize_state(state_name).as_str() {
            "to do" | "todo" => Some(Category::ToDo),
            "in progress" => Some(Category::InProgress),
            "in review" => Some(Category::InReview),
            "ready for qa" => Some(Category::ReadyForQA),
            _ => None,
        }
    }
}

/// Lowercase and collapse whitespace so "To Do", "to  do" and "To do" compare equal.
pub fn normalize_state(state_name: &str) -> String {
    state_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Position of a state in the workflow, used to order recently updated issues.
/// Unknown states return `None` and sort last.
pub fn status_rank(state_name: &str) -> Option<usize> {
    match normalize_state(state_name).as_str() {
        "backlog" => Some(0),
        "to do" | "todo" => Some(1),
        "in progress" => Some(2),
        "in review" => Some(3),
        "ready for qa" => Some(4),
        "done" => Some(5),
        _ => None,
    }
}

/// Rules that decide whether and where an issue lands in the report.
#[derive(Debug, Clone)]
pub struct CategoryRules {
    recent_window: Duration,
    excluded_states: HashSet<String>,
    include_unmatched: bool,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECENT_DAYS,
            DEFAULT_EXCLUDED_STATES.iter().copied(),
            false,
        )
    }
}

impl CategoryRules {
    pub fn new<I, S>(recent_days: i64, excluded_states: I, include_unmatched: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            recent_window: Duration::try_days(recent_days).unwrap_or(Duration::MAX),
            excluded_states: excluded_states
                .into_iter()
                .map(|s| normalize_state(s.as_ref()))
                .collect(),
            include_unmatched,
        }
    }

    pub fn is_excluded(&self, state_name: &str) -> bool {
        self.excluded_states.contains(&normalize_state(state_name))
    }

    /// Recency wins over the state table. Returns `None` for a stale issue
    /// whose state is not in the table.
    pub fn categorize(&self, issue: &Issue, now: DateTime<Utc>) -> Option<Category> {
        if now - issue.updated_at < self.recent_window {
            return Some(Category::RecentlyUpdated);
        }
        Category::from_state(&issue.state_name)
    }
}

/// Counters describing what the builder kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub accepted: usize,
    pub unassigned: usize,
    pub excluded: usize,
    pub unmatched: usize,
    pub duplicates: usize,
}

/// Issues for one assignee within one team, keyed by category.
/// Only non-empty categories are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamSection {
    categories: BTreeMap<Category, Vec<Issue>>,
}

impl TeamSection {
    /// Categories in display order with their issues.
    pub fn categories(&self) -> impl Iterator<Item = (Category, &[Issue])> {
        self.categories
            .iter()
            .map(|(category, issues)| (*category, issues.as_slice()))
    }

    pub fn issues(&self, category: Category) -> &[Issue] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}

/// All teams an assignee has reportable issues in, ordered by team name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssigneeSection {
    teams: BTreeMap<String, TeamSection>,
}

impl AssigneeSection {
    pub fn teams(&self) -> impl Iterator<Item = (&str, &TeamSection)> {
        self.teams.iter().map(|(name, team)| (name.as_str(), team))
    }

    pub fn team(&self, name: &str) -> Option<&TeamSection> {
        self.teams.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

/// assignee -> team -> category -> issues.
///
/// No `(title, state_name)` pair appears twice for the same assignee and
/// team. Empty categories, teams and assignees are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    assignees: BTreeMap<String, AssigneeSection>,
}

impl Report {
    /// Assignees in lexicographic order.
    pub fn assignees(&self) -> impl Iterator<Item = (&str, &AssigneeSection)> {
        self.assignees
            .iter()
            .map(|(name, section)| (name.as_str(), section))
    }

    pub fn assignee(&self, name: &str) -> Option<&AssigneeSection> {
        self.assignees.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.assignees.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.assignees
            .values()
            .flat_map(|a| a.teams.values())
            .map(TeamSection::len)
            .sum()
    }
}

type Buckets = BTreeMap<String, BTreeMap<String, BTreeMap<Category, Vec<Issue>>>>;

pub struct ReportBuilder {
    rules: CategoryRules,
}

impl ReportBuilder {
    pub fn new(rules: CategoryRules) -> Self {
        Self { rules }
    }

    /// Build a report from `(team name, issue)` pairs. Input order is kept
    /// within each category apart from the recency ordering.
    pub fn build<I>(&self, now: DateTime<Utc>, entries: I) -> (Report, BuildStats)
    where
        I: IntoIterator<Item = (String, Issue)>,
    {
        let mut stats = BuildStats::default();
        let mut buckets: Buckets = BTreeMap::new();

        for (team, issue) in entries {
            let Some(assignee) = issue.assignee_name.clone() else {
                stats.unassigned += 1;
                continue;
            };
            if self.rules.is_excluded(&issue.state_name) {
                stats.excluded += 1;
                continue;
            }

            let category = match self.rules.categorize(&issue, now) {
                Some(category) => category,
                None => {
                    stats.unmatched += 1;
                    if !self.rules.include_unmatched {
                        warn!(
                            title = %issue.title,
                            state = %issue.state_name,
                            team = %team,
                            "dropping issue with unrecognized state"
                        );
                        continue;
                    }
                    debug!(
                        title = %issue.title,
                        state = %issue.state_name,
                        "filing issue under Other"
                    );
                    Category::Other
                }
            };

            buckets
                .entry(assignee)
                .or_default()
                .entry(team)
                .or_default()
                .entry(category)
                .or_default()
                .push(issue);
        }

        let mut report = Report::default();
        for (assignee, teams) in buckets {
            let mut section = AssigneeSection::default();
            for (team, mut categories) in teams {
                if let Some(recent) = categories.get_mut(&Category::RecentlyUpdated) {
                    sort_by_status(recent);
                }
                stats.duplicates += dedup_categories(&mut categories);
                categories.retain(|_, issues| !issues.is_empty());
                if categories.is_empty() {
                    continue;
                }
                stats.accepted += categories.values().map(Vec::len).sum::<usize>();
                section.teams.insert(team, TeamSection { categories });
            }
            if !section.is_empty() {
                report.assignees.insert(assignee, section);
            }
        }

        debug!(?stats, "built issue report");
        (report, stats)
    }
}

/// Stable sort by workflow position; unknown states keep their relative order after known ones.
fn sort_by_status(issues: &mut [Issue]) {
    issues.sort_by_key(|issue| status_rank(&issue.state_name).unwrap_or(usize::MAX));
}

/// Drop repeated `(title, normalized state)` pairs, walking categories in display order.
/// Returns how many issues were removed.
fn dedup_categories(categories: &mut BTreeMap<Category, Vec<Issue>>) -> usize {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut removed = 0;
    for issues in categories.values_mut() {
        let before = issues.len();
        issues.retain(|issue| {
            seen.insert((issue.title.clone(), normalize_state(&issue.state_name)))
        });
        removed += before - issues.len();
    }
    removed
}
