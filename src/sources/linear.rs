use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::report::Issue;

use super::{FetchedIssues, IssueSource, Team};

const LINEAR_API_URL: &str = "https://api.linear.app/graphql";
const LINEAR_CLI_CREDENTIALS: &str = ".config/linear/credentials.toml";
/// How many completed cycles to scan when looking for the latest one.
const COMPLETED_CYCLE_SCAN: u32 = 50;

/// Resolve the Linear API key: env var first, then Linear CLI credentials file.
pub fn resolve_api_key(api_key_env: &str) -> Result<String> {
    if let Ok(key) = std::env::var(api_key_env)
        && !key.trim().is_empty()
    {
        return Ok(key.trim().to_string());
    }

    if let Some(home) = std::env::var_os("HOME") {
        let creds_path = std::path::Path::new(&home).join(LINEAR_CLI_CREDENTIALS);
        if let Ok(contents) = std::fs::read_to_string(&creds_path)
            && let Some(token) = token_from_credentials(&contents)
        {
            debug!("using Linear API key from CLI credentials");
            return Ok(token);
        }
    }

    Err(Error::ConfigValidation(format!(
        "Linear API key not found in ${api_key_env} or ~/{LINEAR_CLI_CREDENTIALS}"
    )))
}

/// The credentials file maps profile names to tokens, with `default` naming the active profile.
fn token_from_credentials(contents: &str) -> Option<String> {
    let table = contents.parse::<toml::Table>().ok()?;
    let profile = table.get("default")?.as_str()?;
    table
        .get(profile)?
        .as_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

pub trait LinearClient: Send + Sync {
    fn graphql(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value>;
}

pub struct DefaultLinearClient {
    api_key: String,
    agent: ureq::Agent,
}

impl DefaultLinearClient {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl LinearClient for DefaultLinearClient {
    fn graphql(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        // Linear API uses raw API key, not "Bearer <key>"
        let response = self
            .agent
            .post(LINEAR_API_URL)
            .set("Authorization", &self.api_key)
            .set("Content-Type", "application/json")
            .send_json(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let text = response.into_string().unwrap_or_default();
                    Error::IssueSource(format!("Linear API returned {code}: {text}"))
                }
                ureq::Error::Transport(t) => {
                    Error::IssueSource(format!("Linear API request failed: {t}"))
                }
            })?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| Error::IssueSource(format!("failed to parse Linear response: {e}")))?;

        if let Some(errors) = json.get("errors") {
            return Err(Error::IssueSource(format!("Linear API errors: {errors}")));
        }

        json.get("data")
            .cloned()
            .ok_or_else(|| Error::IssueSource("Linear API response missing data".to_string()))
    }
}

// ---------------------------------------------------------------------------
// GraphQL response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IssueNode {
    title: String,
    #[serde(rename = "updatedAt")]
    updated_at: String,
    state: StateNode,
    assignee: Option<AssigneeNode>,
}

impl IssueNode {
    fn into_issue(self) -> Result<Issue> {
        Issue::try_new(
            &self.title,
            &self.state.name,
            self.assignee.as_ref().map(|a| a.name.as_str()),
            &self.updated_at,
        )
    }
}

#[derive(Debug, Deserialize)]
struct StateNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AssigneeNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TeamConnection {
    nodes: Vec<Team>,
}

#[derive(Debug, Deserialize)]
struct CycleNode {
    number: f64,
}

#[derive(Debug, Deserialize)]
struct CycleConnection {
    nodes: Vec<CycleNode>,
}

/// Parse an `issues { nodes [...] }` connection record by record, so one bad
/// node costs one issue rather than the whole page.
fn parse_issue_connection(connection: Option<&serde_json::Value>, context: &str) -> Result<FetchedIssues> {
    let nodes = connection
        .and_then(|c| c.get("nodes"))
        .and_then(|n| n.as_array())
        .ok_or_else(|| {
            Error::IssueSource(format!("unexpected Linear response shape for {context}"))
        })?;

    let mut fetched = FetchedIssues::default();
    for node in nodes {
        let parsed = serde_json::from_value::<IssueNode>(node.clone())
            .map_err(|e| Error::MalformedIssue(e.to_string()))
            .and_then(IssueNode::into_issue);
        match parsed {
            Ok(issue) => fetched.issues.push(issue),
            Err(e) => {
                warn!(context, error = %e, "skipping malformed issue record");
                fetched.skipped += 1;
            }
        }
    }
    Ok(fetched)
}

fn cycle_number(node: &CycleNode) -> Option<u32> {
    (node.number >= 0.0 && node.number.fract() == 0.0).then_some(node.number as u32)
}

// ---------------------------------------------------------------------------
// LinearSource
// ---------------------------------------------------------------------------

pub struct LinearSource {
    client: Box<dyn LinearClient>,
}

impl LinearSource {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            client: Box::new(DefaultLinearClient::new(api_key, timeout)),
        }
    }

    pub fn with_client(client: Box<dyn LinearClient>) -> Self {
        Self { client }
    }

    fn highest_cycle_number(&self, query: &str, team_id: &str) -> Result<Option<u32>> {
        let data = self
            .client
            .graphql(query, serde_json::json!({ "teamId": team_id }))?;

        let cycles: CycleConnection =
            serde_json::from_value(data.get("cycles").cloned().unwrap_or_default())
                .map_err(|e| Error::IssueSource(format!("failed to parse cycles: {e}")))?;

        Ok(cycles.nodes.iter().filter_map(cycle_number).max())
    }
}

impl IssueSource for LinearSource {
    fn list_teams(&self) -> Result<Vec<Team>> {
        let query = r#"
            query Teams {
                teams { nodes { id name key } }
            }
        "#;

        let data = self.client.graphql(query, serde_json::json!({}))?;

        let teams: TeamConnection =
            serde_json::from_value(data.get("teams").cloned().unwrap_or_default())
                .map_err(|e| Error::IssueSource(format!("failed to parse teams: {e}")))?;

        debug!(count = teams.nodes.len(), "listed Linear teams");
        Ok(teams.nodes)
    }

    fn fetch_team_issues(&self, team: &Team, limit: u32) -> Result<FetchedIssues> {
        let query = r#"
            query TeamIssues($teamId: String!, $first: Int!) {
                team(id: $teamId) {
                    issues(first: $first) {
                        nodes {
                            title updatedAt
                            state { name }
                            assignee { name }
                        }
                    }
                }
            }
        "#;

        let data = self.client.graphql(
            query,
            serde_json::json!({ "teamId": team.id, "first": limit }),
        )?;

        let fetched = parse_issue_connection(
            data.get("team").and_then(|t| t.get("issues")),
            &format!("team '{}'", team.name),
        )?;

        debug!(
            team = %team.name,
            count = fetched.issues.len(),
            skipped = fetched.skipped,
            "fetched Linear team issues"
        );
        Ok(fetched)
    }

    fn find_active_cycle(&self, team_id: &str) -> Result<Option<u32>> {
        let query = r#"
            query ActiveCycle($teamId: ID!) {
                cycles(
                    filter: { team: { id: { eq: $teamId } }, isActive: { eq: true } }
                    first: 1
                ) {
                    nodes { number }
                }
            }
        "#;
        self.highest_cycle_number(query, team_id)
    }

    fn find_latest_completed_cycle(&self, team_id: &str) -> Result<Option<u32>> {
        let query = format!(
            r#"
            query CompletedCycles($teamId: ID!) {{
                cycles(
                    filter: {{ team: {{ id: {{ eq: $teamId }} }}, completedAt: {{ null: false }} }}
                    first: {COMPLETED_CYCLE_SCAN}
                ) {{
                    nodes {{ number }}
                }}
            }}
        "#
        );
        self.highest_cycle_number(&query, team_id)
    }

    fn fetch_cycle_issues(&self, team_id: &str, number: u32, limit: u32) -> Result<FetchedIssues> {
        let query = r#"
            query CycleIssues($teamId: ID!, $number: Float!, $first: Int!) {
                cycles(filter: { team: { id: { eq: $teamId } }, number: { eq: $number } }) {
                    nodes {
                        issues(first: $first) {
                            nodes {
                                title updatedAt
                                state { name }
                                assignee { name }
                            }
                        }
                    }
                }
            }
        "#;

        let data = self.client.graphql(
            query,
            serde_json::json!({ "teamId": team_id, "number": number as f64, "first": limit }),
        )?;

        let cycle = data
            .get("cycles")
            .and_then(|c| c.get("nodes"))
            .and_then(|n| n.as_array())
            .and_then(|nodes| nodes.first())
            .ok_or_else(|| {
                Error::IssueSource(format!("cycle {number} not found for team '{team_id}'"))
            })?;

        parse_issue_connection(cycle.get("issues"), &format!("cycle {number}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
