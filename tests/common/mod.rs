#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use linear_digest::config::{Config, Secret};
use linear_digest::render::OutputFormat;
use linear_digest::report::Issue;

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn issue(title: &str, state: &str, assignee: Option<&str>, days_ago: i64) -> Issue {
    Issue {
        title: title.to_string(),
        state_name: state.to_string(),
        assignee_name: assignee.map(str::to_string),
        updated_at: now() - chrono::Duration::days(days_ago),
    }
}

/// Sensible default `Config` for tests. Callers can override fields via struct update syntax.
pub fn default_test_config() -> Config {
    Config {
        linear_api_key: Secret::new("lin_api_test"),
        openai_api_key: None,
        webhook_url: None,
        team_filter: vec![],
        page_size: 200,
        recent_days: 7,
        excluded_states: vec!["Duplicate".to_string(), "Canceled".to_string()],
        include_unmatched: false,
        format: OutputFormat::Text,
        block_char_budget: 2900,
        per_assignee: true,
        summarize: true,
        model: "gpt-4o".to_string(),
        prompt_dir: None,
        cycle_team_id: None,
        request_timeout: Duration::from_secs(5),
        dry_run: true,
        now: Some(now()),
    }
}
