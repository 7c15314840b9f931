mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use linear_digest::config::Config;
use linear_digest::delivery::{ChatDelivery, ChatMessage};
use linear_digest::error::{Error, Result};
use linear_digest::pipeline::Pipeline;
use linear_digest::prompts::PromptEngine;
use linear_digest::render::{Block, MAX_BLOCKS_PER_MESSAGE, OutputFormat};
use linear_digest::report::Issue;
use linear_digest::sources::{FetchedIssues, IssueSource, Team};
use linear_digest::summarize::Summarizer;

use common::{default_test_config, issue};

// --- Mock implementations ---

#[derive(Default)]
struct MockSource {
    teams: Vec<Team>,
    issues: HashMap<String, std::result::Result<Vec<Issue>, String>>,
    skipped: HashMap<String, usize>,
    team_listing_fails: bool,
    active_cycle: Option<u32>,
    completed_cycle: Option<u32>,
    cycle_issues: Vec<Issue>,
}

impl MockSource {
    fn with_team(mut self, name: &str, issues: Vec<Issue>) -> Self {
        self.teams.push(team(name));
        self.issues.insert(name.to_string(), Ok(issues));
        self
    }

    fn with_failing_team(mut self, name: &str) -> Self {
        self.teams.push(team(name));
        self.issues
            .insert(name.to_string(), Err("HTTP 502".to_string()));
        self
    }
}

fn team(name: &str) -> Team {
    Team {
        id: format!("id-{}", name.to_lowercase()),
        name: name.to_string(),
        key: name.to_uppercase(),
    }
}

impl IssueSource for MockSource {
    fn list_teams(&self) -> Result<Vec<Team>> {
        if self.team_listing_fails {
            return Err(Error::IssueSource("connection refused".to_string()));
        }
        Ok(self.teams.clone())
    }

    fn fetch_team_issues(&self, team: &Team, _limit: u32) -> Result<FetchedIssues> {
        match self.issues.get(&team.name) {
            Some(Ok(issues)) => Ok(FetchedIssues {
                issues: issues.clone(),
                skipped: self.skipped.get(&team.name).copied().unwrap_or(0),
            }),
            Some(Err(e)) => Err(Error::IssueSource(e.clone())),
            None => Ok(FetchedIssues::default()),
        }
    }

    fn find_active_cycle(&self, _team_id: &str) -> Result<Option<u32>> {
        Ok(self.active_cycle)
    }

    fn find_latest_completed_cycle(&self, _team_id: &str) -> Result<Option<u32>> {
        Ok(self.completed_cycle)
    }

    fn fetch_cycle_issues(&self, _team_id: &str, _number: u32, _limit: u32) -> Result<FetchedIssues> {
        Ok(FetchedIssues {
            issues: self.cycle_issues.clone(),
            skipped: 0,
        })
    }
}

struct MockSummarizer {
    prompts: Arc<Mutex<Vec<String>>>,
    fail: bool,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl MockSummarizer {
    fn new(prompts: Arc<Mutex<Vec<String>>>, fail: bool) -> Self {
        Self {
            prompts,
            fail,
            threads: Arc::default(),
        }
    }
}

impl Summarizer for MockSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String> {
        self.threads.lock().unwrap().push(thread::current().id());
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            Err(Error::Summarizer("rate limited".to_string()))
        } else {
            Ok("All on track.".to_string())
        }
    }
}

#[derive(Clone, Default)]
struct RecordingDelivery {
    sent: Arc<Mutex<Vec<ChatMessage>>>,
    /// Messages whose text contains this string are rejected.
    reject_containing: Option<String>,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl ChatDelivery for RecordingDelivery {
    fn deliver(&self, message: &ChatMessage) -> Result<()> {
        self.threads.lock().unwrap().push(thread::current().id());
        if let Some(ref needle) = self.reject_containing
            && message.text.contains(needle.as_str())
        {
            return Err(Error::Delivery("webhook returned 404: no_service".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn pipeline(
    source: MockSource,
    summarizer: Option<MockSummarizer>,
    delivery: RecordingDelivery,
    config: Config,
) -> Pipeline<MockSource, MockSummarizer, RecordingDelivery> {
    Pipeline::new(source, summarizer, delivery, PromptEngine::new(None), config)
}

fn sent_texts(delivery: &RecordingDelivery) -> Vec<String> {
    delivery
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.text.clone())
        .collect()
}

// --- Report runs ---

#[tokio::test]
async fn test_end_to_end_text_report() {
    let source = MockSource::default().with_team(
        "Core",
        vec![
            issue("Fix login", "In Progress", Some("Ada"), 2),
            issue("Old bug", "To do", Some("Ada"), 40),
            issue("Spam", "Duplicate", Some("Ada"), 1),
        ],
    );
    let delivery = RecordingDelivery::default();
    let summary = pipeline(source, None, delivery.clone(), default_test_config())
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.build.excluded, 1);
    let texts = sent_texts(&delivery);
    assert_eq!(
        texts[0],
        "Ada\n  Core\n    Recently Updated\n      - [In Progress] Fix login\n    To Do\n      - [To do] Old bug\n"
    );
}

#[tokio::test]
async fn test_one_message_per_assignee_in_name_order() {
    let source = MockSource::default()
        .with_team("Web", vec![issue("Landing", "In Review", Some("Zed"), 20)])
        .with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let delivery = RecordingDelivery::default();
    let summary = pipeline(source, None, delivery.clone(), default_test_config())
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.delivered, 2);
    let texts = sent_texts(&delivery);
    assert!(texts[0].starts_with("Ada\n"));
    assert!(texts[1].starts_with("Zed\n"));
}

#[tokio::test]
async fn test_combined_message() {
    let source = MockSource::default()
        .with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)])
        .with_team("Web", vec![issue("Landing", "In Review", Some("Zed"), 20)]);
    let delivery = RecordingDelivery::default();
    let config = Config {
        per_assignee: false,
        ..default_test_config()
    };
    let summary = pipeline(source, None, delivery.clone(), config)
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.delivered, 1);
    let texts = sent_texts(&delivery);
    assert!(texts[0].contains("Ada\n"));
    assert!(texts[0].contains("Zed\n"));
}

#[tokio::test]
async fn test_blocks_format_carries_blocks_and_fallback() {
    let source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let delivery = RecordingDelivery::default();
    let config = Config {
        format: OutputFormat::Blocks,
        ..default_test_config()
    };
    pipeline(source, None, delivery.clone(), config)
        .run_report()
        .await
        .unwrap();

    let sent = delivery.sent.lock().unwrap();
    assert_eq!(sent[0].text, "Issue digest: Ada");
    assert!(matches!(sent[0].blocks[0], Block::Header { .. }));
}

#[tokio::test]
async fn test_failed_team_skipped_others_reported() {
    let source = MockSource::default()
        .with_failing_team("Broken")
        .with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let delivery = RecordingDelivery::default();
    let summary = pipeline(source, None, delivery.clone(), default_test_config())
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.teams_fetched, 1);
    assert_eq!(summary.teams_failed, 1);
    assert_eq!(summary.delivered, 1);
}

#[tokio::test]
async fn test_all_teams_failing_is_fatal() {
    let source = MockSource::default()
        .with_failing_team("Core")
        .with_failing_team("Web");
    let err = pipeline(
        source,
        None,
        RecordingDelivery::default(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap_err();
    assert!(err.to_string().contains("every team fetch failed"));
}

#[tokio::test]
async fn test_team_listing_failure_is_fatal() {
    let source = MockSource {
        team_listing_fails: true,
        ..Default::default()
    };
    let err = pipeline(
        source,
        None,
        RecordingDelivery::default(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap_err();
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_team_filter_limits_fetch() {
    let source = MockSource::default()
        .with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)])
        .with_team("Web", vec![issue("Landing", "To do", Some("Zed"), 20)]);
    let delivery = RecordingDelivery::default();
    let config = Config {
        team_filter: vec!["core".to_string()],
        ..default_test_config()
    };
    let summary = pipeline(source, None, delivery.clone(), config)
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.teams_fetched, 1);
    let texts = sent_texts(&delivery);
    assert_eq!(texts.len(), 1);
    assert!(!texts[0].contains("Landing"));
}

#[tokio::test]
async fn test_team_filter_matching_nothing_is_error() {
    let source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let config = Config {
        team_filter: vec!["Mobile".to_string()],
        ..default_test_config()
    };
    let err = pipeline(source, None, RecordingDelivery::default(), config)
        .fetch_issues()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no teams match filter: Mobile"));
}

#[tokio::test]
async fn test_fetch_merges_in_team_listing_order() {
    let source = MockSource::default()
        .with_team("Zeta", vec![issue("z1", "To do", Some("Ada"), 20)])
        .with_team("Alpha", vec![issue("a1", "To do", Some("Ada"), 20)]);
    let outcome = pipeline(
        source,
        None,
        RecordingDelivery::default(),
        default_test_config(),
    )
    .fetch_issues()
    .await
    .unwrap();
    let teams: Vec<&str> = outcome.entries.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(teams, vec!["Zeta", "Alpha"]);
}

#[tokio::test]
async fn test_skipped_records_surfaced() {
    let mut source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    source.skipped.insert("Core".to_string(), 3);
    let summary = pipeline(
        source,
        None,
        RecordingDelivery::default(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap();
    assert_eq!(summary.records_skipped, 3);
}

#[tokio::test]
async fn test_delivery_failure_reported_per_recipient() {
    let source = MockSource::default().with_team(
        "Core",
        vec![
            issue("a", "To do", Some("Ada"), 20),
            issue("b", "To do", Some("Bob"), 20),
            issue("c", "To do", Some("Cy"), 20),
        ],
    );
    let delivery = RecordingDelivery {
        reject_containing: Some("Bob".to_string()),
        ..Default::default()
    };
    let summary = pipeline(source, None, delivery.clone(), default_test_config())
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.delivery_failures, vec!["Bob".to_string()]);
    assert_eq!(sent_texts(&delivery).len(), 2);
}

#[tokio::test]
async fn test_empty_report_delivers_nothing() {
    let source = MockSource::default().with_team(
        "Core",
        vec![
            issue("Orphan", "To do", None, 20),
            issue("Gone", "Canceled", Some("Ada"), 20),
        ],
    );
    let delivery = RecordingDelivery::default();
    let summary = pipeline(source, None, delivery.clone(), default_test_config())
        .run_report()
        .await
        .unwrap();
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.build.unassigned, 1);
    assert!(sent_texts(&delivery).is_empty());
}

#[tokio::test]
async fn test_summarizer_receives_rendered_report() {
    let source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let summarizer = MockSummarizer::new(Arc::clone(&prompts), false);
    let delivery = RecordingDelivery::default();
    pipeline(
        source,
        Some(summarizer),
        delivery.clone(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap();

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("- [To do] Parser"));
    assert!(prompts[0].contains("open work for Ada"));
    assert_eq!(sent_texts(&delivery), vec!["*Ada*\nAll on track.".to_string()]);
}

#[tokio::test]
async fn test_summarizer_failure_falls_back_to_report() {
    let source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let summarizer = MockSummarizer::new(Arc::default(), true);
    let delivery = RecordingDelivery::default();
    let summary = pipeline(
        source,
        Some(summarizer),
        delivery.clone(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap();

    assert_eq!(summary.delivered, 1);
    assert!(sent_texts(&delivery)[0].contains("- [To do] Parser"));
}

#[tokio::test]
async fn test_large_block_report_split_across_messages() {
    let states = ["To do", "In Progress", "In Review", "Ready for QA"];
    let mut source = MockSource::default();
    for t in 0..12 {
        let mut issues: Vec<Issue> = states
            .iter()
            .enumerate()
            .map(|(i, state)| issue(&format!("Issue {t}-{i}"), state, Some("Ada"), 30))
            .collect();
        issues.push(issue(&format!("Fresh {t}"), "In Progress", Some("Ada"), 1));
        source = source.with_team(&format!("Team {t:02}"), issues);
    }
    let delivery = RecordingDelivery::default();
    let config = Config {
        format: OutputFormat::Blocks,
        ..default_test_config()
    };
    let summary = pipeline(source, None, delivery.clone(), config)
        .run_report()
        .await
        .unwrap();

    assert_eq!(summary.delivered, 1);
    let sent = delivery.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.blocks.len() <= MAX_BLOCKS_PER_MESSAGE));
    assert_eq!(sent.iter().map(|m| m.blocks.len()).sum::<usize>(), 73);
    assert_eq!(sent[0].text, "Issue digest: Ada (1/2)");
    assert_eq!(sent[1].text, "Issue digest: Ada (2/2)");
}

#[tokio::test(flavor = "current_thread")]
async fn test_summarizer_and_delivery_run_on_blocking_pool() {
    let source =
        MockSource::default().with_team("Core", vec![issue("Parser", "To do", Some("Ada"), 20)]);
    let summarizer = MockSummarizer::new(Arc::default(), false);
    let summarizer_threads = Arc::clone(&summarizer.threads);
    let delivery = RecordingDelivery::default();
    pipeline(
        source,
        Some(summarizer),
        delivery.clone(),
        default_test_config(),
    )
    .run_report()
    .await
    .unwrap();

    let runtime_thread = thread::current().id();
    let summarizer_threads = summarizer_threads.lock().unwrap();
    let delivery_threads = delivery.threads.lock().unwrap();
    assert_eq!(summarizer_threads.len(), 1);
    assert_eq!(delivery_threads.len(), 1);
    assert_ne!(summarizer_threads[0], runtime_thread);
    assert_ne!(delivery_threads[0], runtime_thread);
}

// --- Cycle runs ---

#[tokio::test]
async fn test_cycle_uses_active_cycle_and_lists_issues() {
    let source = MockSource {
        active_cycle: Some(14),
        cycle_issues: vec![
            issue("Ship it", "Done", Some("Ada"), 3),
            issue("Mystery", "In Progress", None, 3),
        ],
        ..Default::default()
    };
    let delivery = RecordingDelivery::default();
    let number = pipeline(source, None, delivery.clone(), default_test_config())
        .run_cycle(Some("team-1"), None)
        .await
        .unwrap();

    assert_eq!(number, 14);
    assert_eq!(
        sent_texts(&delivery),
        vec!["- [Done] Ship it — Ada\n- [In Progress] Mystery — Unassigned".to_string()]
    );
}

#[tokio::test]
async fn test_cycle_falls_back_to_completed_and_summarizes() {
    let source = MockSource {
        completed_cycle: Some(13),
        cycle_issues: vec![issue("Ship it", "Done", Some("Ada"), 3)],
        ..Default::default()
    };
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let summarizer = MockSummarizer::new(Arc::clone(&prompts), false);
    let delivery = RecordingDelivery::default();
    let config = Config {
        cycle_team_id: Some("team-1".to_string()),
        ..default_test_config()
    };
    let number = pipeline(source, Some(summarizer), delivery.clone(), config)
        .run_cycle(None, None)
        .await
        .unwrap();

    assert_eq!(number, 13);
    assert!(prompts.lock().unwrap()[0].contains("cycle 13"));
    assert_eq!(sent_texts(&delivery), vec!["All on track.".to_string()]);
}

#[tokio::test]
async fn test_cycle_requires_team_id() {
    let err = pipeline(
        MockSource::default(),
        None,
        RecordingDelivery::default(),
        default_test_config(),
    )
    .run_cycle(None, Some(3))
    .await
    .unwrap_err();
    assert!(err.to_string().contains("--team-id"));
}

#[tokio::test]
async fn test_cycle_delivery_failure_is_error() {
    let source = MockSource {
        cycle_issues: vec![issue("Ship it", "Done", Some("Ada"), 3)],
        ..Default::default()
    };
    let delivery = RecordingDelivery {
        reject_containing: Some("Ship it".to_string()),
        ..Default::default()
    };
    let err = pipeline(source, None, delivery, default_test_config())
        .run_cycle(Some("team-1"), Some(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Delivery(_)));
}
