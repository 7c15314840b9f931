use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::cycle::{format_cycle_issues, resolve_cycle_number};
use crate::delivery::{ChatDelivery, ChatMessage};
use crate::error::{Error, Result};
use crate::prompts::{CyclePromptVars, PromptEngine, PromptKind, ReportPromptVars};
use crate::render::{
    Block, MAX_BLOCKS_PER_MESSAGE, OutputFormat, chunk_blocks, render_assignee_blocks,
    render_assignee_text, render_blocks, render_text,
};
use crate::report::{BuildStats, Issue, Report, ReportBuilder};
use crate::sources::{IssueSource, Team, select_teams};
use crate::summarize::Summarizer;

const COMBINED_RECIPIENT: &str = "Team digest";

/// Merged issues from every team that answered, in team-listing order.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub entries: Vec<(String, Issue)>,
    pub teams_fetched: usize,
    pub teams_failed: usize,
    pub records_skipped: usize,
}

#[derive(Debug, Default, PartialEq)]
pub struct RunSummary {
    pub teams_fetched: usize,
    pub teams_failed: usize,
    pub records_skipped: usize,
    pub build: BuildStats,
    pub delivered: usize,
    pub delivery_failures: Vec<String>,
}

pub struct Pipeline<S, Z, D> {
    source: Arc<S>,
    summarizer: Option<Arc<Z>>,
    delivery: Arc<D>,
    prompts: PromptEngine,
    config: Config,
}

impl<S, Z, D> Pipeline<S, Z, D>
where
    S: IssueSource + 'static,
    Z: Summarizer + 'static,
    D: ChatDelivery + 'static,
{
    pub fn new(
        source: S,
        summarizer: Option<Z>,
        delivery: D,
        prompts: PromptEngine,
        config: Config,
    ) -> Self {
        Self {
            source: Arc::new(source),
            summarizer: summarizer.map(Arc::new),
            delivery: Arc::new(delivery),
            prompts,
            config,
        }
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.list_teams())
            .await
            .map_err(|e| Error::IssueSource(format!("team listing task aborted: {e}")))?
    }

    /// Fetch every selected team concurrently. A failing team is logged and
    /// skipped; the run only fails when no team could be fetched at all.
    pub async fn fetch_issues(&self) -> Result<FetchOutcome> {
        let teams = select_teams(self.list_teams().await?, &self.config.team_filter);
        if teams.is_empty() {
            return Err(Error::IssueSource(if self.config.team_filter.is_empty() {
                "no teams visible to this API key".to_string()
            } else {
                format!(
                    "no teams match filter: {}",
                    self.config.team_filter.join(", ")
                )
            }));
        }

        let limit = self.config.page_size;
        let mut tasks = JoinSet::new();
        for (index, team) in teams.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            tasks.spawn_blocking(move || {
                let result = source.fetch_team_issues(&team, limit);
                (index, team, result)
            });
        }

        let mut outcome = FetchOutcome::default();
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "team fetch task aborted");
                    outcome.teams_failed += 1;
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        for (_, team, result) in results {
            match result {
                Ok(fetched) => {
                    outcome.teams_fetched += 1;
                    outcome.records_skipped += fetched.skipped;
                    outcome.entries.extend(
                        fetched
                            .issues
                            .into_iter()
                            .map(|issue| (team.name.clone(), issue)),
                    );
                }
                Err(e) => {
                    warn!(team = %team.name, error = %e, "skipping team after fetch failure");
                    outcome.teams_failed += 1;
                }
            }
        }

        if outcome.teams_fetched == 0 {
            return Err(Error::IssueSource(
                "every team fetch failed; nothing to report".to_string(),
            ));
        }
        if outcome.records_skipped > 0 {
            warn!(
                skipped = outcome.records_skipped,
                "skipped malformed issue records"
            );
        }
        Ok(outcome)
    }

    pub fn build_report(&self, entries: Vec<(String, Issue)>) -> (Report, BuildStats) {
        ReportBuilder::new(self.config.category_rules())
            .build(self.config.reference_time(), entries)
    }

    /// Fetch, build, render and deliver. Delivery failures are collected per recipient.
    pub async fn run_report(&self) -> Result<RunSummary> {
        let fetched = self.fetch_issues().await?;
        let mut summary = RunSummary {
            teams_fetched: fetched.teams_fetched,
            teams_failed: fetched.teams_failed,
            records_skipped: fetched.records_skipped,
            ..Default::default()
        };

        let (report, stats) = self.build_report(fetched.entries);
        summary.build = stats;
        info!(
            assignees = report.assignees().count(),
            issues = report.issue_count(),
            unassigned = stats.unassigned,
            excluded = stats.excluded,
            unmatched = stats.unmatched,
            duplicates = stats.duplicates,
            "built issue report"
        );

        if report.is_empty() {
            info!("no issues to report");
            return Ok(summary);
        }

        for (recipient, messages) in self.compose_messages(&report).await {
            match self.deliver_all(messages).await {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "delivery failed");
                    summary.delivery_failures.push(recipient);
                }
            }
        }

        Ok(summary)
    }

    async fn compose_messages(&self, report: &Report) -> Vec<(String, Vec<ChatMessage>)> {
        let budget = self.config.block_char_budget;
        if self.config.per_assignee {
            let mut composed = Vec::new();
            for (name, section) in report.assignees() {
                let text = render_assignee_text(name, section);
                let messages = self
                    .compose(name, &text, || render_assignee_blocks(name, section, budget))
                    .await;
                composed.push((name.to_string(), messages));
            }
            composed
        } else {
            let text = render_text(report);
            let messages = self
                .compose(COMBINED_RECIPIENT, &text, || render_blocks(report, budget))
                .await;
            vec![(COMBINED_RECIPIENT.to_string(), messages)]
        }
    }

    /// Summarize when possible; fall back to the rendered report. Block
    /// renderings over the per-message block limit are split across messages.
    async fn compose(
        &self,
        recipient: &str,
        text: &str,
        blocks: impl FnOnce() -> Vec<Block>,
    ) -> Vec<ChatMessage> {
        if self.summarizer.is_some() {
            let prompt = self.prompts.render(
                PromptKind::ReportSummary,
                ReportPromptVars {
                    recipient,
                    report: text,
                },
            );
            let summary = match prompt {
                Ok(prompt) => self.summarize(prompt).await,
                Err(e) => Err(e),
            };
            match summary {
                Ok(Some(summary)) => {
                    return vec![ChatMessage::text(format!("*{recipient}*\n{summary}"))];
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(recipient, error = %e, "summarization failed; sending rendered report")
                }
            }
        }

        match self.config.format {
            OutputFormat::Text => vec![ChatMessage::text(text)],
            OutputFormat::Blocks => {
                let chunks = chunk_blocks(blocks(), MAX_BLOCKS_PER_MESSAGE);
                let total = chunks.len();
                chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, chunk)| {
                        let fallback = if total > 1 {
                            format!("Issue digest: {recipient} ({}/{total})", i + 1)
                        } else {
                            format!("Issue digest: {recipient}")
                        };
                        ChatMessage::with_blocks(fallback, chunk)
                    })
                    .collect()
            }
        }
    }

    /// Run the summarizer on the blocking pool. `None` when no summarizer is configured.
    async fn summarize(&self, prompt: String) -> Result<Option<String>> {
        let Some(ref summarizer) = self.summarizer else {
            return Ok(None);
        };
        let summarizer = Arc::clone(summarizer);
        tokio::task::spawn_blocking(move || summarizer.summarize(&prompt))
            .await
            .map_err(|e| Error::Summarizer(format!("summarizer task aborted: {e}")))?
            .map(Some)
    }

    async fn deliver(&self, message: ChatMessage) -> Result<()> {
        let delivery = Arc::clone(&self.delivery);
        tokio::task::spawn_blocking(move || delivery.deliver(&message))
            .await
            .map_err(|e| Error::Delivery(format!("delivery task aborted: {e}")))?
    }

    /// Deliver a recipient's messages in order, stopping at the first failure.
    async fn deliver_all(&self, messages: Vec<ChatMessage>) -> Result<()> {
        for message in messages {
            self.deliver(message).await?;
        }
        Ok(())
    }

    /// Summarize one cycle and deliver it as a single text message.
    /// Returns the cycle number that was reported.
    pub async fn run_cycle(&self, team_id: Option<&str>, requested: Option<u32>) -> Result<u32> {
        let team_id = team_id
            .or(self.config.cycle_team_id.as_deref())
            .ok_or_else(|| {
                Error::ConfigValidation(
                    "cycle needs --team-id or cycle_team_id in config".to_string(),
                )
            })?
            .to_string();

        let source = Arc::clone(&self.source);
        let limit = self.config.page_size;
        let (number, fetched) = tokio::task::spawn_blocking(move || {
            let number = resolve_cycle_number(source.as_ref(), &team_id, requested)?;
            let fetched = source.fetch_cycle_issues(&team_id, number, limit)?;
            Ok::<_, Error>((number, fetched))
        })
        .await
        .map_err(|e| Error::IssueSource(format!("cycle fetch task aborted: {e}")))??;

        if fetched.skipped > 0 {
            warn!(skipped = fetched.skipped, "skipped malformed issue records");
        }
        info!(cycle = number, issues = fetched.issues.len(), "fetched cycle issues");

        let issues = format_cycle_issues(&fetched.issues);
        let text = if self.summarizer.is_some() {
            let prompt = self.prompts.render(
                PromptKind::CycleSummary,
                CyclePromptVars {
                    cycle: number,
                    issues: &issues,
                },
            );
            let summary = match prompt {
                Ok(prompt) => self.summarize(prompt).await,
                Err(e) => Err(e),
            };
            match summary {
                Ok(Some(summary)) => summary,
                Ok(None) => issues,
                Err(e) => {
                    warn!(error = %e, "summarization failed; sending issue list");
                    issues
                }
            }
        } else {
            issues
        };

        self.deliver(ChatMessage::text(text)).await?;
        Ok(number)
    }
}
