use clap::{Parser, Subcommand};

/// Group Linear issues by assignee and post a digest to Slack
#[derive(Parser, Debug, Clone)]
#[command(name = "linear-digest", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Path to config file (default: linear-digest.toml, optional)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Only include this team (name or key); repeatable
    #[arg(long = "team", global = true)]
    pub teams: Vec<String>,

    /// Print messages to stdout instead of posting them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Skip LLM summarization and deliver the rendered report
    #[arg(long, global = true)]
    pub no_summary: bool,

    /// Message format for report delivery (text, blocks)
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Reference time for recency checks, RFC 3339 (default: now)
    #[arg(long, global = true)]
    pub now: Option<String>,

    /// Post one combined message instead of one per assignee
    #[arg(long, global = true)]
    pub combined: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Build the per-assignee issue report and deliver it (default)
    Report,

    /// List teams visible to the Linear API key
    Teams,

    /// Summarize a team's cycle (active cycle, or the latest completed one)
    Cycle {
        /// Linear team id (default: cycle_team_id from config)
        #[arg(long)]
        team_id: Option<String>,

        /// Cycle number (default: active cycle, falling back to latest completed)
        #[arg(long)]
        cycle: Option<u32>,
    },
}
