use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linear_digest::cli::{Cli, CliCommand};
use linear_digest::config::Config;
use linear_digest::delivery::{AnyDelivery, SlackWebhook, StdoutDelivery};
use linear_digest::pipeline::Pipeline;
use linear_digest::prompts::PromptEngine;
use linear_digest::sources::linear::LinearSource;
use linear_digest::summarize::OpenAiSummarizer;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(?config, "config loaded");

    let source = LinearSource::new(config.linear_api_key.expose(), config.request_timeout);
    let summarizer = config
        .summarizer_key()
        .map(|key| OpenAiSummarizer::new(key.expose(), &config.model, config.request_timeout));
    if config.summarize && summarizer.is_none() {
        info!("no summarizer credential; delivering rendered reports");
    }
    let delivery = match config.webhook_url {
        Some(ref url) if !config.dry_run => {
            AnyDelivery::Slack(SlackWebhook::new(url.expose(), config.request_timeout))
        }
        _ => AnyDelivery::Stdout(StdoutDelivery::new()),
    };
    let prompts = PromptEngine::new(config.prompt_dir.clone());

    let pipeline = Pipeline::new(source, summarizer, delivery, prompts, config);

    match cli.command.unwrap_or(CliCommand::Report) {
        CliCommand::Report => match pipeline.run_report().await {
            Ok(summary) => {
                info!(
                    teams = summary.teams_fetched,
                    teams_failed = summary.teams_failed,
                    skipped_records = summary.records_skipped,
                    delivered = summary.delivered,
                    failed = summary.delivery_failures.len(),
                    "report run finished"
                );
                for recipient in &summary.delivery_failures {
                    warn!(recipient = %recipient, "message was not delivered");
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        CliCommand::Teams => match pipeline.list_teams().await {
            Ok(teams) => {
                for team in teams {
                    println!("{} ({}) {}", team.name, team.key, team.id);
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        CliCommand::Cycle { team_id, cycle } => {
            if let Err(e) = pipeline.run_cycle(team_id.as_deref(), cycle).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
    }
}
