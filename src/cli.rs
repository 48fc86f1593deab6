//! CLI interface for forgeflow-learning

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::config::{self, Config};
use crate::knowledge::{KnowledgeStore, LocalKnowledgeStore};
use crate::learning::{CandidateKind, FeedbackLoop, PromotionEngine, UsageHistory};
use crate::outcomes::{Complexity, ExportFormat, OutcomeFilter, OutcomeLog, OutcomeRecord, TimeRange};

#[derive(Parser)]
#[command(name = "forgeflow-learning")]
#[command(about = "Outcome log and knowledge-card promotion engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "FORGEFLOW_LEARNING_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append outcome records (one JSON object per line) from a file or stdin
    Append {
        /// JSONL file; reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Show the latest outcome for a job
    Get {
        job_id: String,
    },
    /// List outcomes, newest first
    Query {
        /// Only outcomes from the last N days
        #[arg(long)]
        days: Option<i64>,
        /// Only successful outcomes
        #[arg(long, conflicts_with = "failed")]
        succeeded: bool,
        /// Only failed outcomes
        #[arg(long)]
        failed: bool,
        /// Agent type (repeatable)
        #[arg(long = "agent")]
        agents: Vec<String>,
        /// Job category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Complexity (repeatable)
        #[arg(long = "complexity")]
        complexities: Vec<Complexity>,
        /// Minimum overall quality score
        #[arg(long)]
        min_quality: Option<f64>,
        /// Maximum duration in milliseconds
        #[arg(long)]
        max_duration: Option<u64>,
        /// Issue id (repeatable)
        #[arg(long = "issue")]
        issues: Vec<String>,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
    /// Aggregate statistics
    Stats {
        /// Only outcomes from the last N days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Export outcomes to the export directory
    Export {
        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
        /// Only outcomes from the last N days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Remove outcomes older than N days
    Cleanup {
        /// Defaults to outcomes.retentionDays from the configuration
        #[arg(long)]
        older_than_days: Option<i64>,
    },
    /// Evaluate one knowledge card
    Evaluate {
        card_id: String,
    },
    /// Preview cards that a batch would promote or demote
    Candidates {
        /// promote or demote
        kind: CandidateKind,
    },
    /// Evaluate every card and apply tier changes
    RunBatch,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Check thresholds and limits
    Validate,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything a command needs, built from configuration
struct Core {
    log: Arc<OutcomeLog>,
    usage: Arc<UsageHistory>,
    engine: Arc<PromotionEngine>,
}

impl Core {
    async fn open(config: &Config) -> Result<Self> {
        let knowledge: Arc<dyn KnowledgeStore> = Arc::new(LocalKnowledgeStore::open(config.knowledge_path()?).await?);
        let usage = Arc::new(UsageHistory::new(knowledge.clone(), config.learning.max_usage_per_card));
        let engine = Arc::new(PromotionEngine::new(config, knowledge, usage.clone())?);
        engine.restore().await;
        let log = Arc::new(OutcomeLog::open(config).await?);
        Ok(Self { log, usage, engine })
    }

    async fn close(self) -> Result<()> {
        self.log.close().await?;
        Ok(())
    }
}

fn config_file(cli_path: &Option<PathBuf>) -> Result<PathBuf> {
    match cli_path {
        Some(path) => Ok(path.clone()),
        None => Ok(config::config_path()?),
    }
}

fn load_config(cli_path: &Option<PathBuf>) -> Result<Config> {
    let config = match cli_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config.validated()?)
}

fn days_range(days: Option<i64>) -> Result<Option<TimeRange>> {
    match days {
        Some(d) if d < 0 => anyhow::bail!("--days must be non-negative, got {}", d),
        Some(d) => Ok(Some(TimeRange::last_days(d))),
        None => Ok(None),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { command } => return run_config(&command, &cli.config),
        other => other,
    };

    let config = load_config(&cli.config)?;
    let core = Core::open(&config).await?;
    let outcome = run_command(command, cli.json, &config, &core).await;
    let closed = core.close().await;
    outcome?;
    closed
}

/// What happened to one input line of `append`
#[derive(Debug)]
enum LineOutcome {
    Appended,
    /// The record is in the log but a card usage could not be tracked
    UsageFailed(anyhow::Error),
    Rejected(anyhow::Error),
}

async fn ingest_line(feedback: &FeedbackLoop, line: &str) -> LineOutcome {
    let value = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => value,
        Err(e) => return LineOutcome::Rejected(anyhow::Error::from(e).context("invalid JSON")),
    };
    let record = match OutcomeRecord::from_json(value) {
        Ok(record) => record,
        Err(e) => return LineOutcome::Rejected(e.into()),
    };
    match feedback.record_job(record).await {
        Ok(_) => LineOutcome::Appended,
        Err(e) if e.is_integration() => LineOutcome::UsageFailed(e.into()),
        Err(e) => LineOutcome::Rejected(e.into()),
    }
}

async fn run_command(command: Commands, json: bool, config: &Config, core: &Core) -> Result<()> {
    match command {
        Commands::Append { file } => {
            let input = read_input(file.as_deref()).await?;
            let feedback = FeedbackLoop::new(core.log.clone(), core.usage.clone());
            let (mut appended, mut untracked, mut rejected) = (0, 0, 0);
            for (index, line) in input.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match ingest_line(&feedback, line).await {
                    LineOutcome::Appended => appended += 1,
                    LineOutcome::UsageFailed(e) => {
                        appended += 1;
                        untracked += 1;
                        eprintln!("line {}: appended, usage tracking failed: {:#}", index + 1, e);
                    }
                    LineOutcome::Rejected(e) => {
                        rejected += 1;
                        eprintln!("line {}: {:#}", index + 1, e);
                    }
                }
            }
            core.log.flush().await?;
            core.engine.persist().await;
            println!(
                "Appended {} outcomes ({} with usage tracking failures, {} rejected)",
                appended, untracked, rejected
            );
        }
        Commands::Get { job_id } => match core.log.get(&job_id).await? {
            Some(stored) if json => print_json(&stored)?,
            Some(stored) => {
                let r = &stored.record;
                println!("{} [{}] {}", stored.id, r.status, r.timestamp.format("%Y-%m-%d %H:%M:%S"));
                println!("  Job: {}  Issue: {}  Execution: {}", r.job_id, r.issue_id, r.execution_id);
                println!("  Success: {}  Quality: {:.2}  Duration: {}ms", r.success, r.quality.overall_score, r.metadata.duration);
                println!("  Category: {}  Complexity: {}", r.metadata.category, r.metadata.complexity);
                if !r.metadata.agent_types.is_empty() {
                    println!("  Agents: {}", r.metadata.agent_types.join(", "));
                }
            }
            None => anyhow::bail!("No outcome recorded for job {}", job_id),
        },
        Commands::Query {
            days,
            succeeded,
            failed,
            agents,
            categories,
            complexities,
            min_quality,
            max_duration,
            issues,
            offset,
            limit,
        } => {
            let mut filter = OutcomeFilter::new().page(offset, limit);
            filter.time_range = days_range(days)?;
            filter.success = match (succeeded, failed) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            filter.agent_types = agents;
            filter.categories = categories;
            filter.complexities = complexities;
            filter.min_quality = min_quality;
            filter.max_duration = max_duration;
            filter.issue_ids = issues;

            let results = core.log.query(&filter).await?;
            if json {
                print_json(&results)?;
            } else if results.is_empty() {
                println!("No outcomes match.");
            } else {
                for stored in &results {
                    let r = &stored.record;
                    println!(
                        "{}  {:<10} {:<24} {:<12} q={:.2} {}ms",
                        r.timestamp.format("%Y-%m-%d %H:%M"),
                        r.status,
                        r.job_id,
                        r.metadata.category,
                        r.quality.overall_score,
                        r.metadata.duration
                    );
                }
            }
        }
        Commands::Stats { days } => {
            let stats = core.log.statistics(days_range(days)?).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Outcome Statistics");
                println!("==================");
                println!("Total:        {}", stats.total_outcomes);
                println!("Successful:   {}", stats.successful);
                println!("Failed:       {}", stats.failed);
                println!("Success rate: {:.1}%", stats.success_rate * 100.0);
                println!("Avg duration: {:.0}ms", stats.average_duration);
                println!("Avg quality:  {:.2}", stats.average_quality);
                if !stats.by_category.is_empty() {
                    println!();
                    println!("By category:");
                    for (category, b) in &stats.by_category {
                        println!("  {:<20} {:>5} ({:.0}% success)", category, b.total, b.success_rate() * 100.0);
                    }
                }
                if !stats.by_agent.is_empty() {
                    println!();
                    println!("By agent:");
                    for (agent, b) in &stats.by_agent {
                        println!("  {:<20} {:>5} ({:.0}% success)", agent, b.total, b.success_rate() * 100.0);
                    }
                }
            }
        }
        Commands::Export { format, days } => {
            let path = core.log.export(days_range(days)?, format).await?;
            println!("Exported outcomes to {}", path.display());
        }
        Commands::Cleanup { older_than_days } => {
            let days = match older_than_days {
                Some(days) => days,
                None => match config.outcomes.retention_days {
                    Some(days) => i64::from(days),
                    None => anyhow::bail!("Pass --older-than-days or set outcomes.retentionDays"),
                },
            };
            let removed = core.log.cleanup(days).await?;
            println!("Removed {} outcomes older than {} days", removed, days);
        }
        Commands::Evaluate { card_id } => {
            let evaluation = core.engine.evaluate_card(&card_id).await?;
            core.engine.persist().await;
            if json {
                print_json(&evaluation)?;
            } else {
                println!("Card {}", evaluation.card_id);
                println!("  Effectiveness:   {:.3}", evaluation.current_effectiveness);
                println!("  Promotion score: {:.3}", evaluation.promotion_score);
                println!(
                    "  Usages:          {} ({} recent, {:.0}% success)",
                    evaluation.usage_stats.total_usages,
                    evaluation.usage_stats.recent_usages,
                    evaluation.usage_stats.success_rate * 100.0
                );
                println!(
                    "  Trend:           {} ({:+.3}/use, confidence {:.2})",
                    evaluation.trend.trend, evaluation.trend.change_rate, evaluation.trend.confidence
                );
                println!("  Recommendation:  {}", evaluation.recommendation);
                for reason in &evaluation.reasoning {
                    println!("    - {}", reason);
                }
            }
        }
        Commands::Candidates { kind } => {
            let candidates = core.engine.candidates(kind).await?;
            if json {
                print_json(&candidates)?;
            } else if candidates.is_empty() {
                println!("No candidates.");
            } else {
                for c in &candidates {
                    println!("  {:<24} {:<16} score {:.3}  {}", c.card_id, c.tier, c.score, c.title);
                }
            }
        }
        Commands::RunBatch => {
            let result = core.engine.run_batch().await?;
            if json {
                print_json(&result)?;
            } else {
                println!("Promotion batch complete");
                println!("  Evaluated:  {}", result.total_evaluated);
                println!("  Promoted:   {}", result.promoted_count);
                for change in &result.promoted {
                    println!("    {} {} -> {}", change.card_id, change.from, change.to);
                }
                println!("  Demoted:    {}", result.demoted_count);
                for change in &result.demoted {
                    println!("    {} {} -> {}", change.card_id, change.from, change.to);
                }
                println!("  Retired:    {}", result.retired_count);
                for retired in &result.retired {
                    println!("    {} (archived to {})", retired.card_id, retired.archive_path.display());
                }
                println!("  Maintained: {}", result.maintained_count);
                if !result.failed.is_empty() {
                    println!("  Failed:     {}", result.failed.len());
                    for failure in &result.failed {
                        println!("    {}: {}", failure.card_id, failure.error);
                    }
                }
            }
        }
        Commands::Config { .. } => anyhow::bail!("config commands run without opening the outcome log"),
    }

    Ok(())
}

fn run_config(command: &ConfigCommands, cli_path: &Option<PathBuf>) -> Result<()> {
    let path = config_file(cli_path)?;
    match command {
        ConfigCommands::Show => {
            let config = if path.exists() { Config::load_from(&path)? } else { Config::default() };
            println!("# {}", path.display());
            println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        }
        ConfigCommands::Validate => {
            let config = Config::load_from(&path)?;
            let errors = config.validate();
            if errors.is_empty() {
                println!("Configuration OK: {}", path.display());
            } else {
                for error in &errors {
                    eprintln!("  - {}", error);
                }
                anyhow::bail!("{} configuration problem(s) in {}", errors.len(), path.display());
            }
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read stdin")?;
            Ok(input)
        }
    }
}
