//! CLI interface for build-sentinel

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classifier::{ClassificationReport, ErrorClassifier};
use crate::config::{self, Config};
use crate::feedback::{metadata, AttributionStore, OutcomeFeedbackLoop};
use crate::learning::{LearningStore, PatternRecord};
use crate::locator::{FaultLocator, GitOracle, LocatorReport};
use crate::types::FixOutcome;

#[derive(Parser)]
#[command(name = "build-sentinel")]
#[command(about = "Build failure triage with learned fix confidence and regression bisection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true, env = "BUILD_SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every error in a build log
    Classify {
        /// Build log file, or '-' for stdin
        log: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify a build log and locate the faulty commit concurrently
    Triage {
        /// Build log file, or '-' for stdin
        log: PathBuf,
        /// Known good commit (skips the linear history search)
        #[arg(long)]
        good: Option<String>,
        /// Only classify
        #[arg(long)]
        no_locate: bool,
    },
    /// Find the commit that broke the build
    Locate {
        /// Known good commit (skips the linear history search)
        #[arg(long)]
        good: Option<String>,
    },
    /// Inspect and manage the learning store
    Learning {
        #[command(subcommand)]
        command: LearningCommands,
    },
    /// Register an automated fix PR and the categories it addresses
    Track {
        /// PR number
        #[arg(long)]
        pr: u64,
        /// Attributed category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// PR body containing a LEARNING_METADATA marker
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// PR title
        #[arg(long)]
        title: Option<String>,
    },
    /// Record a PR outcome by hand
    #[command(group(ArgGroup::new("result").required(true).args(["merged", "closed"])))]
    Outcome {
        /// PR number
        #[arg(long)]
        pr: u64,
        /// PR was merged
        #[arg(long)]
        merged: bool,
        /// PR was closed without merging
        #[arg(long)]
        closed: bool,
    },
    /// List tracked PRs
    Prs {
        /// Filter: pending, success, failure
        #[arg(long)]
        outcome: Option<String>,
    },
    /// Start the webhook server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },
    /// Show or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Overwrite the configuration file with defaults
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum LearningCommands {
    /// Show learning statistics
    Stats,
    /// List every tracked category
    Patterns,
    /// List promoted categories
    Promoted,
    /// Show categories matching a substring
    Show {
        /// Category substring
        query: String,
    },
    /// Show recent promotions and demotions
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Promote a category that currently qualifies
    Promote {
        category: String,
    },
    /// Demote a promoted category that currently qualifies
    Demote {
        category: String,
    },
    /// Delete all learned state
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

/// Loaded configuration plus lazily opened stores
struct App {
    config: Config,
    config_path: PathBuf,
}

impl App {
    fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => config::config_path()?,
        };
        let config = Config::load_from(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    fn store(&self) -> Result<Arc<LearningStore>> {
        let path = self.config.learning.resolved_db_path()?;
        let store = LearningStore::open(&path, self.config.learning.thresholds())
            .with_context(|| format!("Failed to open learning store {}", path.display()))?;
        Ok(Arc::new(store))
    }

    fn classifier(&self) -> Result<ErrorClassifier> {
        let classifier = if self.config.learning.enabled {
            ErrorClassifier::new(self.store()?)
        } else {
            ErrorClassifier::rules_only()
        };
        Ok(classifier.with_high_threshold(self.config.classifier.high_confidence_threshold))
    }

    async fn attributions(&self) -> Result<Arc<AttributionStore>> {
        let path = self.config.feedback.resolved_attribution_db()?;
        let store = AttributionStore::open(&path)
            .await
            .with_context(|| format!("Failed to open attribution database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    async fn feedback_loop(&self) -> Result<Arc<OutcomeFeedbackLoop>> {
        Ok(Arc::new(OutcomeFeedbackLoop::new(
            self.store()?,
            self.attributions().await?,
        )))
    }

    async fn locator(&self) -> Result<Arc<FaultLocator>> {
        let oracle = GitOracle::new(self.config.locator.oracle_config());
        let lock_path = oracle.lock_path().await.with_context(|| {
            format!(
                "{} is not a git repository",
                self.config.locator.repo_dir.display()
            )
        })?;
        let locator = FaultLocator::new(Arc::new(oracle), self.config.locator.settings())
            .with_lock_file(lock_path);
        Ok(Arc::new(locator))
    }
}

fn read_log(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read build log from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build log {}", path.display()))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &ClassificationReport) {
    println!(
        "{} error(s): {} high confidence, {} low confidence",
        report.total(),
        report.high.len(),
        report.low.len()
    );
    for (label, errors) in [("AUTO-FIX", &report.high), ("REVIEW", &report.low)] {
        for e in errors {
            let location = match (&e.file, e.line) {
                (Some(f), Some(l)) => format!("{}:{}", f, l),
                _ => "-".to_string(),
            };
            println!(
                "  [{:<8}] {} {:<24} {:.2} {:<12} {}",
                label,
                e.fingerprint,
                e.classification.category,
                e.classification.confidence,
                e.classification.tier.to_string(),
                location
            );
        }
    }
}

fn print_records(records: &[PatternRecord]) {
    if records.is_empty() {
        println!("No patterns recorded.");
        return;
    }
    println!(
        "{:<28} {:<13} {:>8} {:>8} {:>8} {:>7}",
        "CATEGORY", "TIER", "ATTEMPTS", "SUCCESS", "FAILURE", "RATE"
    );
    for r in records {
        println!(
            "{:<28} {:<13} {:>8} {:>8} {:>8} {:>6.0}%",
            r.category,
            r.confidence_tier.to_string(),
            r.total_attempts,
            r.success_count,
            r.failure_count,
            r.success_rate() * 100.0
        );
    }
}

fn print_record_detail(r: &PatternRecord) {
    println!("{}", r.category);
    println!("  tier:                  {}", r.confidence_tier);
    println!("  promoted:              {}", r.promoted);
    if let Some(at) = r.promoted_at {
        println!("  promoted at:           {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  attempts:              {}", r.total_attempts);
    println!("  successes / failures:  {} / {}", r.success_count, r.failure_count);
    println!("  streak (succ / fail):  {} / {}", r.consecutive_successes, r.consecutive_failures);
    println!("  last updated:          {}", r.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
}

fn print_locator_report(report: &LocatorReport) {
    match &report.faulty_commit {
        Some(commit) => {
            println!("Faulty commit: {}", commit);
            println!("Verified:      {}", if report.verified { "yes" } else { "no (parent does not build)" });
        }
        None => {
            println!(
                "Fault analysis inconclusive: {}",
                report.error.as_deref().unwrap_or("unknown reason")
            );
        }
    }
    if let Some(good) = &report.good_revision {
        println!("Last good:     {}", good);
    }
    println!("Oracle calls:  {}", report.oracle_calls);
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let app = App::load(cli.config)?;

    match cli.command {
        Commands::Classify { log, json } => {
            let text = read_log(&log)?;
            let report = app.classifier()?.classify_output(&text);
            if json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }

        Commands::Triage {
            log,
            good,
            no_locate,
        } => {
            let text = read_log(&log)?;
            let task = if no_locate {
                None
            } else {
                Some(app.locator().await?.spawn(good))
            };

            let classification = app.classifier()?.classify_output(&text);
            let fault_analysis = match task {
                Some(task) => Some(task.join().await?),
                None => None,
            };

            print_json(&serde_json::json!({
                "classification": classification,
                "lowConfidenceCategories": classification.low_categories(),
                "faultAnalysis": fault_analysis,
            }))?;
        }

        Commands::Locate { good } => {
            let locator = app.locator().await?;
            let report = match good {
                Some(good) => locator.run_from(&good).await?,
                None => locator.run().await?,
            };
            if cli.verbose > 0 {
                print_locator_report(&report);
            }
            print_json(&report)?;
        }

        Commands::Learning { command } => {
            let store = app.store()?;
            match command {
                LearningCommands::Stats => {
                    let stats = store.stats()?;
                    println!("Learning Statistics");
                    println!("===================");
                    println!("Patterns tracked: {}", stats.total_patterns);
                    println!("Promoted now:     {}", stats.promoted_patterns);
                    println!("Total attempts:   {}", stats.total_attempts);
                    println!("Success rate:     {:.1}%", stats.success_rate * 100.0);
                    println!("Promotions:       {}", stats.promoted_count);
                    println!("Demotions:        {}", stats.demoted_count);
                    println!("Last updated:     {}", stats.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
                    println!();
                    println!("Store: {} (format {})", stats.location, stats.version);
                }
                LearningCommands::Patterns => print_records(&store.records()?),
                LearningCommands::Promoted => print_records(&store.promoted()?),
                LearningCommands::Show { query } => {
                    let matches = store.find(&query)?;
                    if matches.is_empty() {
                        println!("No categories match '{}'", query);
                    }
                    for r in &matches {
                        print_record_detail(r);
                    }
                }
                LearningCommands::History { limit } => {
                    let events = store.history(limit)?;
                    if events.is_empty() {
                        println!("No history yet.");
                    }
                    for e in events {
                        println!(
                            "{}  {:<8} {:<28} {} ok / {} failed",
                            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            e.action.to_string(),
                            e.category.as_deref().unwrap_or("-"),
                            e.success_count,
                            e.failure_count
                        );
                    }
                }
                LearningCommands::Promote { category } => {
                    if store.get(&category)?.is_none() {
                        bail!("Unknown category: {}", category);
                    }
                    if !store.check_promotion(&category)? {
                        bail!("{} does not meet the promotion thresholds", category);
                    }
                    store.promote(&category)?;
                    println!("Promoted {} to LEARNED_HIGH", category);
                }
                LearningCommands::Demote { category } => {
                    if store.get(&category)?.is_none() {
                        bail!("Unknown category: {}", category);
                    }
                    if !store.check_demotion(&category)? {
                        bail!("{} does not meet the demotion thresholds", category);
                    }
                    store.demote(&category)?;
                    println!("Demoted {}", category);
                }
                LearningCommands::Reset { yes } => {
                    if !yes {
                        bail!("Refusing to reset without --yes");
                    }
                    store.reset()?;
                    println!("Learning store reset: {}", store.location());
                }
            }
        }

        Commands::Track {
            pr,
            mut categories,
            body_file,
            title,
        } => {
            if let Some(path) = body_file {
                let body = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read PR body {}", path.display()))?;
                match metadata::extract(&body) {
                    Some(meta) => categories.extend(meta.root_causes),
                    None => tracing::warn!(path = %path.display(), "No learning metadata in PR body"),
                }
            }
            categories.sort();
            categories.dedup();
            if categories.is_empty() {
                bail!("No categories given (use --category or a --body-file with metadata)");
            }

            let record = app
                .attributions()
                .await?
                .track(pr, &categories, title.as_deref())
                .await?;
            println!(
                "Tracking PR #{} ({}): {}",
                record.pr_id,
                record.outcome,
                record.categories.join(", ")
            );
        }

        Commands::Outcome { pr, merged, closed } => {
            debug_assert_ne!(merged, closed);
            let report = app.feedback_loop().await?.handle_terminal_event(pr, merged).await?;
            print_json(&report)?;
        }

        Commands::Prs { outcome } => {
            let filter = match outcome {
                Some(s) => Some(FixOutcome::parse(&s).with_context(|| format!("Unknown outcome '{}'", s))?),
                None => None,
            };
            let prs = app.attributions().await?.list(filter).await?;
            if prs.is_empty() {
                println!("No tracked PRs.");
            }
            for p in prs {
                println!(
                    "#{:<6} {:<8} {}  {}",
                    p.pr_id,
                    p.outcome.to_string(),
                    p.created_at.format("%Y-%m-%d"),
                    p.categories.join(", ")
                );
            }
        }

        Commands::Serve { port, host } => {
            let state = crate::server::ServerState::new(
                app.feedback_loop().await?,
                app.config.server.webhook_secret.clone(),
                app.config.feedback.title_markers.clone(),
            );
            let host = host.unwrap_or_else(|| app.config.server.host.clone());
            let port = port.unwrap_or(app.config.server.port);
            crate::server::start(&host, port, state).await?;
        }

        Commands::Config { show, reset } => {
            if reset {
                Config::default().save_to(&app.config_path)?;
                println!("Configuration reset: {}", app.config_path.display());
            }
            if show || !reset {
                let config = Config::load_from(&app.config_path)?;
                config::show_config(&config, &app.config_path)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_outcome_requires_exactly_one_result() {
        assert!(Cli::try_parse_from(["build-sentinel", "outcome", "--pr", "4"]).is_err());
        assert!(
            Cli::try_parse_from(["build-sentinel", "outcome", "--pr", "4", "--merged", "--closed"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["build-sentinel", "outcome", "--pr", "4", "--closed"]).is_ok());
    }

    #[test]
    fn test_track_accepts_repeated_categories() {
        let cli = Cli::try_parse_from([
            "build-sentinel",
            "track",
            "--pr",
            "9",
            "--category",
            "risky:security",
            "--category",
            "unknown",
        ])
        .unwrap();
        match cli.command {
            Commands::Track { categories, .. } => assert_eq!(categories.len(), 2),
            _ => panic!("expected track"),
        }
    }
}
