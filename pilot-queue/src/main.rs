//! pilot-queue - Manage the scheduled dispatch queue
//!
//! Unix-style tool for enqueuing content, inspecting and managing the
//! dispatch queue, and driving the worker tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use libpostpilot::config::resolve_db_path;
use libpostpilot::error::{ConfigError, PostPilotError};
use libpostpilot::external::ContentStore;
use libpostpilot::logging::{LogFormat, LoggingConfig};
use libpostpilot::schedule::parse_schedule;
use libpostpilot::store::{IdempotencyStore, JobStore, SqliteStore};
use libpostpilot::trace::{EventBus, TraceSink};
use libpostpilot::transport::{DryRunTransport, Transport};
use libpostpilot::types::{ContentItem, JobStatus, JobSummary, Platform};
use libpostpilot::worker::Scheduler;
use libpostpilot::{Config, Result};

#[derive(Parser, Debug)]
#[command(name = "pilot-queue")]
#[command(version)]
#[command(about = "Manage the scheduled dispatch queue")]
#[command(long_about = "\
pilot-queue - Manage the scheduled dispatch queue

DESCRIPTION:
    pilot-queue is a Unix-style tool for the Postpilot publishing scheduler.
    Use it to enqueue content for a platform, list and manage queued jobs,
    inspect quota usage, and drive the worker tick.

COMMANDS:
    enqueue     Schedule a content item for publishing
    list        List dispatch jobs
    cancel      Cancel a pending job
    reschedule  Move a pending job to a different time
    now         Make a pending job due immediately
    tick        Process due jobs once
    stats       Show quota usage and queue statistics

USAGE EXAMPLES:
    # Enqueue a post for X, due immediately
    pilot-queue enqueue \"Shipping day!\" --platform x

    # Enqueue for Telegram, two hours from now
    pilot-queue enqueue \"Changelog is out\" --platform telegram --at 2h

    # List pending jobs in JSON format
    pilot-queue list --status pending --format json

    # Process due jobs (intended to run on a 60s timer)
    pilot-queue tick

    # View quota usage for one platform
    pilot-queue stats --platform x

CONFIGURATION:
    Configuration file: ~/.config/postpilot/config.toml
    Database location: ~/.local/share/postpilot/postpilot.db

    Override with environment variables:
        POSTPILOT_CONFIG    - Path to config file
        POSTPILOT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Credential error
    3 - Invalid input (bad job ID, time format, state transition, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule a content item for publishing
    Enqueue {
        /// Content body text
        body: String,

        /// Target platform: x, instagram, linkedin, tiktok, facebook, telegram
        #[arg(short, long)]
        platform: String,

        /// Content title
        #[arg(long, default_value = "")]
        title: String,

        /// When to publish (e.g. "2h", "tomorrow 9am"); defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Media reference (required by some platforms)
        #[arg(long)]
        media: Option<String>,
    },

    /// List dispatch jobs
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by status: pending, running, completed, failed, cancelled
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },

    /// Cancel a pending job
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },

    /// Move a pending job to a different time
    Reschedule {
        /// Job ID to reschedule
        job_id: String,

        /// New schedule time (e.g. "tomorrow 3pm", "+2h")
        time: String,
    },

    /// Make a pending job due immediately
    Now {
        /// Job ID to run now
        job_id: String,
    },

    /// Process due jobs once
    Tick,

    /// Show quota usage and queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Limit quota stats to one platform
        #[arg(short, long)]
        platform: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "error" };
    LoggingConfig::new(LogFormat::Text, level.to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Load configuration, falling back to defaults when no file exists yet.
fn load_config() -> Result<Config> {
    let path = libpostpilot::config::resolve_config_path()?;
    if path.exists() {
        Config::load_from_path(&path)
    } else {
        Ok(Config::default_config())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;

    let store = Arc::new(SqliteStore::new(&resolve_db_path(&config)).await?);
    // Wire transports live in the host service; the CLI always drives the
    // pipeline through the dry-run transport.
    let transport: Arc<dyn Transport> = Arc::new(DryRunTransport::new());
    let trace: Arc<dyn TraceSink> = Arc::new(EventBus::new(100));

    let scheduler = Scheduler::new(
        &config,
        store.clone() as Arc<dyn JobStore>,
        store.clone() as Arc<dyn IdempotencyStore>,
        store.clone() as Arc<dyn ContentStore>,
        transport,
        trace,
    );

    match cli.command {
        Commands::Enqueue {
            body,
            platform,
            title,
            at,
            media,
        } => {
            cmd_enqueue(&scheduler, &store, body, &platform, title, at, media).await?;
        }
        Commands::List {
            format,
            status,
            limit,
        } => {
            cmd_list(&scheduler, &format, status.as_deref(), limit).await?;
        }
        Commands::Cancel { job_id } => {
            let job = scheduler.cancel(&job_id).await?;
            println!("Cancelled job {}", job.id);
        }
        Commands::Reschedule { job_id, time } => {
            let run_at = parse_schedule(&time)?.timestamp();
            let job = scheduler.reschedule(&job_id, run_at).await?;
            println!("Rescheduled job {} to {}", job.id, format_timestamp(run_at));
        }
        Commands::Now { job_id } => {
            let job = scheduler.run_now(&job_id).await?;
            println!("Job {} is now due", job.id);
        }
        Commands::Tick => {
            if !config.scheduler.dry_run {
                return Err(ConfigError::InvalidValue(
                    "no live transport configured; enable scheduler.dry_run or run the tick \
                     from the host service"
                        .to_string(),
                )
                .into());
            }
            let report = scheduler.tick().await?;
            println!("processed: {}, errors: {}", report.processed, report.errors);
        }
        Commands::Stats { format, platform } => {
            cmd_stats(&scheduler, &format, platform.as_deref()).await?;
        }
    }

    Ok(())
}

fn parse_platform(input: &str) -> Result<Platform> {
    input
        .parse::<Platform>()
        .map_err(PostPilotError::InvalidInput)
}

async fn cmd_enqueue(
    scheduler: &Scheduler,
    store: &SqliteStore,
    body: String,
    platform: &str,
    title: String,
    at: Option<String>,
    media: Option<String>,
) -> Result<()> {
    let platform = parse_platform(platform)?;
    let run_at = at.as_deref().map(parse_schedule).transpose()?.map(|dt| dt.timestamp());

    let item = ContentItem::new(title, body, media, Utc::now().timestamp());
    store.insert_content(&item).await?;

    let receipt = scheduler.enqueue(&item.id, platform, run_at).await?;
    if receipt.deduplicated {
        println!("Job {} already queued for this intent", receipt.job_id);
    } else {
        println!(
            "Enqueued job {} for {} at {}",
            receipt.job_id,
            platform,
            format_timestamp(run_at.unwrap_or_else(|| Utc::now().timestamp()))
        );
    }
    Ok(())
}

async fn cmd_list(
    scheduler: &Scheduler,
    format: &str,
    status: Option<&str>,
    limit: u32,
) -> Result<()> {
    validate_format(format)?;

    let status = status
        .map(|s| s.parse::<JobStatus>().map_err(PostPilotError::InvalidInput))
        .transpose()?;

    let jobs = scheduler.list_jobs(status, limit).await?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&jobs)
                .map_err(|e| PostPilotError::InvalidInput(e.to_string()))?
        );
    } else {
        output_list_text(&jobs);
    }
    Ok(())
}

fn output_list_text(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        return;
    }

    let now = Utc::now().timestamp();
    for job in jobs {
        println!(
            "{} | {} | {} | {} | {}",
            job.id,
            job.platform,
            job.status,
            format_time_until(now, job.run_at),
            job.last_error.as_deref().unwrap_or("-")
        );
    }
}

async fn cmd_stats(scheduler: &Scheduler, format: &str, platform: Option<&str>) -> Result<()> {
    validate_format(format)?;

    let platforms: Vec<Platform> = match platform {
        Some(p) => vec![parse_platform(p)?],
        None => Platform::ALL.to_vec(),
    };

    let usage: Vec<_> = platforms
        .iter()
        .map(|&p| scheduler.usage_stats(p))
        .collect();
    let queue = scheduler.queue_stats().await?;

    if format == "json" {
        let queue_json: serde_json::Map<String, serde_json::Value> = queue
            .iter()
            .map(|(status, count)| (status.to_string(), serde_json::json!(count)))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "quota": usage,
                "queue": queue_json,
            }))
            .map_err(|e| PostPilotError::InvalidInput(e.to_string()))?
        );
    } else {
        println!("quota usage:");
        for stats in &usage {
            println!(
                "  {:<10} {}/{} used, {} remaining",
                stats.platform.to_string(),
                stats.used,
                stats.limit,
                stats.remaining
            );
        }
        println!("queue:");
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let count = queue.get(&status).copied().unwrap_or(0);
            println!("  {:<10} {}", status.to_string(), count);
        }
    }
    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(PostPilotError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until a run time in human-readable form
fn format_time_until(now: i64, run_at: i64) -> String {
    let diff = run_at - now;

    if diff < 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
