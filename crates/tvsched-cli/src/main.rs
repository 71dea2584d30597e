use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};
use tvsched_sync::{build_scheduler, RefreshOutcome, RetentionPeriod, ScheduleJobs, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "tvsched-cli")]
#[command(about = "TV schedule feed synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upsert every channel the feed reports.
    Channels,
    /// Reconcile one date (default: today).
    Day {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Update channels, then crawl forward until the feed runs dry.
    Crawl {
        #[arg(long)]
        from: Option<NaiveDate>,
    },
    /// Queue aged-out listings and drain the prune queue.
    Prune {
        #[arg(long)]
        max_age: Option<RetentionPeriod>,
    },
    /// Re-read one stored listing from the feed.
    Refresh {
        #[arg(long)]
        cid: String,
    },
    /// Print a feed listing as JSON.
    Lookup {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        cid: String,
    },
    ScheduleChannels,
    Status,
    /// Run the cron scheduler until interrupted.
    Serve,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let jobs = ScheduleJobs::from_config(&config).await?;
    let today = Local::now().date_naive();

    match cli.command.unwrap_or(Commands::Day { date: None }) {
        Commands::Channels => {
            let report = jobs.run_channel_update().await?;
            println!(
                "channels updated: fetched={} updated={} failed={}",
                report.fetched, report.updated, report.failed
            );
        }
        Commands::Day { date } => {
            let report = jobs.run_day_update(date.unwrap_or(today)).await?;
            println!(
                "day sync complete: date={} updated={} upserted={} failed={} removed={} skipped_channels={}",
                report.date,
                report.updated,
                report.listings_upserted,
                report.listings_failed,
                report.listings_removed,
                report.channels_skipped
            );
        }
        Commands::Crawl { from } => {
            let report = jobs.run_full_update(from.unwrap_or(today)).await?;
            println!(
                "crawl complete: start={} days={} updated_days={} upserted={} removed={} channels={}",
                report.crawl.start,
                report.crawl.days.len(),
                report.crawl.days_updated(),
                report.crawl.listings_upserted(),
                report.crawl.listings_removed(),
                report.channels.updated
            );
        }
        Commands::Prune { max_age } => {
            let report = jobs.run_prune(max_age).await?;
            println!(
                "prune complete: cutoff={} matched={} batches={} deleted={}",
                report.queued.cutoff,
                report.queued.matched,
                report.queued.batches_queued,
                report.drained.deleted
            );
        }
        Commands::Refresh { cid } => match jobs.refresh(&cid).await? {
            RefreshOutcome::Refreshed(item) => {
                println!(
                    "refreshed {}: {} {}..{}",
                    item.cid, item.title, item.start_time, item.end_time
                );
            }
            RefreshOutcome::GoneUpstream(item) => {
                println!("{} is no longer in the feed for its day", item.cid);
            }
            RefreshOutcome::NotStored => {
                println!("no stored listing with cid {cid}");
            }
        },
        Commands::Lookup { date, cid } => {
            let found = jobs.listings().get_listing(date, &cid).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&found).context("serializing listing")?
            );
        }
        Commands::ScheduleChannels => {
            let channels = jobs.listings().channels().schedule_channels().await?;
            let default = jobs.listings().channels().default_schedule_channel().await?;
            for channel in channels {
                let marker = if default.as_ref().map(|d| d.id) == Some(channel.id) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {:>4} {:<12} {} ({})",
                    channel.weight,
                    channel.cid,
                    channel.name,
                    channel.timezone_name().unwrap_or("no timezone")
                );
            }
        }
        Commands::Status => {
            let status = jobs.status().await?;
            println!(
                "last_prune={} last_day_update={} last_full_update={} pending_prune_batches={} overdue={:?}",
                status.last_prune,
                status.last_day_update,
                status.last_full_update,
                status.pending_prune_batches,
                status.overdue
            );
        }
        Commands::Serve => {
            let jobs = Arc::new(jobs);
            let Some(mut sched) = build_scheduler(Arc::clone(&jobs), &config).await? else {
                anyhow::bail!("scheduler disabled; set TVSCHED_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
