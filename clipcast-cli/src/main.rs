//! Operational surface for the clipcast scheduler.
//!
//! All subcommands operate on a shared state directory. `run` starts the
//! scheduling daemon; the one-shot commands (`enqueue`, `queue`, `history`,
//! `cancel`) are meant to be used when the daemon is not running against the
//! same directory; the system is a single local process with a single
//! persisted state store.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use clipcast::config::SchedulerConfig;
use clipcast::credentials::EnvCredentialProvider;
use clipcast::history::HistoryQuery;
use clipcast::job::builder::JobBuilder;
use clipcast::job::{JobId, JobStatus};
use clipcast::metadata::MetadataSession;
use clipcast::platform::Platform;
use clipcast::retention::{RetentionConfig, RetentionSpec};
use clipcast::store::{FileStore, JobStore};
use clipcast::Clipcast;
use tracing_subscriber::EnvFilter;

mod uploader;

use uploader::CommandUploader;

#[derive(Parser, Debug)]
#[command(
    name = "clipcast",
    version,
    about = "Schedule and publish short clips to social platforms"
)]
struct Cli {
    /// Directory holding the persisted queue and history.
    #[arg(long, default_value = "state", global = true)]
    state_dir: PathBuf,

    #[command(flatten)]
    timing: TimingArgs,

    #[command(subcommand)]
    command: Command,
}

/// Scheduling knobs shared by the daemon and the enqueue command.
#[derive(Args, Debug, Clone)]
struct TimingArgs {
    /// Minimum minutes between two uploads to the same platform.
    #[arg(long, default_value_t = 60, global = true)]
    min_upload_delay_minutes: i64,

    /// Minutes between platforms whose uploads would land together.
    #[arg(long, default_value_t = 5, global = true)]
    stagger_delay_minutes: i64,

    /// Total dispatch attempts before a job is abandoned.
    #[arg(long, default_value_t = 3, global = true)]
    max_retries: u16,

    /// First retry delay in minutes after a transient failure.
    #[arg(long, default_value_t = 15, global = true)]
    base_retry_delay_minutes: i64,
}

impl TimingArgs {
    fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_min_upload_delay(TimeDelta::minutes(self.min_upload_delay_minutes))
            .with_stagger_delay(TimeDelta::minutes(self.stagger_delay_minutes))
            .with_max_retries(self.max_retries)
            .with_base_retry_delay(TimeDelta::minutes(self.base_retry_delay_minutes))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduling daemon until interrupted.
    Run(RunArgs),
    /// Queue one clip for publication.
    Enqueue(EnqueueArgs),
    /// List the live queue.
    Queue {
        /// Only show jobs for this platform.
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// List terminal outcomes, newest first.
    History {
        /// Only show entries for this platform.
        #[arg(long)]
        platform: Option<Platform>,
        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only show entries finished before this RFC 3339 timestamp.
        #[arg(long)]
        before: Option<DateTime<Utc>>,
    },
    /// Cancel a queued or retrying job. Jobs already dispatched run to
    /// completion.
    Cancel {
        /// The numeric job id, as shown by `queue`.
        id: i64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Uploader command per platform, e.g.
    /// `--uploader instagram="upload-reel {clip} {caption}"`.
    /// May be given once per platform.
    #[arg(long = "uploader", value_name = "PLATFORM=COMMAND")]
    uploaders: Vec<String>,

    /// Scheduler tick interval in seconds.
    #[arg(long, default_value_t = 30)]
    tick_interval_seconds: u64,

    /// Abort upload attempts running longer than this many minutes.
    #[arg(long)]
    upload_timeout_minutes: Option<u64>,

    /// Prune succeeded history entries older than this many days, nightly.
    #[arg(long)]
    prune_succeeded_after_days: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let store = FileStore::open(&cli.state_dir)
        .with_context(|| format!("failed to open state directory {}", cli.state_dir.display()))?;
    let config = cli.timing.to_config();

    match cli.command {
        Command::Run(args) => run(store, config, args).await,
        Command::Enqueue(args) => enqueue(store, config, args).await,
        Command::Queue { platform } => queue(store, platform).await,
        Command::History {
            platform,
            limit,
            before,
        } => history(store, platform, limit, before).await,
        Command::Cancel { id } => cancel(store, id).await,
    }
}

async fn run(store: FileStore, config: SchedulerConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = config
        .with_tick_interval(std::time::Duration::from_secs(args.tick_interval_seconds))
        .with_upload_timeout(
            args.upload_timeout_minutes
                .map(|minutes| std::time::Duration::from_secs(minutes * 60)),
        );

    let mut clipcast =
        Clipcast::new(store, EnvCredentialProvider::default()).with_config(config);
    for spec in &args.uploaders {
        let (platform, uploader) = CommandUploader::parse_spec(spec)?;
        clipcast = clipcast.with_uploader(platform, uploader);
    }
    if let Some(days) = args.prune_succeeded_after_days {
        // Nightly, at 03:00.
        let schedule = cron::Schedule::from_str("0 0 3 * * *").expect("valid cron expression");
        clipcast = clipcast.with_history_retention(RetentionConfig::new(schedule).with_policy(
            RetentionSpec::max_age(TimeDelta::days(days), JobStatus::Succeeded),
        ));
    }

    let handle = clipcast.spawn().await?;
    tracing::info!("Scheduler running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping, waiting for in-flight uploads to finish");
    handle.graceful_shutdown().await?;
    Ok(())
}

#[derive(Args, Debug)]
struct EnqueueArgs {
    /// Target platform.
    #[arg(long)]
    platform: Platform,

    /// Path to the clip file.
    #[arg(long)]
    clip: PathBuf,

    /// Caption text.
    #[arg(long, default_value = "")]
    caption: String,

    /// Hashtag, may be given multiple times.
    #[arg(long = "hashtag")]
    hashtags: Vec<String>,

    /// Earliest dispatch time (RFC 3339); defaults to now. The effective
    /// slot also honors the platform's minimum delay and stagger.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

async fn enqueue(store: FileStore, config: SchedulerConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    // The session dedupes hashtags and caps them at the platform's limit.
    let metadata = MetadataSession::new().compose(args.caption, args.hashtags, args.platform);
    let mut builder = JobBuilder::new(args.platform, args.clip).with_metadata(metadata);
    if let Some(at) = args.at {
        builder = builder.request_at(at);
    }
    let job = builder.enqueue_to(&store, &config).await?;
    println!(
        "queued {} for {} at {}",
        job.id,
        job.platform,
        job.scheduled_at.to_rfc3339()
    );
    Ok(())
}

async fn queue(store: FileStore, platform: Option<Platform>) -> anyhow::Result<()> {
    let jobs = store.queue(platform).await?;
    if jobs.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for job in jobs {
        let note = match job.last_error() {
            Some(error) => format!("  last error: {}", error.detail),
            None => String::new(),
        };
        println!(
            "{:>8}  {:<9}  {:<11}  attempt {}/{}  {}  {}{note}",
            i64::from(job.id),
            job.platform.to_string(),
            format!("{:?}", job.status),
            job.attempt,
            job.max_attempts,
            job.scheduled_at.to_rfc3339(),
            job.clip_path.display(),
        );
    }
    Ok(())
}

async fn history(
    store: FileStore,
    platform: Option<Platform>,
    limit: usize,
    before: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let mut query = HistoryQuery::new().with_limit(limit);
    if let Some(platform) = platform {
        query = query.for_platform(platform);
    }
    if let Some(before) = before {
        query = query.before(before);
    }
    let entries = store.history(query).await?;
    if entries.is_empty() {
        println!("no history");
        return Ok(());
    }
    for entry in entries {
        let note = match entry.last_error() {
            Some(error) => format!("  {}: {}", format!("{:?}", error.kind).to_lowercase(), error.detail),
            None => String::new(),
        };
        println!(
            "{:>8}  {:<9}  {:<9}  {}  {}{note}",
            i64::from(entry.job_id),
            entry.platform.to_string(),
            format!("{:?}", entry.status),
            entry.finished_at.to_rfc3339(),
            entry.clip_path.display(),
        );
    }
    Ok(())
}

async fn cancel(store: FileStore, id: i64) -> anyhow::Result<()> {
    let job = store.cancel(JobId::from(id)).await?;
    println!("cancelled {} ({} -> {})", job.id, job.clip_path.display(), job.platform);
    Ok(())
}
