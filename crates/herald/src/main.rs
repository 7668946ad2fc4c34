//! Herald: scheduled publishing of site articles to a social channel.
//!
//! Main binary with subcommands:
//! - `daemon`: scheduler tick loop plus periodic reconciliation
//! - `publish`, `delete`: one-off operations on a single item
//! - `check`, `status`: read-only inspection
//! - `sync`: one reconciliation sweep
//! - `import`, `configure`: maintain the state file

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald_scheduler::{
    CandidateSelector, ContentItem, ContentRepository, JsonFileStore, SchedulerConfigStore,
    TierPolicy,
};

mod app;
mod daemon;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

/// Resolve the local offset: explicit minutes east of UTC, or the host's.
fn local_offset(minutes: Option<i32>) -> Result<FixedOffset> {
    match minutes {
        Some(minutes) => FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| miette::miette!("UTC offset out of range: {} minutes", minutes)),
        None => Ok(chrono::Local::now().offset().fix()),
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herald")
        .join("state.json")
}

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Scheduled article publishing to a social channel", long_about = None)]
struct Cli {
    /// JSON state file holding items and scheduler configuration
    #[arg(long, env = "HERALD_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// Local time as minutes east of UTC (defaults to the host offset)
    #[arg(long, env = "HERALD_UTC_OFFSET_MINUTES", global = true, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,

    /// JSON tier policy replacing the built-in one
    #[arg(long, env = "HERALD_POLICY_FILE", global = true)]
    policy_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Platform and publishing settings shared by the commands that post.
#[derive(Args, Clone)]
pub struct ChannelArgs {
    /// Platform API base URL
    #[arg(long, env = "HERALD_API_URL", default_value = "https://graph.facebook.com/v19.0")]
    pub api_url: String,

    /// Channel to publish to
    #[arg(long, env = "HERALD_CHANNEL_ID")]
    pub channel_id: String,

    /// Operator access token
    #[arg(long, env = "HERALD_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Reject credentials issued to a different app
    #[arg(long, env = "HERALD_APP_ID")]
    pub app_id: Option<String>,

    /// Public site URL used for article links and relative image paths
    #[arg(long, env = "HERALD_SITE_URL")]
    pub site_url: String,

    /// Directory where composed covers are cached
    #[arg(long, env = "HERALD_COVER_DIR")]
    pub cover_dir: Option<PathBuf>,

    /// Image posted when no other image can be obtained
    #[arg(long, env = "HERALD_FALLBACK_IMAGE")]
    pub fallback_image: Option<PathBuf>,

    /// TrueType font for composed covers (composition is off without one)
    #[arg(long, env = "HERALD_FONT")]
    pub font: Option<PathBuf>,

    /// Text drawn on composed covers
    #[arg(long, env = "HERALD_WATERMARK")]
    pub watermark: Option<String>,

    /// Add a comment linking back to the article
    #[arg(long, env = "HERALD_COMMENTS", value_parser = parse_bool_env, action = clap::ArgAction::Set, default_value = "true")]
    pub comments: bool,

    /// Mirror each post as a story
    #[arg(long, env = "HERALD_STORIES", value_parser = parse_bool_env, action = clap::ArgAction::Set, default_value = "true")]
    pub stories: bool,

    /// Per-step timeout for the publishing pipeline, in seconds
    #[arg(long, default_value = "30")]
    pub step_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the reconciliation loop until interrupted
    Daemon {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Scheduler tick interval in seconds (clamped to 60..=120)
        #[arg(long, default_value = "90")]
        tick_secs: u64,

        /// Reconciliation interval in seconds
        #[arg(long, default_value = "21600")]
        sync_interval_secs: u64,
    },

    /// Publish one item now, bypassing the gate
    Publish {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Item id
        #[arg(long)]
        item: String,

        /// Publish even when today's post limit is used up
        #[arg(long)]
        force: bool,
    },

    /// Delete an item's post upstream and mark it deleted
    Delete {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Item id
        #[arg(long)]
        item: String,
    },

    /// Run one reconciliation sweep
    Sync {
        #[command(flatten)]
        channel: ChannelArgs,
    },

    /// Show whether an item is eligible and through which tier
    Check {
        /// Item id
        #[arg(long)]
        item: String,
    },

    /// Show the gate, today's count and per-status totals
    Status,

    /// Add or refresh items from a JSON array of content items
    Import {
        /// JSON file to import
        #[arg(long)]
        file: PathBuf,
    },

    /// Change the persisted scheduler configuration
    Configure {
        #[arg(long, value_parser = parse_bool_env)]
        enabled: Option<bool>,

        /// Minimum minutes between two publications
        #[arg(long)]
        interval_minutes: Option<u32>,

        /// First local hour of the publishing window
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        window_start: Option<u32>,

        /// Local hour at which the window closes
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        window_end: Option<u32>,

        /// Daily cap, 0 for none
        #[arg(long)]
        max_per_day: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "herald=info,herald_scheduler=info,herald_platform=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let offset = local_offset(cli.utc_offset_minutes)?;
    let state_file = cli.state_file.clone().unwrap_or_else(default_state_file);
    let policy = load_policy(cli.policy_file.as_deref())?;

    match cli.command {
        Commands::Daemon {
            channel,
            tick_secs,
            sync_interval_secs,
        } => {
            daemon::run(daemon::DaemonConfig {
                state_file,
                offset,
                policy,
                channel,
                tick_secs,
                sync_interval_secs,
            })
            .await?;
        }
        Commands::Publish {
            channel,
            item,
            force,
        } => {
            let app = app::App::build(&state_file, offset, policy, &channel)?;
            let outcome = app
                .publisher
                .publish_on_demand(&item, &app.gate, force, Utc::now())
                .await
                .map_err(|e| miette::miette!("failed to publish {}: {}", item, e))?;
            print_json(&outcome)?;
        }
        Commands::Delete { channel, item } => {
            let app = app::App::build(&state_file, offset, policy, &channel)?;
            let state = app
                .publisher
                .delete_item(&item)
                .await
                .map_err(|e| miette::miette!("failed to delete {}: {}", item, e))?;
            print_json(&state)?;
        }
        Commands::Sync { channel } => {
            let app = app::App::build(&state_file, offset, policy, &channel)?;
            let report = app
                .reconciler()
                .sweep()
                .await
                .map_err(|e| miette::miette!("sync failed: {}", e))?;
            print_json(&report)?;
        }
        Commands::Check { item } => {
            let store = open_store(&state_file)?;
            run_check(&store, CandidateSelector::new(policy, offset), &item).await?;
        }
        Commands::Status => {
            let store = open_store(&state_file)?;
            let report = app::status(store, offset, policy).await?;
            print_json(&report)?;
        }
        Commands::Import { file } => {
            let store = open_store(&state_file)?;
            run_import(&store, &file).await?;
        }
        Commands::Configure {
            enabled,
            interval_minutes,
            window_start,
            window_end,
            max_per_day,
        } => {
            let store = open_store(&state_file)?;
            let mut config = store
                .load_config()
                .await
                .map_err(|e| miette::miette!("failed to read configuration: {}", e))?;
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(minutes) = interval_minutes {
                config.interval_minutes = minutes;
            }
            if let Some(hour) = window_start {
                config.window_start_hour = hour;
            }
            if let Some(hour) = window_end {
                config.window_end_hour = hour;
            }
            if let Some(max) = max_per_day {
                config.max_per_day = max;
            }
            store
                .set_config(config.clone())
                .await
                .map_err(|e| miette::miette!("failed to save configuration: {}", e))?;
            print_json(&config)?;
        }
    }

    Ok(())
}

fn load_policy(path: Option<&Path>) -> Result<TierPolicy> {
    match path {
        Some(path) => TierPolicy::from_json_file(path).map_err(|e| miette::miette!("{}", e)),
        None => Ok(TierPolicy::default()),
    }
}

fn open_store(path: &Path) -> Result<JsonFileStore> {
    JsonFileStore::open(path)
        .map_err(|e| miette::miette!("failed to open state file {}: {}", path.display(), e))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| miette::miette!("failed to render output: {}", e))?;
    println!("{}", text);
    Ok(())
}

async fn run_check(store: &JsonFileStore, selector: CandidateSelector, item_id: &str) -> Result<()> {
    let item = store
        .find_by_id(item_id)
        .await
        .map_err(|e| miette::miette!("{}", e))?
        .ok_or_else(|| miette::miette!("no item with id {}", item_id))?;
    let now = Utc::now();
    print_json(&serde_json::json!({
        "item_id": item.id,
        "eligible": selector.is_eligible(&item, now),
        "tier": selector.tier_of(&item, now),
        "channel_status": item.channel_status().as_str(),
    }))
}

async fn run_import(store: &JsonFileStore, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| miette::miette!("failed to read {}: {}", file.display(), e))?;
    let items: Vec<ContentItem> = serde_json::from_str(&text)
        .map_err(|e| miette::miette!("invalid item list in {}: {}", file.display(), e))?;
    let total = items.len();
    let added = store
        .import_items(items)
        .await
        .map_err(|e| miette::miette!("failed to import: {}", e))?;
    tracing::info!(total, added, "imported items");
    Ok(())
}
