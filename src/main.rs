//! # linkrelay CLI
//!
//! Runs one share link through the full pipeline: resolve, download with
//! aria2, split with ffmpeg when needed, relay into a Telegram chat.

use anyhow::{bail, Context};
use clap::Parser;
use linkrelay::{
    validate_share_url, BotApiConfig, BotApiRelay, DownloadCoordinator, EngineConfig, Ffmpeg, FfmpegConfig,
    Pipeline, PipelineConfig, RelayUploader, ResolverClient, ResolverConfig, RetryPolicy, SegmentSplitter,
};
use log::error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

/// Command-line interface for linkrelay
#[derive(Parser, Debug)]
#[command(name = "linkrelay")]
#[command(about = "Relay files behind share links into a Telegram chat")]
#[command(long_about = "Resolves a share link, downloads it through aria2 and relays it to a chat:
  linkrelay https://terabox.com/s/1abc                 # Relay to $DUMP_CHAT_ID
  linkrelay https://terabox.com/s/1abc --dry-run       # Only resolve the link
  linkrelay --stats                                    # Show aria2 engine counters

Files above the Bot API limit are split into parts with ffmpeg. Configure a
local Bot API server with --large-bot-token/--large-api-base to raise the
limit to 4 GB.")]
#[command(version = env!("LINKRELAY_VERSION"))]
struct Cli {
    /// Share link to relay
    #[arg(required_unless_present = "stats")]
    share_url: Option<String>,

    /// Bot API token used for uploads
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Chat that receives the files
    #[arg(long, env = "DUMP_CHAT_ID", allow_hyphen_values = true)]
    chat_id: Option<i64>,

    /// Id of the user on whose behalf the link is relayed
    #[arg(long, default_value_t = 0)]
    requester: i64,

    /// Bot API server root
    #[arg(long, env = "BOT_API_BASE", default_value = "https://api.telegram.org")]
    api_base: String,

    /// Token for a large-file relay (local Bot API server)
    #[arg(long, env = "LARGE_BOT_TOKEN", hide_env_values = true)]
    large_bot_token: Option<String>,

    /// Root of the large-file relay server
    #[arg(long, env = "LARGE_API_BASE", default_value = "http://localhost:8081")]
    large_api_base: String,

    /// aria2 JSON-RPC endpoint
    #[arg(long, env = "ARIA2_RPC_URL", default_value = "http://localhost:6800/jsonrpc")]
    aria2_rpc_url: String,

    /// aria2 RPC secret
    #[arg(long, env = "ARIA2_SECRET", hide_env_values = true)]
    aria2_secret: Option<String>,

    /// Resolver endpoints in priority order (comma separated)
    #[arg(long = "resolver", env = "RESOLVER_ENDPOINTS", value_delimiter = ',')]
    resolvers: Vec<String>,

    /// Working directory for downloads
    #[arg(long, env = "DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Minimum seconds between two progress updates
    #[arg(long, default_value_t = 5)]
    progress_interval: u64,

    /// Path of the ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Path of the ffprobe binary
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Resolve the link and show what would be relayed, without downloading
    #[arg(long)]
    dry_run: bool,

    /// Print aria2 engine counters and exit
    #[arg(long)]
    stats: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn resolver_config(&self) -> ResolverConfig {
        let mut config = ResolverConfig::default();
        let endpoints: Vec<String> = self
            .resolvers
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if !endpoints.is_empty() {
            config.endpoints = endpoints;
        }
        config
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rpc_url: self.aria2_rpc_url.clone(),
            secret: self.aria2_secret.clone().filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    fn uploader(&self, bot_token: &str) -> RelayUploader<BotApiRelay> {
        let primary = BotApiRelay::new(BotApiConfig {
            api_base: self.api_base.clone(),
            ..BotApiConfig::new(bot_token)
        });
        let large = self
            .large_bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|token| BotApiRelay::new(BotApiConfig::large(self.large_api_base.clone(), token)));
        RelayUploader::new(primary, large, RetryPolicy::default())
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("📦 linkrelay v{} starting...", env!("LINKRELAY_VERSION"));
    }

    if cli.stats {
        let stats = linkrelay::engine_stats(cli.engine_config())
            .await
            .context("could not query aria2")?;
        eprintln!(
            "📊 Engine: {} active, {} waiting, {}",
            stats.num_active,
            stats.num_waiting,
            linkrelay::format_rate(stats.download_speed as f64)
        );
        return Ok(());
    }

    let share_url = cli.share_url.clone().context("a share link is required")?;
    validate_share_url(&share_url)?;

    if cli.dry_run {
        let file = ResolverClient::new(cli.resolver_config()).resolve(&share_url).await?;
        eprintln!(
            "🔍 [DRY RUN] Would relay: {} ({}) from {}",
            file.filename,
            linkrelay::format_size(file.size),
            file.direct_url
        );
        return Ok(());
    }

    let bot_token = cli.bot_token.clone().context("BOT_TOKEN is not set")?;
    let Some(chat_id) = cli.chat_id else {
        bail!("DUMP_CHAT_ID is not set");
    };

    let coordinator = DownloadCoordinator::new(cli.engine_config());
    coordinator
        .configure()
        .await
        .with_context(|| format!("could not configure aria2 at {}", cli.aria2_rpc_url))?;

    let splitter = SegmentSplitter::new(Ffmpeg::new(FfmpegConfig {
        ffmpeg_bin: cli.ffmpeg.clone(),
        ffprobe_bin: cli.ffprobe.clone(),
        ..Default::default()
    }));
    let (pipeline, mut events) = Pipeline::new(
        ResolverClient::new(cli.resolver_config()),
        coordinator,
        splitter,
        cli.uploader(&bot_token),
        PipelineConfig {
            download_dir: cli.download_dir.clone(),
            progress_interval: Duration::from_secs(cli.progress_interval),
        },
    );

    let job = pipeline.create_job(&share_url, cli.requester, chat_id)?;
    eprintln!("📁 Working in: {}", job.work_dir.display());

    let runner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_job(job).await })
    };

    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("⚠️  Interrupted, stopping...");
                pipeline.shutdown();
            }
        });
    }

    let display = cli::ProgressManager::new();
    while let Some(event) = events.recv().await {
        if display.handle(&event) {
            break;
        }
    }

    let report = runner.await.context("job task panicked")?;
    if let Some((stage, reason)) = report.failure {
        bail!("{} failed during {stage}: {reason}", report.job_id);
    }
    Ok(())
}
