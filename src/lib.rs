//! # linkrelay Library
//!
//! Relays files behind cloud-storage share links into Telegram chats.
//!
//! A share link is resolved to a direct URL through an ordered list of
//! resolver services, downloaded by an external aria2 engine, cut into
//! transport-sized parts with ffmpeg when it is too large for one message,
//! and uploaded through the Bot API while progress is reported live.
//!
//! ## Features
//!
//! - **Ordered resolver fallback**: first valid answer wins, each endpoint tried once
//! - **Engine-driven downloads**: aria2 over JSON-RPC, polled at a fixed interval
//! - **Lossless splitting**: stream-copy segments by duration, uploaded in order
//! - **Rate-limit aware relay**: waits out `retry_after`, bounded backoff otherwise
//! - **One status channel**: every job reports through [`JobEvent`]s
//!
//! ## Resolving a link
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = linkrelay::resolve("https://terabox.com/s/1abcdef").await?;
//!     println!("{} ({} bytes) at {}", file.filename, file.size, file.direct_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Running the pipeline
//!
//! ```rust,no_run
//! use linkrelay::{
//!     BotApiConfig, BotApiRelay, DownloadCoordinator, EngineConfig, Ffmpeg, Pipeline,
//!     PipelineConfig, RelayUploader, ResolverClient, ResolverConfig, RetryPolicy,
//!     SegmentSplitter,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let uploader = RelayUploader::new(
//!     BotApiRelay::new(BotApiConfig::new("123456:bot-token")),
//!     None,
//!     RetryPolicy::default(),
//! );
//! let (pipeline, mut events) = Pipeline::new(
//!     ResolverClient::new(ResolverConfig::default()),
//!     DownloadCoordinator::new(EngineConfig::default()),
//!     SegmentSplitter::new(Ffmpeg::default()),
//!     uploader,
//!     PipelineConfig::default(),
//! );
//!
//! pipeline.submit_link("https://terabox.com/s/1abcdef", 42, -1001234567890)?;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {:?}", event.job_id, event.kind);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export core types that users might need
pub use crate::core::engine::{
    default_engine_options, DownloadCoordinator, DownloadSnapshot, EngineConfig, EngineState, EngineStats,
    JobHandle,
};
pub use crate::core::error::{excerpt, Error, Result, USER_EXCERPT_CHARS};
pub use crate::core::events::{EventSink, JobEvent, JobEventKind};
pub use crate::core::job::{DownloadJob, JobId, JobStatus, ProgressSample, ResolvedFile, Segment, UploadTarget};
pub use crate::core::links::{sanitize_filename, suggest_host, validate_share_url, SUPPORTED_HOSTS};
pub use crate::core::pipeline::{JobReport, Pipeline, PipelineConfig};
pub use crate::core::progress::{render_bar, Phase, ProgressReporter, ProgressStatus};
pub use crate::core::relay::{
    BotApiConfig, BotApiRelay, MediaKind, MessageHandle, Relay, RelayReceipt, RelayRequest, RelayUploader,
    RetryPolicy, UploadSession, DEFAULT_CEILING, LARGE_CEILING,
};
pub use crate::core::resolver::{ResolverClient, ResolverConfig};
pub use crate::core::size::{format_duration, format_rate, format_size, parse_size, parse_size_str};
pub use crate::core::splitter::{plan_windows, segment_path, Ffmpeg, FfmpegConfig, MediaTool, SegmentSplitter};
pub use crate::core::ticker::{sleep_cancellable, Ticker};

// Internal modules
mod core;

/// Resolve a share link with the default resolver endpoints
///
/// The link is validated against the supported hosts first.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let file = linkrelay::resolve("https://1024tera.com/s/1abcdef").await?;
/// assert!(!file.direct_url.is_empty());
/// # Ok(())
/// # }
/// ```
pub async fn resolve(share_url: &str) -> Result<ResolvedFile> {
    validate_share_url(share_url)?;
    ResolverClient::default().resolve(share_url).await
}

/// Resolve a share link with custom resolver endpoints
///
/// # Examples
/// ```rust,no_run
/// use linkrelay::ResolverConfig;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ResolverConfig {
///     endpoints: vec!["https://resolver.example.com/api".to_string()],
///     timeout: Duration::from_secs(10),
/// };
/// let file = linkrelay::resolve_with_config("https://terabox.com/s/1abcdef", config).await?;
/// println!("{}", file.filename);
/// # Ok(())
/// # }
/// ```
pub async fn resolve_with_config(share_url: &str, config: ResolverConfig) -> Result<ResolvedFile> {
    validate_share_url(share_url)?;
    ResolverClient::new(config).resolve(share_url).await
}

/// Engine-wide counters of the aria2 instance at `config.rpc_url`
pub async fn engine_stats(config: EngineConfig) -> Result<EngineStats> {
    DownloadCoordinator::new(config).engine_stats().await
}
