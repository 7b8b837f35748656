//! Relay of finished files into the messaging platform
//!
//! [`RelayUploader`] owns the policy: routing by size, strict segment order,
//! retry on rate limits and transient failures, upload progress and deleting
//! each unit once it has been delivered. A [`Relay`] only knows how to push
//! one file; [`BotApiRelay`] does that against the Telegram Bot API.

use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::core::error::{excerpt, Error, Result};
use crate::core::events::{EventSink, JobEventKind};
use crate::core::job::{ProgressSample, Segment, UploadTarget};
use crate::core::progress::{Phase, ProgressReporter};
use crate::core::size::format_size;
use crate::core::ticker::{sleep_cancellable, Ticker};

/// Largest file the public Bot API accepts
pub const DEFAULT_CEILING: u64 = 2_093_796_556;

/// Largest file a large-file relay (local Bot API server) accepts
pub const LARGE_CEILING: u64 = 4_241_280_205;

/// Wait applied when a 429 carries no usable retry hint
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(5);

/// How a file is presented in the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Photo,
    Document,
}

impl MediaKind {
    /// Picks the presentation from the file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mkv" | "mp4" | "avi" | "mov" | "flv" | "webm" => MediaKind::Video,
            "mp3" | "wav" | "flac" | "m4a" | "ogg" => MediaKind::Audio,
            "jpg" | "jpeg" | "png" | "webp" => MediaKind::Photo,
            _ => MediaKind::Document,
        }
    }

    /// Bot API method name
    pub fn method(self) -> &'static str {
        match self {
            MediaKind::Video => "sendVideo",
            MediaKind::Audio => "sendAudio",
            MediaKind::Photo => "sendPhoto",
            MediaKind::Document => "sendDocument",
        }
    }

    /// Multipart field carrying the file
    pub fn field(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Photo => "photo",
            MediaKind::Document => "document",
        }
    }
}

/// One file to push to one chat
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRequest {
    pub chat_id: i64,
    pub path: PathBuf,
    /// Name the file carries in the chat
    pub file_name: String,
    pub caption: String,
    pub kind: MediaKind,
    pub size: u64,
}

/// Message created by a successful relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub message_id: i64,
}

/// A transport that can push one file into a chat
pub trait Relay: Send + Sync {
    /// Largest file this transport accepts, in bytes
    fn ceiling(&self) -> u64;

    /// Pushes the file, adding every byte streamed into the request to `sent`.
    ///
    /// Rate limiting must surface as [`Error::RateLimited`] and retryable
    /// transport failures as errors for which [`Error::is_transient`] holds.
    fn send(
        &self,
        request: &RelayRequest,
        sent: Arc<AtomicU64>,
    ) -> impl Future<Output = Result<MessageHandle>> + Send;
}

/// Bot API endpoint and credentials
#[derive(Debug, Clone)]
pub struct BotApiConfig {
    /// Server root, `https://api.telegram.org` or a local Bot API server
    pub api_base: String,
    pub token: String,
    pub ceiling: u64,
    /// Bound on one whole upload request
    pub upload_timeout: Duration,
}

impl Default for BotApiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token: String::new(),
            ceiling: DEFAULT_CEILING,
            upload_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl BotApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// A local Bot API server, which accepts files up to [`LARGE_CEILING`]
    pub fn large(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token: token.into(),
            ceiling: LARGE_CEILING,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// [`Relay`] over the Telegram Bot API
pub struct BotApiRelay {
    client: Client,
    config: BotApiConfig,
}

impl BotApiRelay {
    /// Create a relay using the shared HTTP client
    pub fn new(config: BotApiConfig) -> Self {
        Self::with_client(crate::core::http_client(), config)
    }

    pub fn with_client(client: Client, config: BotApiConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BotApiConfig {
        &self.config
    }

    fn endpoint(&self, kind: MediaKind) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            kind.method()
        )
    }

    async fn build_form(&self, request: &RelayRequest, sent: Arc<AtomicU64>) -> Result<Form> {
        let file = tokio::fs::File::open(&request.path).await?;
        let stream = ReaderStream::new(file).map(move |chunk: std::io::Result<Bytes>| {
            if let Ok(bytes) = &chunk {
                sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), request.size)
            .file_name(request.file_name.clone());

        let mut form = Form::new()
            .text("chat_id", request.chat_id.to_string())
            .text("caption", request.caption.clone())
            .part(request.kind.field(), part);
        if request.kind == MediaKind::Video {
            form = form.text("supports_streaming", "true");
        }
        Ok(form)
    }
}

/// Maps a Bot API answer onto the relay error taxonomy
fn interpret_response(status: StatusCode, retry_header: Option<u64>, body: &[u8]) -> Result<MessageHandle> {
    let parsed: Option<BotApiResponse> = serde_json::from_slice(body).ok();

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || parsed.as_ref().and_then(|p| p.error_code) == Some(429);
    if rate_limited {
        let retry_after = parsed
            .as_ref()
            .and_then(|p| p.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .or(retry_header)
            .map(Duration::from_secs)
            .unwrap_or(FALLBACK_RETRY_AFTER);
        return Err(Error::RateLimited { retry_after });
    }

    match parsed {
        Some(response) if response.ok && status.is_success() => {
            let message_id = response
                .result
                .as_ref()
                .and_then(|r| r.get("message_id"))
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::HttpError("Bot API result has no message_id".to_string()))?;
            Ok(MessageHandle { message_id })
        }
        Some(response) => {
            let description = response
                .description
                .unwrap_or_else(|| format!("status {status}"));
            if status.is_server_error() {
                Err(Error::HttpError(description))
            } else {
                Err(Error::RelayFailed(description))
            }
        }
        None if status.is_client_error() => Err(Error::RelayFailed(format!("status {status}"))),
        None => Err(Error::HttpError(format!(
            "status {status}: {}",
            excerpt(&String::from_utf8_lossy(body), 120)
        ))),
    }
}

impl Relay for BotApiRelay {
    fn ceiling(&self) -> u64 {
        self.config.ceiling
    }

    async fn send(&self, request: &RelayRequest, sent: Arc<AtomicU64>) -> Result<MessageHandle> {
        let form = self.build_form(request, sent).await?;
        debug!("📤 {} {} to chat {}", request.kind.method(), request.file_name, request.chat_id);

        // The URL embeds the token, keep it out of error text
        let response = self
            .client
            .post(self.endpoint(request.kind))
            .multipart(form)
            .timeout(self.config.upload_timeout)
            .send()
            .await
            .map_err(|e| Error::from(e.without_url()))?;

        let status = response.status();
        let retry_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.bytes().await.map_err(|e| Error::from(e.without_url()))?;

        interpret_response(status, retry_header, &body)
    }
}

/// How failed relay attempts are retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries granted to transient failures of one unit
    pub max_transient_retries: u32,
    /// First backoff delay, doubled after each transient failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt, or `None` when `err` is final.
    ///
    /// Rate limits wait exactly as long as the relay asked and never run out;
    /// `transient_failures` counts transient errors already retried.
    pub fn delay_for(&self, err: &Error, transient_failures: u32) -> Option<Duration> {
        match err {
            Error::RateLimited { retry_after } => Some(*retry_after),
            e if e.is_transient() && transient_failures < self.max_transient_retries => {
                Some(self.base_delay.saturating_mul(1u32 << transient_failures.min(16)))
            }
            _ => None,
        }
    }
}

/// What a finished upload produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    /// One message per unit, in upload order
    pub messages: Vec<MessageHandle>,
    pub bytes: u64,
}

/// Shared state of one upload run
pub struct UploadSession<'a> {
    pub reporter: &'a mut ProgressReporter,
    pub events: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

/// Pushes whole files or ordered segments through the configured relays
pub struct RelayUploader<R> {
    primary: R,
    large: Option<R>,
    policy: RetryPolicy,
    progress_interval: Duration,
}

impl<R: Relay> RelayUploader<R> {
    pub fn new(primary: R, large: Option<R>, policy: RetryPolicy) -> Self {
        Self {
            primary,
            large,
            policy,
            progress_interval: Duration::from_secs(3),
        }
    }

    /// Period at which streamed bytes are sampled for progress
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Largest unit any configured relay accepts
    pub fn transport_limit(&self) -> u64 {
        match &self.large {
            Some(large) => large.ceiling(),
            None => self.primary.ceiling(),
        }
    }

    /// The relay that carries a unit of `size` bytes
    fn route(&self, size: u64, target: &UploadTarget) -> Result<&R> {
        if size > target.size_limit {
            return Err(Error::TooLarge {
                size,
                ceiling: target.size_limit,
            });
        }
        if size <= self.primary.ceiling() {
            return Ok(&self.primary);
        }
        match &self.large {
            Some(large) if size <= large.ceiling() => Ok(large),
            _ => Err(Error::TooLarge {
                size,
                ceiling: self.primary.ceiling(),
            }),
        }
    }

    /// Relays a single file as one unit
    pub async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        target: &UploadTarget,
        session: UploadSession<'_>,
    ) -> Result<RelayReceipt> {
        let whole = [Segment::whole(path.to_path_buf())];
        self.upload_segments(&whole, display_name, target, session).await
    }

    /// Relays `segments` one at a time, in the order given.
    ///
    /// Each segment's file is deleted as soon as it has been delivered. The
    /// first unit that cannot be delivered aborts the rest.
    pub async fn upload_segments(
        &self,
        segments: &[Segment],
        display_name: &str,
        target: &UploadTarget,
        session: UploadSession<'_>,
    ) -> Result<RelayReceipt> {
        let UploadSession {
            reporter,
            events,
            cancel,
        } = session;
        let total = segments.len();
        let mut receipt = RelayReceipt {
            messages: Vec::with_capacity(total),
            bytes: 0,
        };

        for segment in segments {
            let size = tokio::fs::metadata(&segment.path).await?.len();
            let relay = self.route(size, target)?;
            let request = RelayRequest {
                chat_id: target.chat_id,
                path: segment.path.clone(),
                file_name: segment
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| display_name.to_string()),
                caption: caption(display_name, size, segment.index, total),
                kind: MediaKind::from_path(&segment.path),
                size,
            };

            let label = if total > 1 {
                format!("{display_name} (part {}/{total})", segment.index)
            } else {
                display_name.to_string()
            };

            let handle = self
                .deliver(relay, &request, &label, reporter, events, cancel)
                .await?;
            info!(
                "📨 Relayed {} ({}) as message {}",
                request.file_name,
                format_size(size),
                handle.message_id
            );

            if let Err(e) = tokio::fs::remove_file(&segment.path).await {
                warn!("{}", Error::Cleanup(format!("{}: {e}", segment.path.display())));
            }

            events.emit(JobEventKind::SegmentRelayed {
                index: segment.index,
                total,
            });
            receipt.messages.push(handle);
            receipt.bytes += size;
        }

        Ok(receipt)
    }

    /// One unit, retried according to the policy
    async fn deliver(
        &self,
        relay: &R,
        request: &RelayRequest,
        label: &str,
        reporter: &mut ProgressReporter,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<MessageHandle> {
        let mut transient_failures = 0;
        reporter.begin_phase(Phase::Uploading, label);

        loop {
            let err = match self.send_with_progress(relay, request, reporter, events, cancel).await {
                Ok(handle) => return Ok(handle),
                Err(e) => e,
            };

            let Some(delay) = self.policy.delay_for(&err, transient_failures) else {
                return Err(err);
            };
            if err.is_transient() {
                transient_failures += 1;
            }

            warn!(
                "⚠️  Upload of {} failed: {err}. Retrying in {}s...",
                request.file_name,
                delay.as_secs_f64()
            );
            if !sleep_cancellable(delay, cancel).await {
                return Err(Error::RelayFailed("upload cancelled".to_string()));
            }
        }
    }

    async fn send_with_progress(
        &self,
        relay: &R,
        request: &RelayRequest,
        reporter: &mut ProgressReporter,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<MessageHandle> {
        let sent = Arc::new(AtomicU64::new(0));
        let send = relay.send(request, Arc::clone(&sent));
        tokio::pin!(send);

        let mut ticker = Ticker::new(self.progress_interval, cancel.clone());
        let sample = |sent: &AtomicU64| ProgressSample::new(Instant::now(), sent.load(Ordering::Relaxed), request.size);

        loop {
            tokio::select! {
                result = &mut send => {
                    if result.is_ok() {
                        if let Some(status) = reporter.observe(sample(&sent)) {
                            events.progress(status);
                        }
                    }
                    return result;
                }
                alive = ticker.tick() => {
                    if !alive {
                        return Err(Error::RelayFailed("upload cancelled".to_string()));
                    }
                    if let Some(status) = reporter.observe(sample(&sent)) {
                        events.progress(status);
                    }
                }
            }
        }
    }
}

/// `📁 name` and `💾 size`, plus the part number when there is more than one
pub fn caption(display_name: &str, size: u64, index: usize, total: usize) -> String {
    let mut caption = format!("📁 {display_name}\n💾 {}", format_size(size));
    if total > 1 {
        caption.push_str(&format!("\nPart {index}/{total}"));
    }
    caption
}
