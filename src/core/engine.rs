//! Download coordination through an external aria2 engine
//!
//! The coordinator never moves bytes itself. It submits URIs over aria2's
//! JSON-RPC control channel, polls for progress and relays the engine's own
//! verdict. Connection counts, retries and allocation are engine options,
//! pushed once by [`DownloadCoordinator::configure`].

use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::core::error::{Error, Result};
use crate::core::events::EventSink;
use crate::core::job::ProgressSample;
use crate::core::progress::{percent_of, ProgressReporter};
use crate::core::ticker::Ticker;

/// Consecutive failed polls tolerated before the control channel is considered lost
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Fields requested from `aria2.tellStatus`
const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "errorCode",
    "errorMessage",
    "files",
];

/// Engine options applied globally: retries, connections, allocation
pub fn default_engine_options() -> Vec<(String, String)> {
    [
        ("max-tries", "50"),
        ("retry-wait", "3"),
        ("continue", "true"),
        ("allow-overwrite", "true"),
        ("min-split-size", "1M"),
        ("split", "16"),
        ("max-connection-per-server", "16"),
        ("max-concurrent-downloads", "10"),
        ("file-allocation", "none"),
        ("optimize-concurrent-downloads", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Configuration for the aria2 control channel
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JSON-RPC endpoint, e.g. `http://localhost:6800/jsonrpc`
    pub rpc_url: String,

    /// RPC secret, sent as `token:<secret>`
    pub secret: Option<String>,

    /// Fixed interval between status polls
    pub poll_interval: Duration,

    /// Bound on a single control call
    pub rpc_timeout: Duration,

    /// Global options pushed by `configure`
    pub options: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            secret: None,
            poll_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(10),
            options: default_engine_options(),
        }
    }
}

/// Opaque handle of a task inside the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub gid: String,
}

/// Task state as the engine reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
    Other(String),
}

impl From<&str> for EngineState {
    fn from(value: &str) -> Self {
        match value {
            "active" => EngineState::Active,
            "waiting" => EngineState::Waiting,
            "paused" => EngineState::Paused,
            "error" => EngineState::Error,
            "complete" => EngineState::Complete,
            "removed" => EngineState::Removed,
            other => EngineState::Other(other.to_string()),
        }
    }
}

/// One poll result
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSnapshot {
    pub completed_bytes: u64,
    /// Zero while the engine does not know the size yet
    pub total_bytes: u64,
    /// Bytes per second as measured by the engine
    pub speed: u64,
    pub eta: Option<Duration>,
    pub state: EngineState,
    pub error_message: Option<String>,
    pub files: Vec<PathBuf>,
}

impl DownloadSnapshot {
    pub fn is_complete(&self) -> bool {
        self.state == EngineState::Complete
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, EngineState::Error | EngineState::Removed)
    }

    pub fn percent(&self) -> f64 {
        percent_of(self.completed_bytes, self.total_bytes)
    }

    /// The engine's failure text, unmodified when it gave one
    pub fn failure_reason(&self) -> String {
        match &self.error_message {
            Some(message) if !message.is_empty() => message.clone(),
            _ => match &self.state {
                EngineState::Removed => "download was removed from the engine".to_string(),
                state => format!("engine reported state {state:?}"),
            },
        }
    }
}

/// Engine-wide counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub download_speed: u64,
    pub num_active: u64,
    pub num_waiting: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TellStatus {
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    files: Vec<TellStatusFile>,
}

#[derive(Debug, Deserialize)]
struct TellStatusFile {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlobalStat {
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    num_active: String,
    #[serde(default)]
    num_waiting: String,
}

/// aria2 reports numbers as decimal strings; anything unparseable counts as zero
fn parse_counter(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}

fn estimate_eta(completed: u64, total: u64, speed: u64) -> Option<Duration> {
    if speed == 0 || total == 0 {
        return None;
    }
    Some(Duration::from_secs(total.saturating_sub(completed) / speed))
}

impl From<TellStatus> for DownloadSnapshot {
    fn from(status: TellStatus) -> Self {
        let completed_bytes = parse_counter(&status.completed_length);
        let total_bytes = parse_counter(&status.total_length);
        let speed = parse_counter(&status.download_speed);

        Self {
            completed_bytes,
            total_bytes,
            speed,
            eta: estimate_eta(completed_bytes, total_bytes, speed),
            state: EngineState::from(status.status.as_str()),
            error_message: status.error_message.filter(|m| !m.is_empty()),
            files: status
                .files
                .into_iter()
                .filter(|f| !f.path.is_empty())
                .map(|f| PathBuf::from(f.path))
                .collect(),
        }
    }
}

/// Submits and monitors downloads on the external engine
pub struct DownloadCoordinator {
    client: Client,
    config: EngineConfig,
    request_id: AtomicU64,
}

impl Default for DownloadCoordinator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DownloadCoordinator {
    /// Create a coordinator using the shared HTTP client
    pub fn new(config: EngineConfig) -> Self {
        Self::with_client(crate::core::http_client(), config)
    }

    pub fn with_client(client: Client, config: EngineConfig) -> Self {
        Self {
            client,
            config,
            request_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Issues one JSON-RPC call, returning its `result`
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut full_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.config.secret {
            full_params.push(Value::String(format!("token:{secret}")));
        }
        full_params.extend(params);

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": format!("linkrelay-{id}"),
            "method": method,
            "params": full_params,
        });

        debug!("aria2 RPC {method} (id {id})");
        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .timeout(self.config.rpc_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let parsed: RpcResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::EngineRpc(format!("{method}: unreadable response (HTTP {status}): {e}"))
        })?;

        if let Some(err) = parsed.error {
            return Err(Error::EngineRpc(format!("{method}: {} (code {})", err.message, err.code)));
        }
        if !status.is_success() {
            return Err(Error::EngineRpc(format!("{method}: HTTP {status}")));
        }
        parsed
            .result
            .ok_or_else(|| Error::EngineRpc(format!("{method}: response has no result")))
    }

    /// Pushes the configured global options to the engine
    pub async fn configure(&self) -> Result<()> {
        if self.config.options.is_empty() {
            return Ok(());
        }
        let options: Map<String, Value> = self
            .config
            .options
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.call("aria2.changeGlobalOption", vec![Value::Object(options)]).await?;
        info!("⚙️  Applied {} engine options", self.config.options.len());
        Ok(())
    }

    /// Hands `direct_url` to the engine, saving into `dir/filename`
    pub async fn start(&self, direct_url: &str, dir: &Path, filename: &str) -> Result<JobHandle> {
        let options = json!({
            "dir": dir.to_string_lossy(),
            "out": filename,
        });
        let result = self
            .call("aria2.addUri", vec![json!([direct_url]), options])
            .await?;

        let gid = result
            .as_str()
            .filter(|gid| !gid.is_empty())
            .ok_or_else(|| Error::EngineRpc(format!("aria2.addUri returned no gid: {result}")))?
            .to_string();

        info!("🌐 Engine accepted download as gid {gid}");
        Ok(JobHandle { gid })
    }

    /// Fetches the current state of a task
    pub async fn poll(&self, handle: &JobHandle) -> Result<DownloadSnapshot> {
        let keys: Vec<Value> = STATUS_KEYS.iter().map(|k| json!(k)).collect();
        let result = self
            .call("aria2.tellStatus", vec![json!(handle.gid), Value::Array(keys)])
            .await?;
        let status: TellStatus = serde_json::from_value(result)
            .map_err(|e| Error::EngineRpc(format!("aria2.tellStatus: unexpected shape: {e}")))?;
        Ok(status.into())
    }

    /// Polls until the task completes or fails, feeding progress into `reporter`.
    ///
    /// A failure carries the engine's message verbatim. There is no retry here:
    /// the engine already applied its own retry policy.
    pub async fn wait(
        &self,
        handle: &JobHandle,
        reporter: &mut ProgressReporter,
        events: &EventSink,
        ticker: &mut Ticker,
    ) -> Result<DownloadSnapshot> {
        let mut consecutive_errors = 0;

        loop {
            if !ticker.tick().await {
                return Err(Error::DownloadFailed("download cancelled".to_string()));
            }

            let snapshot = match self.poll(handle).await {
                Ok(snapshot) => {
                    consecutive_errors = 0;
                    snapshot
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(match e {
                            Error::EngineRpc(_) => e,
                            other => Error::EngineRpc(format!("lost control channel: {other}")),
                        });
                    }
                    warn!("⚠️  Poll of gid {} failed ({consecutive_errors}): {e}", handle.gid);
                    continue;
                }
            };

            let sample = ProgressSample::new(Instant::now(), snapshot.completed_bytes, snapshot.total_bytes);
            if let Some(status) = reporter.observe(sample) {
                events.progress(status);
            }

            if snapshot.is_complete() {
                info!("✅ Engine finished gid {}", handle.gid);
                return Ok(snapshot);
            }
            if snapshot.is_failed() {
                let reason = snapshot.failure_reason();
                warn!("❌ Engine failed gid {}: {reason}", handle.gid);
                return Err(Error::DownloadFailed(reason));
            }
        }
    }

    /// Removes a task from the engine, optionally deleting what it wrote.
    ///
    /// Best effort: a task that already finished cannot be force-removed and
    /// that is not an error.
    pub async fn remove(&self, handle: &JobHandle, purge_files: bool) -> Result<()> {
        let files = if purge_files {
            match self.poll(handle).await {
                Ok(snapshot) => snapshot.files,
                Err(e) => {
                    debug!("Could not list files of gid {}: {e}", handle.gid);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if let Err(e) = self.call("aria2.forceRemove", vec![json!(handle.gid)]).await {
            debug!("forceRemove gid {}: {e}", handle.gid);
        }
        if let Err(e) = self.call("aria2.removeDownloadResult", vec![json!(handle.gid)]).await {
            debug!("removeDownloadResult gid {}: {e}", handle.gid);
        }

        for file in files {
            let control = PathBuf::from(format!("{}.aria2", file.display()));
            for path in [file, control] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!("🧹 Purged {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Cleanup(format!("{}: {e}", path.display()))),
                }
            }
        }
        Ok(())
    }

    /// Engine-wide speed and queue counters
    pub async fn engine_stats(&self) -> Result<EngineStats> {
        let result = self.call("aria2.getGlobalStat", Vec::new()).await?;
        let stat: GlobalStat = serde_json::from_value(result)
            .map_err(|e| Error::EngineRpc(format!("aria2.getGlobalStat: unexpected shape: {e}")))?;
        Ok(EngineStats {
            download_speed: parse_counter(&stat.download_speed),
            num_active: parse_counter(&stat.num_active),
            num_waiting: parse_counter(&stat.num_waiting),
        })
    }
}
