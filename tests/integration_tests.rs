//! Integration tests for the linkrelay pipeline
//!
//! Resolver services and the aria2 control channel are mocked over HTTP with
//! wiremock; the messaging relay and the media tool are in-process fakes that
//! record what they were asked to do.
//!
//! Note: These tests are disabled during CI package verification to avoid
//! compilation overhead during cargo publish.

use linkrelay::{
    DownloadCoordinator, EngineConfig, Error, JobEvent, JobEventKind, JobStatus, MediaTool, MessageHandle, Pipeline,
    PipelineConfig, Relay, RelayRequest, RelayUploader, ResolverClient, ResolverConfig, Result, RetryPolicy,
    SegmentSplitter,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SHARE: &str = "https://terabox.com/s/1abcdef";
const REQUESTER: i64 = 42;
const CHAT: i64 = -1001234567890;

/// Relay that records file names and the caption of every send
#[derive(Clone)]
struct RecordingRelay {
    ceiling: u64,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingRelay {
    fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn file_names(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Relay for RecordingRelay {
    fn ceiling(&self) -> u64 {
        self.ceiling
    }

    async fn send(&self, request: &RelayRequest, sent: Arc<AtomicU64>) -> Result<MessageHandle> {
        assert!(request.path.exists(), "relayed file must exist at send time");
        assert_eq!(request.chat_id, CHAT);
        sent.fetch_add(request.size, Ordering::Relaxed);
        let mut log = self.sent.lock().unwrap();
        log.push((request.file_name.clone(), request.caption.clone()));
        Ok(MessageHandle {
            message_id: log.len() as i64,
        })
    }
}

/// Media tool that reports a fixed duration and writes small parts
#[derive(Clone)]
struct RecordingTool {
    duration: f64,
    extracted: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingTool {
    fn new(duration: f64) -> Self {
        Self {
            duration,
            extracted: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MediaTool for RecordingTool {
    async fn probe_duration(&self, _input: &Path) -> Result<f64> {
        Ok(self.duration)
    }

    async fn extract(&self, _input: &Path, _start: f64, _duration: f64, output: &Path) -> Result<()> {
        std::fs::write(output, vec![1u8; 8])?;
        self.extracted.lock().unwrap().push(output.to_path_buf());
        Ok(())
    }
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": "1", "result": result }))
}

async fn mount_resolver(server: &MockServer, route: &str, size: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "dlink": "http://cdn.example/file",
            "file_name": "My Movie (2019).mp4",
            "size": size
        })))
        .mount(server)
        .await;
}

/// Fake aria2: `addUri` writes `bytes` into the requested location, then
/// `tellStatus` walks through `statuses` (the last one repeats).
async fn mount_engine(server: &MockServer, bytes: usize, statuses: Vec<Value>, local_file: PathBuf) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(move |req: &Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            let dir = body["params"][1]["dir"].as_str().unwrap();
            let out = body["params"][1]["out"].as_str().unwrap();
            std::fs::create_dir_all(dir).unwrap();
            std::fs::write(Path::new(dir).join(out), vec![0u8; bytes]).unwrap();
            rpc_result(json!("2089b05ecca3d829"))
        })
        .mount(server)
        .await;

    let polls = Arc::new(AtomicUsize::new(0));
    let file = local_file.to_string_lossy().into_owned();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "aria2.tellStatus" })))
        .respond_with(move |_: &Request| {
            let n = polls.fetch_add(1, Ordering::SeqCst).min(statuses.len() - 1);
            let mut status = statuses[n].clone();
            status["gid"] = json!("2089b05ecca3d829");
            status["files"] = json!([{ "path": file }]);
            rpc_result(status)
        })
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "aria2.removeDownloadResult" })))
        .respond_with(rpc_result(json!("OK")))
        .mount(server)
        .await;
}

fn status(state: &str, completed: usize, total: usize) -> Value {
    json!({
        "status": state,
        "completedLength": completed.to_string(),
        "totalLength": total.to_string(),
        "downloadSpeed": "1024"
    })
}

fn build_pipeline(
    server: &MockServer,
    resolver_routes: &[&str],
    download_dir: &Path,
    relay: RecordingRelay,
    tool: RecordingTool,
) -> (Arc<Pipeline<RecordingRelay, RecordingTool>>, UnboundedReceiver<JobEvent>) {
    let resolver = ResolverClient::new(ResolverConfig {
        endpoints: resolver_routes.iter().map(|r| format!("{}{}", server.uri(), r)).collect(),
        timeout: Duration::from_secs(2),
    });
    let coordinator = DownloadCoordinator::new(EngineConfig {
        rpc_url: format!("{}/jsonrpc", server.uri()),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    });
    let uploader =
        RelayUploader::new(relay, None, RetryPolicy::default()).with_progress_interval(Duration::from_millis(10));

    Pipeline::new(
        resolver,
        coordinator,
        SegmentSplitter::new(tool),
        uploader,
        PipelineConfig {
            download_dir: download_dir.to_path_buf(),
            progress_interval: Duration::ZERO,
        },
    )
}

fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

fn statuses(kinds: &[JobEventKind]) -> Vec<JobStatus> {
    kinds
        .iter()
        .filter_map(|k| match k {
            JobEventKind::Status(s) => Some(*s),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_small_file_relayed_whole() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("42/1/My_Movie_2019.mp4");

    mount_resolver(&server, "/api", "8 B").await;
    mount_engine(
        &server,
        8,
        vec![status("active", 4, 8), status("complete", 8, 8)],
        local.clone(),
    )
    .await;

    let relay = RecordingRelay::new(10);
    let tool = RecordingTool::new(60.0);
    let (pipeline, mut rx) = build_pipeline(&server, &["/api"], dir.path(), relay.clone(), tool.clone());

    let job = pipeline.create_job(SHARE, REQUESTER, CHAT).unwrap();
    let report = pipeline.run_job(job).await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.filename.as_deref(), Some("My_Movie_2019.mp4"));
    assert_eq!(relay.file_names(), vec!["My_Movie_2019.mp4"]);
    assert_eq!(relay.sent.lock().unwrap()[0].1, "📁 My_Movie_2019.mp4\n💾 8 B");
    assert!(tool.extracted.lock().unwrap().is_empty(), "no split below the limit");
    assert!(!dir.path().join("42").exists(), "job directory removed");

    let kinds = drain(&mut rx);
    assert_eq!(
        statuses(&kinds),
        vec![
            JobStatus::Resolving,
            JobStatus::Downloading,
            JobStatus::Downloaded,
            JobStatus::Uploading,
            JobStatus::Completed
        ]
    );
    assert!(kinds.iter().any(|k| matches!(k, JobEventKind::Progress(_))));
    assert_eq!(kinds.last(), Some(&JobEventKind::Completed { messages: vec![1] }));
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_three_times_limit_is_split_and_relayed_in_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("42/1/My_Movie_2019.mp4");

    mount_resolver(&server, "/api", "30 B").await;
    mount_engine(&server, 30, vec![status("complete", 30, 30)], local.clone()).await;

    let relay = RecordingRelay::new(10);
    let tool = RecordingTool::new(90.0);
    let (pipeline, mut rx) = build_pipeline(&server, &["/api"], dir.path(), relay.clone(), tool.clone());

    let job = pipeline.create_job(SHARE, REQUESTER, CHAT).unwrap();
    let report = pipeline.run_job(job).await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        relay.file_names(),
        vec!["My_Movie_2019.001.mp4", "My_Movie_2019.002.mp4", "My_Movie_2019.003.mp4"]
    );
    assert!(relay.sent.lock().unwrap()[1].1.ends_with("Part 2/3"));
    assert_eq!(report.receipt.unwrap().messages.len(), 3);
    assert!(!dir.path().join("42").exists());

    let kinds = drain(&mut rx);
    assert!(statuses(&kinds).contains(&JobStatus::Splitting));
    let relayed: Vec<(usize, usize)> = kinds
        .iter()
        .filter_map(|k| match k {
            JobEventKind::SegmentRelayed { index, total } => Some((*index, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(relayed, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_engine_failure_mid_transfer() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("42/1/My_Movie_2019.mp4");

    mount_resolver(&server, "/api", "100 B").await;
    let mut failed = status("error", 10, 100);
    failed["errorMessage"] = json!("Too many redirects");
    mount_engine(&server, 10, vec![status("active", 10, 100), failed], local.clone()).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "aria2.forceRemove" })))
        .respond_with(rpc_result(json!("2089b05ecca3d829")))
        .expect(1)
        .mount(&server)
        .await;

    let relay = RecordingRelay::new(10);
    let tool = RecordingTool::new(60.0);
    let (pipeline, mut rx) = build_pipeline(&server, &["/api"], dir.path(), relay.clone(), tool.clone());

    let job = pipeline.create_job(SHARE, REQUESTER, CHAT).unwrap();
    let report = pipeline.run_job(job).await;

    assert_eq!(report.status, JobStatus::Failed);
    let (stage, reason) = report.failure.unwrap();
    assert_eq!(stage, "download");
    assert!(reason.contains("Too many redirects"), "{reason}");

    assert!(!local.exists(), "partial file removed");
    assert!(!dir.path().join("42").exists());
    assert!(relay.file_names().is_empty());
    assert!(tool.extracted.lock().unwrap().is_empty());

    let kinds = drain(&mut rx);
    let seen = statuses(&kinds);
    assert!(!seen.contains(&JobStatus::Splitting));
    assert!(!seen.contains(&JobStatus::Uploading));
    assert_eq!(seen.last(), Some(&JobStatus::Failed));
    assert!(matches!(
        kinds.last(),
        Some(JobEventKind::Failed { stage: "download", .. })
    ));
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_malformed_resolvers_fall_through_to_third() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("42/1/My_Movie_2019.mp4");

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>502</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nolink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "dlink": "" })))
        .mount(&server)
        .await;
    mount_resolver(&server, "/good", "8 B").await;
    mount_engine(&server, 8, vec![status("complete", 8, 8)], local).await;

    let relay = RecordingRelay::new(10);
    let (pipeline, mut rx) = build_pipeline(
        &server,
        &["/broken", "/nolink", "/good"],
        dir.path(),
        relay.clone(),
        RecordingTool::new(1.0),
    );

    let job = pipeline.create_job(SHARE, REQUESTER, CHAT).unwrap();
    assert!(pipeline.run_job(job).await.is_success());

    let resolved = drain(&mut rx).into_iter().find_map(|k| match k {
        JobEventKind::Resolved(file) => Some(file),
        _ => None,
    });
    assert_eq!(resolved.unwrap().endpoint, 2);
    assert_eq!(relay.file_names().len(), 1);
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_unresolvable_link_fails_before_download() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "error", "message": "expired" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(rpc_result(json!("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, _rx) = build_pipeline(
        &server,
        &["/a", "/b"],
        dir.path(),
        RecordingRelay::new(10),
        RecordingTool::new(1.0),
    );

    let job = pipeline.create_job(SHARE, REQUESTER, CHAT).unwrap();
    let report = pipeline.run_job(job).await;
    assert_eq!(
        report.failure,
        Some((
            "resolve",
            "link could not be processed: all 2 resolver endpoints exhausted".to_string()
        ))
    );
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_submitted_job_reports_on_channel() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("42/1/My_Movie_2019.mp4");

    mount_resolver(&server, "/api", "8 B").await;
    mount_engine(&server, 8, vec![status("complete", 8, 8)], local).await;

    let (pipeline, mut rx) = build_pipeline(
        &server,
        &["/api"],
        dir.path(),
        RecordingRelay::new(10),
        RecordingTool::new(1.0),
    );

    let id = pipeline.submit_link(SHARE, REQUESTER, CHAT).unwrap();

    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            assert_eq!(event.job_id, id);
            if let JobEventKind::Completed { messages } = event.kind {
                return messages;
            }
        }
        Vec::new()
    })
    .await
    .expect("job finished in time");
    assert_eq!(completed, vec![1]);
}

#[test]
#[cfg(not(feature = "ci-tests-disabled"))]
fn test_unsupported_link_rejected() {
    let err = linkrelay::validate_share_url("https://terabx.com/s/1abc").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(err.to_string().contains("Did you mean 'terabox.com'?"));
}

#[test]
#[cfg(not(feature = "ci-tests-disabled"))]
fn test_cli_rejects_unsupported_link() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_linkrelay"))
        .arg("https://terabx.com/s/1abc")
        .arg("--dry-run")
        .output()
        .expect("run linkrelay binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Did you mean 'terabox.com'?"), "stderr: {stderr}");
}
