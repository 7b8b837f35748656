//! Job orchestration: resolve, download, split when needed, relay, clean up
//!
//! Every job runs as its own task and carries its own context (job record,
//! progress reporter, cancellation token, event sink). Nothing here is shared
//! between jobs except the stage components, which hold no per-job state.

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::engine::{DownloadCoordinator, JobHandle};
use crate::core::error::{excerpt, Error, Result, USER_EXCERPT_CHARS};
use crate::core::events::{EventSink, JobEvent, JobEventKind};
use crate::core::job::{DownloadJob, JobId, JobStatus, Segment, UploadTarget};
use crate::core::links::{sanitize_filename, validate_share_url};
use crate::core::progress::{Phase, ProgressReporter, DEFAULT_MIN_INTERVAL};
use crate::core::relay::{BotApiRelay, Relay, RelayReceipt, RelayUploader, UploadSession};
use crate::core::resolver::ResolverClient;
use crate::core::size::format_size;
use crate::core::splitter::{Ffmpeg, MediaTool, SegmentSplitter};
use crate::core::ticker::Ticker;

/// Pipeline-wide settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the per-requester, per-job working directories
    pub download_dir: PathBuf,

    /// Minimum spacing between two progress updates of one job
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            progress_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Final account of one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub filename: Option<String>,
    /// Present when the job completed
    pub receipt: Option<RelayReceipt>,
    /// Stage and bounded reason when the job failed
    pub failure: Option<(&'static str, String)>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Per-job state handed explicitly through the stages
struct JobContext {
    job: DownloadJob,
    reporter: ProgressReporter,
    events: EventSink,
    cancel: CancellationToken,
    engine_task: Option<JobHandle>,
}

impl JobContext {
    fn advance(&mut self, next: JobStatus) -> Result<()> {
        self.job.advance(next)?;
        debug!("{}: {next}", self.job.id);
        self.events.emit(JobEventKind::Status(next));
        Ok(())
    }
}

/// Sequences the acquisition stages for every submitted link
pub struct Pipeline<R = BotApiRelay, M = Ffmpeg> {
    resolver: ResolverClient,
    coordinator: DownloadCoordinator,
    splitter: SegmentSplitter<M>,
    uploader: RelayUploader<R>,
    config: PipelineConfig,
    next_id: AtomicU64,
    events: UnboundedSender<JobEvent>,
    shutdown: CancellationToken,
    /// Held while creating job directories or pruning requester directories
    dir_lock: Mutex<()>,
}

impl<R, M> Pipeline<R, M>
where
    R: Relay + 'static,
    M: MediaTool + 'static,
{
    /// Builds a pipeline and the receiving end of its status channel
    pub fn new(
        resolver: ResolverClient,
        coordinator: DownloadCoordinator,
        splitter: SegmentSplitter<M>,
        uploader: RelayUploader<R>,
        config: PipelineConfig,
    ) -> (Arc<Self>, UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let pipeline = Self {
            resolver,
            coordinator,
            splitter,
            uploader,
            config,
            next_id: AtomicU64::new(1),
            events,
            shutdown: CancellationToken::new(),
            dir_lock: Mutex::new(()),
        };
        (Arc::new(pipeline), receiver)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    /// Accepts a share link and starts processing it in the background.
    ///
    /// Returns as soon as the link is validated; progress and the outcome
    /// arrive on the status channel.
    pub fn submit_link(self: &Arc<Self>, share_url: &str, requester: i64, destination: i64) -> Result<JobId> {
        let job = self.create_job(share_url, requester, destination)?;
        let id = job.id;

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_job(job).await;
        });

        info!("📥 Accepted {id} for requester {requester}");
        Ok(id)
    }

    /// Validates `share_url` and allocates a job for it without running it
    pub fn create_job(&self, share_url: &str, requester: i64, destination: i64) -> Result<DownloadJob> {
        validate_share_url(share_url)?;
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let work_dir = self.work_dir(requester, id);
        Ok(DownloadJob::new(
            id,
            share_url.trim().to_string(),
            requester,
            destination,
            work_dir,
        ))
    }

    /// `{download_dir}/{requester}/{job}`
    pub fn work_dir(&self, requester: i64, id: JobId) -> PathBuf {
        self.config
            .download_dir
            .join(requester.to_string())
            .join(id.0.to_string())
    }

    /// Cancels every running job. Jobs stop at their next wait point and fail.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs one job to a terminal state and removes its local artifacts
    pub async fn run_job(&self, job: DownloadJob) -> JobReport {
        let events = EventSink::new(job.id, self.events.clone());
        let mut ctx = JobContext {
            job,
            reporter: ProgressReporter::new(self.config.progress_interval),
            events,
            cancel: self.shutdown.child_token(),
            engine_task: None,
        };
        ctx.events.emit(JobEventKind::Status(ctx.job.status()));

        let report = match self.drive(&mut ctx).await {
            Ok(receipt) => {
                let messages = receipt.messages.iter().map(|m| m.message_id).collect();
                ctx.events.emit(JobEventKind::Completed { messages });
                info!(
                    "🎉 {} completed: {} message(s), {}",
                    ctx.job.id,
                    receipt.messages.len(),
                    format_size(receipt.bytes)
                );
                JobReport {
                    job_id: ctx.job.id,
                    status: ctx.job.status(),
                    filename: ctx.job.filename.clone(),
                    receipt: Some(receipt),
                    failure: None,
                }
            }
            Err(err) => self.fail(&mut ctx, err).await,
        };

        self.cleanup(&ctx.job).await;
        report
    }

    async fn drive(&self, ctx: &mut JobContext) -> Result<RelayReceipt> {
        let resolved = self.resolver.resolve(&ctx.job.source_url).await?;
        let filename = sanitize_filename(&resolved.filename);
        ctx.job.resolved_url = Some(resolved.direct_url.clone());
        ctx.job.filename = Some(filename.clone());
        ctx.job.declared_size = resolved.size;
        ctx.events.emit(JobEventKind::Resolved(resolved.clone()));

        ctx.advance(JobStatus::Downloading)?;
        self.prepare_work_dir(&ctx.job.work_dir).await?;
        let handle = self
            .coordinator
            .start(&resolved.direct_url, &ctx.job.work_dir, &filename)
            .await?;
        ctx.engine_task = Some(handle.clone());

        ctx.reporter.begin_phase(Phase::Downloading, filename.clone());
        let mut ticker = Ticker::new(self.coordinator.config().poll_interval, ctx.cancel.clone());
        let snapshot = self
            .coordinator
            .wait(&handle, &mut ctx.reporter, &ctx.events, &mut ticker)
            .await?;

        // The engine keeps finished results around until told otherwise
        ctx.engine_task = None;
        if let Err(e) = self.coordinator.remove(&handle, false).await {
            debug!("{}: could not clear engine result: {e}", ctx.job.id);
        }

        let local_path = snapshot
            .files
            .first()
            .cloned()
            .unwrap_or_else(|| ctx.job.work_dir.join(&filename));
        let size = tokio::fs::metadata(&local_path).await?.len();
        ctx.job.local_path = Some(local_path.clone());
        ctx.job.declared_size = size;
        ctx.advance(JobStatus::Downloaded)?;
        info!("💾 {} downloaded {} ({})", ctx.job.id, filename, format_size(size));

        let target = UploadTarget::new(ctx.job.destination, self.uploader.transport_limit());
        let segments = if size > target.size_limit {
            ctx.advance(JobStatus::Splitting)?;
            self.splitter.split(&local_path, target.size_limit).await?
        } else {
            vec![Segment::whole(local_path)]
        };

        ctx.advance(JobStatus::Uploading)?;
        let session = UploadSession {
            reporter: &mut ctx.reporter,
            events: &ctx.events,
            cancel: &ctx.cancel,
        };
        let receipt = self
            .uploader
            .upload_segments(&segments, &filename, &target, session)
            .await?;

        ctx.advance(JobStatus::Completed)?;
        Ok(receipt)
    }

    async fn fail(&self, ctx: &mut JobContext, err: Error) -> JobReport {
        let stage = ctx.job.status().stage_name();
        error!("❌ {} failed during {stage}: {err}", ctx.job.id);

        if let Some(handle) = ctx.engine_task.take() {
            if let Err(e) = self.coordinator.remove(&handle, true).await {
                warn!("{}: engine cleanup failed: {e}", ctx.job.id);
            }
        }

        if let Err(e) = ctx.advance(JobStatus::Failed) {
            warn!("{e}");
        }

        let reason = excerpt(&err.to_string(), USER_EXCERPT_CHARS);
        ctx.events.emit(JobEventKind::Failed {
            stage,
            reason: reason.clone(),
        });

        JobReport {
            job_id: ctx.job.id,
            status: ctx.job.status(),
            filename: ctx.job.filename.clone(),
            receipt: None,
            failure: Some((stage, reason)),
        }
    }

    async fn prepare_work_dir(&self, dir: &Path) -> Result<()> {
        let _guard = self.dir_lock.lock().await;
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    /// Removes the job directory. Failures are logged and never change the outcome.
    async fn cleanup(&self, job: &DownloadJob) {
        match tokio::fs::remove_dir_all(&job.work_dir).await {
            Ok(()) => debug!("🧹 {}: removed {}", job.id, job.work_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("{}", Error::Cleanup(format!("{}: {e}", job.work_dir.display()))),
        }

        // Drop the requester directory once its last job is gone. Only empty
        // directories are removed, and never while another job creates its own.
        if let Some(parent) = job.work_dir.parent() {
            let _guard = self.dir_lock.lock().await;
            if let Err(e) = tokio::fs::remove_dir(parent).await {
                debug!("{}: kept {} ({e})", job.id, parent.display());
            }
        }
    }
}
