//! Job data model and the per-job state machine

use std::fmt;
use std::path::PathBuf;
use tokio::time::Instant;

use crate::core::error::{Error, Result};

/// Identifier handed back by `submit_link`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Resolving,
    Downloading,
    Downloaded,
    Splitting,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Resolving, Downloading)
            | (Downloading, Downloaded)
            | (Downloaded, Splitting)
            | (Downloaded, Uploading)
            | (Splitting, Uploading)
            | (Uploading, Completed) => true,
            _ => false,
        }
    }

    /// Human name of the stage, used in failure reports
    pub fn stage_name(self) -> &'static str {
        match self {
            JobStatus::Resolving => "resolve",
            JobStatus::Downloading | JobStatus::Downloaded => "download",
            JobStatus::Splitting => "split",
            JobStatus::Uploading => "upload",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Resolving => "Resolving",
            JobStatus::Downloading => "Downloading",
            JobStatus::Downloaded => "Downloaded",
            JobStatus::Splitting => "Splitting",
            JobStatus::Uploading => "Uploading",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// A share link accepted for processing, owned by the pipeline until it ends
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: JobId,
    pub source_url: String,
    pub requester: i64,
    pub destination: i64,
    pub resolved_url: Option<String>,
    pub filename: Option<String>,
    /// Size in bytes as declared by the resolver, replaced by the on-disk size after download
    pub declared_size: u64,
    pub local_path: Option<PathBuf>,
    /// Directory holding every local artifact of this job
    pub work_dir: PathBuf,
    status: JobStatus,
}

impl DownloadJob {
    pub fn new(id: JobId, source_url: String, requester: i64, destination: i64, work_dir: PathBuf) -> Self {
        Self {
            id,
            source_url,
            requester,
            destination,
            resolved_url: None,
            filename: None,
            declared_size: 0,
            local_path: None,
            work_dir,
            status: JobStatus::Resolving,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Moves the job to `next`, rejecting transitions the state machine forbids
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::InvalidInput(format!(
                "{}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// A raw progress observation from the engine or the relay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub timestamp: Instant,
    pub bytes_transferred: u64,
    /// Zero when the total is not known yet
    pub total_bytes: u64,
}

impl ProgressSample {
    pub fn new(timestamp: Instant, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            timestamp,
            bytes_transferred,
            total_bytes,
        }
    }
}

/// A contiguous, independently playable slice of a media file
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// 1-based position in upload order
    pub index: usize,
    pub path: PathBuf,
    /// Offset into the source, in seconds
    pub start: f64,
    /// Length of the window, in seconds (0 when the segment is the whole file)
    pub duration: f64,
}

impl Segment {
    /// A segment that is simply the whole file
    pub fn whole(path: PathBuf) -> Self {
        Self {
            index: 1,
            path,
            start: 0.0,
            duration: 0.0,
        }
    }
}

/// Where relayed files go and how large a single unit may be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTarget {
    pub chat_id: i64,
    pub size_limit: u64,
}

impl UploadTarget {
    pub fn new(chat_id: i64, size_limit: u64) -> Self {
        Self { chat_id, size_limit }
    }
}

/// Direct link and metadata produced by a resolver endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub direct_url: String,
    pub filename: String,
    /// Bytes, 0 when the endpoint did not report a usable size
    pub size: u64,
    /// Position of the endpoint that answered in the configured list
    pub endpoint: usize,
}
