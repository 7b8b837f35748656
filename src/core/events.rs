//! The consolidated status channel a caller receives job updates on

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::job::{JobId, JobStatus, ResolvedFile};
use crate::core::progress::ProgressStatus;

/// One update about one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    /// The job entered a new state
    Status(JobStatus),
    /// A resolver endpoint produced a direct link
    Resolved(ResolvedFile),
    /// A throttled progress update from the download or upload phase
    Progress(ProgressStatus),
    /// One segment (1-based `index` of `total`) reached the chat
    SegmentRelayed { index: usize, total: usize },
    /// Everything was relayed; ids of the messages created
    Completed { messages: Vec<i64> },
    /// The job stopped at `stage` for `reason` (bounded excerpt)
    Failed { stage: &'static str, reason: String },
}

/// Job-scoped sending half of the status channel
#[derive(Debug, Clone)]
pub struct EventSink {
    job_id: JobId,
    tx: Option<UnboundedSender<JobEvent>>,
}

impl EventSink {
    pub fn new(job_id: JobId, tx: UnboundedSender<JobEvent>) -> Self {
        Self { job_id, tx: Some(tx) }
    }

    /// A sink that drops every event
    pub fn disabled(job_id: JobId) -> Self {
        Self { job_id, tx: None }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn emit(&self, kind: JobEventKind) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = JobEvent {
            job_id: self.job_id,
            kind,
        };
        if tx.send(event).is_err() {
            debug!("{}: status receiver dropped, event discarded", self.job_id);
        }
    }

    pub fn progress(&self, status: ProgressStatus) {
        self.emit(JobEventKind::Progress(status));
    }
}
