//! Terminal rendering of job events
//!
//! One progress bar per job, driven entirely by the status channel.

use indicatif::{ProgressBar, ProgressStyle};
use linkrelay::{format_duration, format_rate, format_size, JobEvent, JobEventKind, JobStatus, ProgressStatus};

/// Creates the bar used for both download and upload phases (position is a percentage)
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// One-line summary of a progress status, for the bar message
pub fn progress_line(status: &ProgressStatus) -> String {
    let eta = match status.eta {
        Some(eta) => format_duration(eta),
        None => "calculating".to_string(),
    };
    let total = if status.total > 0 {
        format_size(status.total)
    } else {
        "unknown".to_string()
    };
    format!(
        "{} {} {} / {} @ {} ETA {}",
        status.phase,
        status.label,
        format_size(status.completed),
        total,
        format_rate(status.rate),
        eta
    )
}

/// Line printed above the bar for events that are not progress updates
pub fn describe(event: &JobEvent) -> Option<String> {
    let id = event.job_id;
    match &event.kind {
        JobEventKind::Status(JobStatus::Resolving) => Some(format!("🔎 {id}: resolving link")),
        JobEventKind::Status(JobStatus::Splitting) => Some(format!("✂️  {id}: splitting into parts")),
        JobEventKind::Status(_) => None,
        JobEventKind::Resolved(file) => {
            let size = if file.size > 0 {
                format_size(file.size)
            } else {
                "unknown size".to_string()
            };
            Some(format!("🔗 {id}: {} ({size}) via endpoint {}", file.filename, file.endpoint))
        }
        JobEventKind::Progress(_) => None,
        JobEventKind::SegmentRelayed { index, total } => Some(format!("📨 {id}: part {index}/{total} relayed")),
        JobEventKind::Completed { messages } => Some(format!("✅ {id}: completed, {} message(s)", messages.len())),
        JobEventKind::Failed { stage, reason } => Some(format!("❌ {id}: failed during {stage}: {reason}")),
    }
}

/// Progress display for one job
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            pb: create_progress_bar(),
        }
    }

    /// Applies an event to the display. Returns `true` once the job is over.
    pub fn handle(&self, event: &JobEvent) -> bool {
        if let JobEventKind::Progress(status) = &event.kind {
            self.pb.set_position(status.percent.floor() as u64);
            self.pb.set_message(progress_line(status));
            return false;
        }

        if let JobEventKind::Status(JobStatus::Downloading | JobStatus::Uploading) = &event.kind {
            self.pb.set_position(0);
        }
        if let Some(line) = describe(event) {
            self.pb.println(line);
        }

        match &event.kind {
            JobEventKind::Completed { .. } => {
                self.pb.finish_with_message("✅ Relay completed!");
                true
            }
            JobEventKind::Failed { .. } => {
                self.pb.abandon();
                true
            }
            _ => false,
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}
