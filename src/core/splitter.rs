//! Size-bounded segmentation of media files
//!
//! Oversized downloads are cut by duration into equal windows, one per
//! transport-sized part, using stream copy so no re-encoding happens. The
//! media tool sits behind [`MediaTool`]; [`Ffmpeg`] is the real one.

use log::{debug, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::core::error::{excerpt, Error, Result};
use crate::core::job::Segment;
use crate::core::size::format_size;

/// Probing and extraction primitives of an external media tool
pub trait MediaTool: Send + Sync {
    /// Container duration in seconds
    fn probe_duration(&self, input: &Path) -> impl Future<Output = Result<f64>> + Send;

    /// Writes `[start, start + duration)` of `input` to `output` without re-encoding
    fn extract(
        &self,
        input: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Locations and limits for the ffmpeg toolchain
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Bound on one subprocess; the child is killed when it expires
    pub timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(600),
        }
    }
}

/// [`MediaTool`] backed by the `ffprobe` and `ffmpeg` binaries
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }

    async fn run(&self, mut command: Command, what: &str) -> Result<Vec<u8>> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| {
                Error::SplitFailed(format!("{what} did not finish within {:?}", self.config.timeout))
            })?
            .map_err(|e| Error::SplitFailed(format!("failed to run {what}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SplitFailed(format!(
                "{what} exited with {}: {}",
                output.status,
                excerpt(stderr.trim(), 500)
            )));
        }
        Ok(output.stdout)
    }
}

impl MediaTool for Ffmpeg {
    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let mut command = Command::new(&self.config.ffprobe_bin);
        command
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input);

        let stdout = self.run(command, "ffprobe").await?;
        let text = String::from_utf8_lossy(&stdout);
        let duration: f64 = text
            .trim()
            .parse()
            .map_err(|_| Error::SplitFailed(format!("ffprobe returned no duration: '{}'", text.trim())))?;
        Ok(duration)
    }

    async fn extract(&self, input: &Path, start: f64, duration: f64, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.config.ffmpeg_bin);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-ss")
            .arg(format!("{start:.3}"))
            .arg("-i")
            .arg(input)
            .arg("-t")
            .arg(format!("{duration:.3}"))
            .args(["-map", "0", "-c", "copy", "-avoid_negative_ts", "make_zero", "-y"])
            .arg(output);

        debug!("🎬 ffmpeg -ss {start:.3} -t {duration:.3} -> {}", output.display());
        self.run(command, "ffmpeg").await?;
        Ok(())
    }
}

/// Divides `duration` into `parts` contiguous `(start, length)` windows.
///
/// Windows are equal except the last, which absorbs the rounding remainder
/// so the lengths always sum to `duration`.
pub fn plan_windows(duration: f64, parts: usize) -> Vec<(f64, f64)> {
    if parts == 0 {
        return Vec::new();
    }
    let step = duration / parts as f64;
    (0..parts)
        .map(|i| {
            let start = step * i as f64;
            let length = if i + 1 == parts { duration - start } else { step };
            (start, length)
        })
        .collect()
}

/// `{stem}.{index:03}{ext}` beside the source file
pub fn segment_path(source: &Path, index: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    source.with_file_name(format!("{stem}.{index:03}{ext}"))
}

/// Produces ordered, transport-sized segments of a downloaded file
pub struct SegmentSplitter<M> {
    tool: M,
}

impl<M: MediaTool> SegmentSplitter<M> {
    pub fn new(tool: M) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &M {
        &self.tool
    }

    /// Splits `source` so that each part targets at most `limit` bytes.
    ///
    /// A file that already fits comes back as a single whole-file segment.
    pub async fn split(&self, source: &Path, limit: u64) -> Result<Vec<Segment>> {
        if limit == 0 {
            return Err(Error::InvalidInput("split limit must be greater than zero".to_string()));
        }

        let size = tokio::fs::metadata(source).await?.len();
        if size <= limit {
            return Ok(vec![Segment::whole(source.to_path_buf())]);
        }

        let parts = size.div_ceil(limit) as usize;
        if parts == 1 {
            return Ok(vec![Segment::whole(source.to_path_buf())]);
        }

        let duration = self.tool.probe_duration(source).await?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::SplitFailed(format!(
                "cannot split {}: unusable duration {duration}",
                source.display()
            )));
        }

        info!(
            "✂️  Splitting {} ({}, {duration:.1}s) into {parts} parts",
            source.display(),
            format_size(size)
        );

        let mut segments = Vec::with_capacity(parts);
        for (i, (start, length)) in plan_windows(duration, parts).into_iter().enumerate() {
            let segment = Segment {
                index: i + 1,
                path: segment_path(source, i + 1),
                start,
                duration: length,
            };

            if let Err(e) = self.tool.extract(source, start, length, &segment.path).await {
                // The failed part may have been partially written too
                segments.push(segment);
                remove_segments(&segments).await;
                return Err(match e {
                    e @ Error::SplitFailed(_) => e,
                    other => Error::SplitFailed(format!("part {}: {other}", i + 1)),
                });
            }

            if let Ok(meta) = tokio::fs::metadata(&segment.path).await {
                if meta.len() > limit {
                    warn!(
                        "⚠️  Part {} is {} which is above the {} limit",
                        segment.index,
                        format_size(meta.len()),
                        format_size(limit)
                    );
                }
            }
            segments.push(segment);
        }

        info!("✅ Split into {} parts", segments.len());
        Ok(segments)
    }
}

async fn remove_segments(segments: &[Segment]) {
    for segment in segments {
        match tokio::fs::remove_file(&segment.path).await {
            Ok(()) => debug!("🧹 Removed partial segment {}", segment.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {e}", segment.path.display()),
        }
    }
}
