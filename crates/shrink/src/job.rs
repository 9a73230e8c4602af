use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;
use crate::candidate::{Candidate, MediaKind};
use crate::encoder::Encoder;
use crate::quarantine::{is_not_found, QuarantineDirectory};

/// One admitted candidate
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub candidate: Candidate,
    /// 1-based position among candidates of the same kind
    pub sequence_index: usize,
    pub total_in_kind: usize,
    pub start_time: Instant,
}

impl Job {
    pub fn new(candidate: Candidate, sequence_index: usize, total_in_kind: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            candidate,
            sequence_index,
            total_in_kind,
            start_time: Instant::now(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.candidate.kind
    }
}

/// Why a job stopped without running the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    AlreadyCompressed,
    OutputExists,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::NotFound => "source not found",
            SkipReason::AlreadyCompressed => "already compressed",
            SkipReason::OutputExists => "compressed output exists",
        }
    }
}

/// What happened to the original after a successful compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalDisposal {
    Deleted,
    Quarantined(PathBuf),
    Retained,
    /// Delete or move failed; the compression itself still succeeded
    Failed(String),
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Skipped(SkipReason),
    DryRun {
        output: PathBuf,
    },
    Done {
        compressed_path: PathBuf,
        original_size: u64,
        compressed_size: u64,
        disposal: OriginalDisposal,
    },
    Error(String),
}

/// Everything the aggregator needs to know about a finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub kind: MediaKind,
    pub path: PathBuf,
    pub sequence_index: usize,
    pub total_in_kind: usize,
    pub outcome: JobOutcome,
    /// An existing output was removed before re-encoding
    pub forced: bool,
    pub duration: Duration,
}

/// Per-run settings shared by every job
#[derive(Clone)]
pub struct JobContext {
    pub force: bool,
    pub dry_run: bool,
    pub delete_originals: bool,
    pub quarantine: Option<QuarantineDirectory>,
    pub encoder: Arc<dyn Encoder>,
}

/// Drive one job from QUEUED to a terminal state.
///
/// Never fails: every problem becomes a [`JobOutcome`] so one bad file cannot
/// take down the pool.
pub async fn run_job(job: &Job, ctx: &JobContext) -> JobReport {
    let mut forced = false;
    let outcome = transition(job, ctx, &mut forced).await;
    JobReport {
        job_id: job.id.clone(),
        kind: job.kind(),
        path: job.candidate.path.clone(),
        sequence_index: job.sequence_index,
        total_in_kind: job.total_in_kind,
        outcome,
        forced,
        duration: job.start_time.elapsed(),
    }
}

async fn transition(job: &Job, ctx: &JobContext, forced: &mut bool) -> JobOutcome {
    let source = &job.candidate.path;
    let output = job.candidate.output_path();

    let source_meta = match fs::metadata(source) {
        Ok(m) if m.is_file() => m,
        _ => {
            debug!("Job {}: {} vanished before dispatch", job.id, source.display());
            return JobOutcome::Skipped(SkipReason::NotFound);
        }
    };

    if job.candidate.is_already_compressed() {
        return JobOutcome::Skipped(SkipReason::AlreadyCompressed);
    }

    let output_exists = output.exists();
    if output_exists && !ctx.force {
        return JobOutcome::Skipped(SkipReason::OutputExists);
    }

    if ctx.dry_run {
        return JobOutcome::DryRun { output };
    }

    if output_exists {
        if let Err(e) = fs::remove_file(&output) {
            if !is_not_found(&e) {
                return JobOutcome::Error(format!("failed to remove existing output {}: {}", output.display(), e));
            }
        }
        *forced = true;
        info!("Job {}: removed existing output {} (force)", job.id, output.display());
    }

    let original_size = source_meta.len();
    let source_mtime = source_meta.modified().ok();

    debug!("Job {}: encoding {} -> {}", job.id, source.display(), output.display());
    if let Err(e) = ctx.encoder.encode(job.kind(), source, &output).await {
        discard_output(job, &output);
        return JobOutcome::Error(format!("{:#}", e));
    }

    let compressed_size = match fs::metadata(&output) {
        Ok(m) if m.len() > 0 => m.len(),
        Ok(_) => {
            discard_output(job, &output);
            return JobOutcome::Error("encoder produced an empty file".to_string());
        }
        Err(_) => {
            return JobOutcome::Error("encoder produced no output file".to_string());
        }
    };

    if let Some(mtime) = source_mtime {
        if let Err(e) = preserve_mtime(&output, mtime) {
            warn!("Job {}: could not copy modification time to {}: {}", job.id, output.display(), e);
        }
    }

    let disposal = dispose_original(job, ctx);
    JobOutcome::Done {
        compressed_path: output,
        original_size,
        compressed_size,
        disposal,
    }
}

fn discard_output(job: &Job, output: &std::path::Path) {
    match fs::remove_file(output) {
        Ok(()) => debug!("Job {}: removed partial output {}", job.id, output.display()),
        Err(e) if is_not_found(&e) => {}
        Err(e) => warn!("Job {}: failed to remove partial output {}: {}", job.id, output.display(), e),
    }
}

fn preserve_mtime(output: &std::path::Path, mtime: SystemTime) -> std::io::Result<()> {
    fs::File::options().write(true).open(output)?.set_modified(mtime)
}

fn dispose_original(job: &Job, ctx: &JobContext) -> OriginalDisposal {
    let source = &job.candidate.path;

    if ctx.delete_originals {
        return match fs::remove_file(source) {
            Ok(()) => OriginalDisposal::Deleted,
            Err(e) => {
                warn!("Job {}: failed to delete original {}: {}", job.id, source.display(), e);
                OriginalDisposal::Failed(format!("delete failed: {}", e))
            }
        };
    }

    match &ctx.quarantine {
        Some(quarantine) => match quarantine.admit(source) {
            Ok(dest) => OriginalDisposal::Quarantined(dest),
            Err(e) => {
                warn!("Job {}: failed to quarantine {}: {:#}", job.id, source.display(), e);
                OriginalDisposal::Failed(format!("quarantine move failed: {:#}", e))
            }
        },
        None => OriginalDisposal::Retained,
    }
}
