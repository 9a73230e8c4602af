use std::path::PathBuf;
use std::time::Duration;
use serde::Serialize;
use crate::candidate::MediaKind;
use crate::job::{JobOutcome, JobReport, OriginalDisposal, SkipReason};
use crate::quarantine::{Occupancy, QuarantineDirectory};

/// One verified compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEntry {
    pub kind: MediaKind,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

/// Append-only record of every terminal job, owned by the aggregator.
///
/// Summaries are recomputed from these entries on demand, so producing one
/// any number of times never double counts.
#[derive(Debug, Clone, Default)]
pub struct Ledgers {
    pub sizes: Vec<SizeEntry>,
    pub skips: Vec<(MediaKind, SkipReason, PathBuf)>,
    pub forced: Vec<(MediaKind, PathBuf)>,
    pub failures: Vec<(MediaKind, PathBuf, String)>,
    pub dry_runs: Vec<(MediaKind, PathBuf)>,
    pub disposals: Vec<OriginalDisposal>,
}

impl Ledgers {
    pub fn record(&mut self, report: &JobReport) {
        if report.forced {
            self.forced.push((report.kind, report.path.clone()));
        }
        match &report.outcome {
            JobOutcome::Skipped(reason) => {
                self.skips.push((report.kind, *reason, report.path.clone()));
            }
            JobOutcome::DryRun { .. } => {
                self.dry_runs.push((report.kind, report.path.clone()));
            }
            JobOutcome::Done { original_size, compressed_size, disposal, .. } => {
                self.sizes.push(SizeEntry {
                    kind: report.kind,
                    original_bytes: *original_size,
                    compressed_bytes: *compressed_size,
                });
                self.disposals.push(disposal.clone());
            }
            JobOutcome::Error(reason) => {
                self.failures.push((report.kind, report.path.clone(), reason.clone()));
            }
        }
    }

    /// Number of jobs that reached any terminal state
    pub fn terminal_count(&self) -> usize {
        self.sizes.len() + self.skips.len() + self.failures.len() + self.dry_runs.len()
    }
}

/// Per-kind counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub processed: u64,
    /// Already compressed, or output present without force
    pub skipped: u64,
    /// Source vanished before its job ran
    pub missing: u64,
    pub forced: u64,
    pub failed: u64,
    pub dry_run: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

/// What became of originals of successful jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisposalCounts {
    pub deleted: u64,
    pub quarantined: u64,
    pub retained: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineSummary {
    pub path: PathBuf,
    pub occupancy: Occupancy,
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub images: KindSummary,
    pub videos: KindSummary,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// Negative when outputs grew
    pub saved_bytes: i64,
    pub saved_percent: f64,
    pub elapsed_secs: f64,
    pub interrupted: bool,
    pub disposals: DisposalCounts,
    pub quarantine: Option<QuarantineSummary>,
}

impl RunSummary {
    /// Recompute every aggregate from the ledgers. Reads the quarantine
    /// directory for its occupancy but changes nothing.
    pub fn collect(
        ledgers: &Ledgers,
        elapsed: Duration,
        interrupted: bool,
        quarantine: Option<&QuarantineDirectory>,
    ) -> Self {
        let mut per_kind = [KindSummary::default(); 2];
        let slot = |kind: MediaKind| match kind {
            MediaKind::Image => 0,
            MediaKind::Video => 1,
        };

        for entry in &ledgers.sizes {
            let s = &mut per_kind[slot(entry.kind)];
            s.processed += 1;
            s.original_bytes += entry.original_bytes;
            s.compressed_bytes += entry.compressed_bytes;
        }
        for (kind, reason, _) in &ledgers.skips {
            match reason {
                SkipReason::NotFound => per_kind[slot(*kind)].missing += 1,
                SkipReason::AlreadyCompressed | SkipReason::OutputExists => per_kind[slot(*kind)].skipped += 1,
            }
        }
        for (kind, _) in &ledgers.forced {
            per_kind[slot(*kind)].forced += 1;
        }
        for (kind, _, _) in &ledgers.failures {
            per_kind[slot(*kind)].failed += 1;
        }
        for (kind, _) in &ledgers.dry_runs {
            per_kind[slot(*kind)].dry_run += 1;
        }

        let mut disposals = DisposalCounts::default();
        for disposal in &ledgers.disposals {
            match disposal {
                OriginalDisposal::Deleted => disposals.deleted += 1,
                OriginalDisposal::Quarantined(_) => disposals.quarantined += 1,
                OriginalDisposal::Retained => disposals.retained += 1,
                OriginalDisposal::Failed(_) => disposals.failed += 1,
            }
        }

        let [images, videos] = per_kind;
        let original_bytes = images.original_bytes + videos.original_bytes;
        let compressed_bytes = images.compressed_bytes + videos.compressed_bytes;
        let saved_bytes = original_bytes as i64 - compressed_bytes as i64;
        let saved_percent = if original_bytes > 0 {
            saved_bytes as f64 * 100.0 / original_bytes as f64
        } else {
            0.0
        };

        RunSummary {
            images,
            videos,
            original_bytes,
            compressed_bytes,
            saved_bytes,
            saved_percent,
            elapsed_secs: elapsed.as_secs_f64(),
            interrupted,
            disposals,
            quarantine: quarantine.map(|q| QuarantineSummary {
                path: q.path.clone(),
                occupancy: q.occupancy(),
            }),
        }
    }

    pub fn kind(&self, kind: MediaKind) -> &KindSummary {
        match kind {
            MediaKind::Image => &self.images,
            MediaKind::Video => &self.videos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(kind: MediaKind, outcome: JobOutcome, forced: bool) -> JobReport {
        JobReport {
            job_id: "test".to_string(),
            kind,
            path: PathBuf::from("x"),
            sequence_index: 1,
            total_in_kind: 1,
            outcome,
            forced,
            duration: Duration::from_millis(5),
        }
    }

    fn done(original: u64, compressed: u64) -> JobOutcome {
        JobOutcome::Done {
            compressed_path: PathBuf::from("x_compressed.jpg"),
            original_size: original,
            compressed_size: compressed,
            disposal: OriginalDisposal::Retained,
        }
    }

    #[test]
    fn test_summary_counts_per_kind() {
        let mut ledgers = Ledgers::default();
        ledgers.record(&report(MediaKind::Image, done(1000, 250), false));
        ledgers.record(&report(MediaKind::Image, done(3000, 750), true));
        ledgers.record(&report(MediaKind::Image, JobOutcome::Skipped(SkipReason::OutputExists), false));
        ledgers.record(&report(MediaKind::Video, JobOutcome::Skipped(SkipReason::NotFound), false));
        ledgers.record(&report(MediaKind::Video, JobOutcome::Error("boom".to_string()), true));

        let summary = RunSummary::collect(&ledgers, Duration::from_secs(2), false, None);
        assert_eq!(summary.images.processed, 2);
        assert_eq!(summary.images.skipped, 1);
        assert_eq!(summary.images.forced, 1);
        assert_eq!(summary.videos.missing, 1);
        assert_eq!(summary.videos.skipped, 0);
        assert_eq!(summary.videos.failed, 1);
        assert_eq!(summary.videos.forced, 1);
        assert_eq!(summary.original_bytes, 4000);
        assert_eq!(summary.compressed_bytes, 1000);
        assert_eq!(summary.saved_bytes, 3000);
        assert!((summary.saved_percent - 75.0).abs() < 1e-9);
        assert_eq!(summary.disposals.retained, 2);
        assert_eq!(ledgers.terminal_count(), 5);
    }

    #[test]
    fn test_summary_is_idempotent() {
        let mut ledgers = Ledgers::default();
        ledgers.record(&report(MediaKind::Video, done(500, 100), false));

        let first = RunSummary::collect(&ledgers, Duration::from_secs(1), true, None);
        let second = RunSummary::collect(&ledgers, Duration::from_secs(1), true, None);
        assert_eq!(first, second);
        assert_eq!(second.videos.processed, 1);
    }

    #[test]
    fn test_growth_reports_negative_savings() {
        let mut ledgers = Ledgers::default();
        ledgers.record(&report(MediaKind::Image, done(100, 150), false));
        let summary = RunSummary::collect(&ledgers, Duration::ZERO, false, None);
        assert_eq!(summary.saved_bytes, -50);
        assert!(summary.saved_percent < 0.0);
    }
}
