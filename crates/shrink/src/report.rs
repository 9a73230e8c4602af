use std::fmt::Write as _;
use std::time::Duration;
use humansize::{format_size, DECIMAL};
use crate::candidate::MediaKind;
use crate::job::{JobOutcome, JobReport, OriginalDisposal};
use crate::progress::Eta;
use crate::stats::{KindSummary, RunSummary};

/// ETA values attached to a record line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaFields {
    pub kind: Eta,
    pub overall: Eta,
}

/// `1h 2m 3s`, `4m 5s` or `6.7s`
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

pub fn format_eta(eta: Eta) -> String {
    match eta {
        Eta::Unavailable => "--".to_string(),
        Eta::Remaining(d) => format_duration(d),
    }
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// One line per finished job: kind, position, percentage, outcome and
/// optionally ETA fields
pub fn record_line(report: &JobReport, eta: Option<EtaFields>) -> String {
    let mut line = format!(
        "[{} {}/{} {:>3.0}%] {}: ",
        report.kind,
        report.sequence_index,
        report.total_in_kind,
        percent_of(report.sequence_index as u64, report.total_in_kind as u64),
        report.path.display()
    );

    match &report.outcome {
        JobOutcome::Skipped(reason) => {
            let _ = write!(line, "skipped ({})", reason.describe());
        }
        JobOutcome::DryRun { output } => {
            let _ = write!(line, "would compress to {}", output.display());
        }
        JobOutcome::Done { original_size, compressed_size, disposal, .. } => {
            let _ = write!(
                line,
                "done {} -> {} ({:+.1}%)",
                format_size(*original_size, DECIMAL),
                format_size(*compressed_size, DECIMAL),
                percent_of(*compressed_size, *original_size) - 100.0
            );
            match disposal {
                OriginalDisposal::Deleted => line.push_str(", original deleted"),
                OriginalDisposal::Quarantined(_) => line.push_str(", original quarantined"),
                OriginalDisposal::Retained => line.push_str(", original kept"),
                OriginalDisposal::Failed(note) => {
                    let _ = write!(line, ", original kept [{}]", note);
                }
            }
        }
        JobOutcome::Error(reason) => {
            let _ = write!(line, "FAILED: {}", reason);
        }
    }

    if report.forced {
        line.push_str(" (forced)");
    }
    let _ = write!(line, " in {}", format_duration(report.duration));

    if let Some(eta) = eta {
        let _ = write!(
            line,
            " | eta {} {}, overall {}",
            report.kind,
            format_eta(eta.kind),
            format_eta(eta.overall)
        );
    }
    line
}

fn kind_block(out: &mut String, kind: MediaKind, s: &KindSummary) {
    let _ = writeln!(
        out,
        "  {:<6} processed={} skipped={} forced={} failed={} missing={}{}",
        format!("{}s", kind),
        s.processed,
        s.skipped,
        s.forced,
        s.failed,
        s.missing,
        if s.dry_run > 0 { format!(" planned={}", s.dry_run) } else { String::new() }
    );
    if s.processed > 0 {
        let _ = writeln!(
            out,
            "         {} -> {}",
            format_size(s.original_bytes, DECIMAL),
            format_size(s.compressed_bytes, DECIMAL)
        );
    }
}

/// Multi-line human-readable summary
pub fn summary_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    if summary.interrupted {
        out.push_str("Interrupted: no new jobs were started after the signal.\n");
    }
    out.push_str("Summary\n");
    for kind in MediaKind::ALL {
        kind_block(&mut out, kind, summary.kind(kind));
    }

    let saved = if summary.saved_bytes >= 0 {
        format_size(summary.saved_bytes as u64, DECIMAL)
    } else {
        format!("-{}", format_size(summary.saved_bytes.unsigned_abs(), DECIMAL))
    };
    let _ = writeln!(
        out,
        "  total  {} -> {}, saved {} ({:.1}%)",
        format_size(summary.original_bytes, DECIMAL),
        format_size(summary.compressed_bytes, DECIMAL),
        saved,
        summary.saved_percent
    );

    let d = &summary.disposals;
    if d.deleted + d.quarantined + d.retained + d.failed > 0 {
        let _ = writeln!(
            out,
            "  originals deleted={} quarantined={} kept={} disposal-failures={}",
            d.deleted, d.quarantined, d.retained, d.failed
        );
    }

    if let Some(q) = &summary.quarantine {
        let _ = writeln!(
            out,
            "  quarantine {}: {} files, {}",
            q.path.display(),
            q.occupancy.files,
            format_size(q.occupancy.bytes, DECIMAL)
        );
    }

    let _ = writeln!(out, "  elapsed {}", format_duration(Duration::from_secs_f64(summary.elapsed_secs)));
    out
}
