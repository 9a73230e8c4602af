use std::time::{Duration, Instant};
use log::debug;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use crate::candidate::MediaKind;
use crate::config::ShrinkConfig;
use crate::job::{JobOutcome, JobReport};
use crate::progress::{EtaPolicy, ProgressState, Scope};
use crate::report::{record_line, EtaFields};
use crate::stats::Ledgers;

/// Messages sent to the aggregator task
#[derive(Debug)]
pub enum Event {
    /// A scheduling phase begins; progress counters and EMAs are reset
    PhaseStarted { at: Instant, jobs: u64 },
    Finished(JobReport),
}

/// Sole owner of [`ProgressState`] and [`Ledgers`].
///
/// Jobs complete in any order; they all funnel through one channel so each
/// statistics update is applied whole before the next.
#[derive(Debug)]
pub struct Aggregator {
    progress: ProgressState,
    ledgers: Ledgers,
    policy: EtaPolicy,
    show_skips: bool,
    image_total: u64,
    video_total: u64,
    phase_jobs: u64,
    /// Jobs that ended without a completion (skipped, failed, dry run), per kind
    settled_images: u64,
    settled_videos: u64,
    /// Same, within the current phase
    settled_phase: u64,
    phases_started: usize,
}

impl Aggregator {
    pub fn new(cfg: &ShrinkConfig, image_total: usize, video_total: usize, now: Instant) -> Self {
        Self {
            progress: ProgressState::new(now),
            ledgers: Ledgers::default(),
            policy: EtaPolicy {
                min_elapsed: Duration::from_secs_f64(cfg.eta_min_elapsed_secs),
                job_threshold: Duration::from_secs_f64(cfg.eta_job_threshold_secs),
                always_show: cfg.always_show_eta,
            },
            show_skips: cfg.show_skips,
            image_total: image_total as u64,
            video_total: video_total as u64,
            phase_jobs: (image_total + video_total) as u64,
            settled_images: 0,
            settled_videos: 0,
            settled_phase: 0,
            phases_started: 0,
        }
    }

    /// Jobs of `kind` that can still complete: non-completing terminal
    /// outcomes leave the remaining count
    fn kind_total(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image_total.saturating_sub(self.settled_images),
            MediaKind::Video => self.video_total.saturating_sub(self.settled_videos),
        }
    }

    fn phase_total(&self) -> u64 {
        self.phase_jobs.saturating_sub(self.settled_phase)
    }

    /// Apply one event; returns the record line to print, if any
    pub fn handle(&mut self, event: Event, now: Instant) -> Option<String> {
        match event {
            Event::PhaseStarted { at, jobs } => {
                debug!("Phase started with {} jobs, progress reset", jobs);
                self.progress.start_phase(at);
                self.phase_jobs = jobs;
                self.settled_phase = 0;
                self.phases_started += 1;
                None
            }
            Event::Finished(report) => {
                self.ledgers.record(&report);
                if matches!(report.outcome, JobOutcome::Done { .. }) {
                    self.progress.record_completion(report.kind, now);
                } else {
                    match report.kind {
                        MediaKind::Image => self.settled_images += 1,
                        MediaKind::Video => self.settled_videos += 1,
                    }
                    self.settled_phase += 1;
                }

                if matches!(report.outcome, JobOutcome::Skipped(_)) && !self.show_skips {
                    return None;
                }

                let eta = self.policy.attach_to_job(report.duration).then(|| EtaFields {
                    kind: self.progress.eta(
                        Scope::Kind(report.kind),
                        self.kind_total(report.kind),
                        now,
                        &self.policy,
                    ),
                    overall: self.progress.eta(Scope::Overall, self.phase_total(), now, &self.policy),
                });
                Some(record_line(&report, eta))
            }
        }
    }

    /// Consume events until every sender is dropped, printing record lines
    pub fn spawn(mut self, mut rx: UnboundedReceiver<Event>) -> JoinHandle<Aggregator> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(line) = self.handle(event, Instant::now()) {
                    println!("{}", line);
                }
            }
            self
        })
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    /// Number of `PhaseStarted` events seen
    pub fn phases_started(&self) -> usize {
        self.phases_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{OriginalDisposal, SkipReason};
    use crate::progress::Eta;
    use std::path::PathBuf;

    fn finished(kind: MediaKind, index: usize, outcome: JobOutcome, secs: u64) -> Event {
        Event::Finished(JobReport {
            job_id: format!("job-{}", index),
            kind,
            path: PathBuf::from(format!("f{}", index)),
            sequence_index: index,
            total_in_kind: 4,
            outcome,
            forced: false,
            duration: Duration::from_secs(secs),
        })
    }

    fn done() -> JobOutcome {
        JobOutcome::Done {
            compressed_path: PathBuf::from("out"),
            original_size: 10,
            compressed_size: 5,
            disposal: OriginalDisposal::Retained,
        }
    }

    #[test]
    fn test_only_done_jobs_drive_progress() {
        let t0 = Instant::now();
        let mut agg = Aggregator::new(&ShrinkConfig::default(), 4, 0, t0);
        agg.handle(Event::PhaseStarted { at: t0, jobs: 4 }, t0);

        agg.handle(finished(MediaKind::Image, 1, done(), 1), t0 + Duration::from_secs(2));
        agg.handle(finished(MediaKind::Image, 2, JobOutcome::Error("x".into()), 1), t0 + Duration::from_secs(3));
        agg.handle(
            finished(MediaKind::Image, 3, JobOutcome::Skipped(SkipReason::OutputExists), 0),
            t0 + Duration::from_secs(3),
        );

        assert_eq!(agg.progress().completed(Scope::Kind(MediaKind::Image)), 1);
        assert_eq!(agg.ledgers().terminal_count(), 3);
    }

    #[test]
    fn test_skip_lines_hidden_but_recorded() {
        let t0 = Instant::now();
        let mut agg = Aggregator::new(&ShrinkConfig::default(), 1, 0, t0);
        let line = agg.handle(
            finished(MediaKind::Image, 1, JobOutcome::Skipped(SkipReason::OutputExists), 0),
            t0,
        );
        assert!(line.is_none());
        assert_eq!(agg.ledgers().skips.len(), 1);

        let cfg = ShrinkConfig { show_skips: true, ..Default::default() };
        let mut agg = Aggregator::new(&cfg, 1, 0, t0);
        let line = agg.handle(
            finished(MediaKind::Image, 1, JobOutcome::Skipped(SkipReason::OutputExists), 0),
            t0,
        );
        assert!(line.unwrap().contains("skipped"));
    }

    #[test]
    fn test_eta_only_on_slow_jobs() {
        let t0 = Instant::now();
        let mut agg = Aggregator::new(&ShrinkConfig::default(), 4, 0, t0);
        agg.handle(Event::PhaseStarted { at: t0, jobs: 4 }, t0);

        let fast = agg.handle(finished(MediaKind::Image, 1, done(), 1), t0 + Duration::from_secs(5)).unwrap();
        assert!(!fast.contains("eta"), "{}", fast);

        let slow = agg.handle(finished(MediaKind::Image, 2, done(), 5), t0 + Duration::from_secs(10)).unwrap();
        assert!(slow.contains("| eta image"), "{}", slow);
        assert!(matches!(
            agg.progress().eta(Scope::Kind(MediaKind::Image), 4, t0 + Duration::from_secs(10), &EtaPolicy::default()),
            Eta::Remaining(_)
        ));
    }

    #[test]
    fn test_skipped_jobs_leave_the_remaining_count() {
        let t0 = Instant::now();
        let mut agg = Aggregator::new(&ShrinkConfig::default(), 10, 0, t0);
        agg.handle(Event::PhaseStarted { at: t0, jobs: 10 }, t0);

        for i in 1..=8 {
            agg.handle(
                finished(MediaKind::Image, i, JobOutcome::Skipped(SkipReason::OutputExists), 0),
                t0 + Duration::from_millis(10),
            );
        }
        let line = agg.handle(finished(MediaKind::Image, 9, done(), 5), t0 + Duration::from_secs(5)).unwrap();

        // One image left at 5s each, not nine
        assert!(line.ends_with("| eta image 5.0s, overall 5.0s"), "{}", line);
    }

    #[test]
    fn test_phase_start_clears_phase_settled_count() {
        let t0 = Instant::now();
        let mut agg = Aggregator::new(&ShrinkConfig::default(), 2, 2, t0);
        agg.handle(Event::PhaseStarted { at: t0, jobs: 2 }, t0);
        agg.handle(finished(MediaKind::Image, 1, JobOutcome::Error("x".into()), 0), t0);
        agg.handle(finished(MediaKind::Image, 2, done(), 0), t0 + Duration::from_secs(1));

        let t1 = t0 + Duration::from_secs(2);
        agg.handle(Event::PhaseStarted { at: t1, jobs: 2 }, t1);
        let line = agg.handle(finished(MediaKind::Video, 1, done(), 4), t1 + Duration::from_secs(4)).unwrap();

        assert_eq!(agg.phases_started(), 2);
        assert!(line.ends_with("| eta video 4.0s, overall 4.0s"), "{}", line);
    }

    #[tokio::test]
    async fn test_spawned_aggregator_returns_state() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = Aggregator::new(&ShrinkConfig::default(), 1, 1, Instant::now()).spawn(rx);
        tx.send(finished(MediaKind::Video, 1, done(), 0)).unwrap();
        drop(tx);

        let agg = handle.await.unwrap();
        assert_eq!(agg.ledgers().sizes.len(), 1);
    }
}
