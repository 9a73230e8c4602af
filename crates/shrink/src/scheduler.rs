use std::sync::Arc;
use std::time::Instant;
use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::aggregator::{Aggregator, Event};
use crate::candidate::{Candidate, CandidateSet};
use crate::config::ShrinkConfig;
use crate::encoder::Encoder;
use crate::job::{run_job, Job, JobContext};
use crate::pool::{Admission, WorkerPool};
use crate::progress::ProgressState;
use crate::quarantine::{self, QuarantineDirectory};
use crate::stats::RunSummary;

/// Result of a complete (or interrupted) batch
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub interrupted: bool,
    pub quarantine: Option<QuarantineDirectory>,
    /// Phases the aggregator saw start
    pub phases: usize,
    /// Progress counters as they stood at the end of the last phase
    pub progress: ProgressState,
}

/// A candidate with its position among candidates of the same kind
#[derive(Debug, Clone)]
struct Planned<'a> {
    candidate: &'a Candidate,
    sequence_index: usize,
    total_in_kind: usize,
}

/// Admits one job per candidate into a bounded pool, phase by phase
pub struct Scheduler {
    cfg: ShrinkConfig,
    encoder: Arc<dyn Encoder>,
}

impl Scheduler {
    pub fn new(cfg: ShrinkConfig, encoder: Arc<dyn Encoder>) -> Self {
        Self { cfg, encoder }
    }

    /// Phases in admission order: images then videos, or one mixed phase
    fn plan<'a>(&self, candidates: &'a CandidateSet) -> Vec<Vec<Planned<'a>>> {
        let numbered = |list: &'a [Candidate]| -> Vec<Planned<'a>> {
            list.iter()
                .enumerate()
                .map(|(i, candidate)| Planned {
                    candidate,
                    sequence_index: i + 1,
                    total_in_kind: list.len(),
                })
                .collect()
        };
        let images = numbered(candidates.images());
        let videos = numbered(candidates.videos());

        let phases = if self.cfg.interleaved {
            let mut mixed = Vec::with_capacity(images.len() + videos.len());
            let mut images = images.into_iter();
            let mut videos = videos.into_iter();
            loop {
                let (i, v) = (images.next(), videos.next());
                if i.is_none() && v.is_none() {
                    break;
                }
                mixed.extend(i);
                mixed.extend(v);
            }
            vec![mixed]
        } else {
            vec![images, videos]
        };

        phases.into_iter().filter(|p| !p.is_empty()).collect()
    }

    /// Run every candidate to a terminal state, or until `cancel` fires.
    ///
    /// After cancellation no further job is admitted, but jobs already running
    /// are awaited before the summary is produced.
    pub async fn run(&self, candidates: &CandidateSet, cancel: CancellationToken) -> Result<RunOutcome> {
        let started = Instant::now();
        let quarantine = quarantine::prepare(&self.cfg, candidates, Local::now().date_naive());

        let ctx = JobContext {
            force: self.cfg.force,
            dry_run: self.cfg.dry_run,
            delete_originals: self.cfg.delete_originals,
            quarantine: quarantine.clone(),
            encoder: Arc::clone(&self.encoder),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = Aggregator::new(
            &self.cfg,
            candidates.images().len(),
            candidates.videos().len(),
            started,
        )
        .spawn(rx);

        let mut pool = WorkerPool::new(self.cfg.capacity());
        info!(
            "Processing {} images and {} videos with {} worker(s) ({})",
            candidates.images().len(),
            candidates.videos().len(),
            pool.capacity(),
            if self.cfg.interleaved { "interleaved" } else { "phased" }
        );

        for phase in self.plan(candidates) {
            if cancel.is_cancelled() {
                break;
            }
            let _ = tx.send(Event::PhaseStarted {
                at: Instant::now(),
                jobs: phase.len() as u64,
            });

            for planned in phase {
                let ctx = ctx.clone();
                let tx = tx.clone();
                let candidate = planned.candidate.clone();
                let admission = pool
                    .admit(&cancel, move || {
                        let job = Job::new(candidate, planned.sequence_index, planned.total_in_kind);
                        async move {
                            let report = run_job(&job, &ctx).await;
                            let _ = tx.send(Event::Finished(report));
                        }
                    })
                    .await;

                if admission == Admission::Cancelled {
                    warn!(
                        "Interrupted: no new jobs will start, waiting for {} running job(s)",
                        pool.in_flight()
                    );
                    break;
                }
            }

            pool.drain().await;
        }

        drop(tx);
        let aggregator = aggregator.await.context("Statistics aggregator task failed")?;

        let interrupted = cancel.is_cancelled();
        let reported_quarantine = quarantine.as_ref().filter(|_| !self.cfg.delete_originals);
        let summary = RunSummary::collect(aggregator.ledgers(), started.elapsed(), interrupted, reported_quarantine);

        Ok(RunOutcome {
            summary,
            interrupted,
            quarantine,
            phases: aggregator.phases_started(),
            progress: aggregator.progress().clone(),
        })
    }
}
