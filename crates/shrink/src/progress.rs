use std::time::{Duration, Instant};
use crate::candidate::MediaKind;

/// Smoothing factor for per-item time averages
pub const EMA_ALPHA: f64 = 0.2;

/// Exponential moving average, seeded by its first sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ema {
    value: Option<f64>,
}

impl Ema {
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(prev) => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Which counters an estimate is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Overall,
    Kind(MediaKind),
}

/// Remaining-time estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    Unavailable,
    Remaining(Duration),
}

/// Thresholds governing when an estimate is shown
#[derive(Debug, Clone, Copy)]
pub struct EtaPolicy {
    /// Phase must be at least this old before estimates are given
    pub min_elapsed: Duration,
    /// Jobs shorter than this get no ETA on their record line
    pub job_threshold: Duration,
    pub always_show: bool,
}

impl Default for EtaPolicy {
    fn default() -> Self {
        Self {
            min_elapsed: Duration::from_secs(1),
            job_threshold: Duration::from_secs(3),
            always_show: false,
        }
    }
}

impl EtaPolicy {
    /// Whether a job of this duration carries ETA fields on its line
    pub fn attach_to_job(&self, job_duration: Duration) -> bool {
        self.always_show || job_duration > self.job_threshold
    }
}

/// Completion counters and smoothed throughput for the current phase.
///
/// Only successful jobs are counted. Updates must be serialized; the
/// aggregator owns the single instance.
#[derive(Debug, Clone)]
pub struct ProgressState {
    completed_overall: u64,
    completed_images: u64,
    completed_videos: u64,
    ema_overall: Ema,
    ema_image: Ema,
    ema_video: Ema,
    phase_start: Instant,
}

impl ProgressState {
    pub fn new(phase_start: Instant) -> Self {
        Self {
            completed_overall: 0,
            completed_images: 0,
            completed_videos: 0,
            ema_overall: Ema::default(),
            ema_image: Ema::default(),
            ema_video: Ema::default(),
            phase_start,
        }
    }

    /// Start a new scheduling phase.
    ///
    /// Resets the phase clock, the overall counter and every EMA so that video
    /// throughput is not skewed by the much faster image phase. Per-kind
    /// counters are kept.
    pub fn start_phase(&mut self, now: Instant) {
        self.phase_start = now;
        self.completed_overall = 0;
        self.ema_overall = Ema::default();
        self.ema_image = Ema::default();
        self.ema_video = Ema::default();
    }

    /// Count one successful job and fold the new averages into the EMAs
    pub fn record_completion(&mut self, kind: MediaKind, now: Instant) {
        self.completed_overall += 1;
        match kind {
            MediaKind::Image => self.completed_images += 1,
            MediaKind::Video => self.completed_videos += 1,
        }

        let elapsed = self.elapsed(now).as_secs_f64();
        let kind_avg = elapsed / self.completed(Scope::Kind(kind)) as f64;
        let overall_avg = elapsed / self.completed_overall as f64;
        self.ema_mut(Scope::Kind(kind)).update(kind_avg);
        self.ema_overall.update(overall_avg);
    }

    pub fn completed(&self, scope: Scope) -> u64 {
        match scope {
            Scope::Overall => self.completed_overall,
            Scope::Kind(MediaKind::Image) => self.completed_images,
            Scope::Kind(MediaKind::Video) => self.completed_videos,
        }
    }

    pub fn ema(&self, scope: Scope) -> Option<f64> {
        match scope {
            Scope::Overall => self.ema_overall.value(),
            Scope::Kind(MediaKind::Image) => self.ema_image.value(),
            Scope::Kind(MediaKind::Video) => self.ema_video.value(),
        }
    }

    fn ema_mut(&mut self, scope: Scope) -> &mut Ema {
        match scope {
            Scope::Overall => &mut self.ema_overall,
            Scope::Kind(MediaKind::Image) => &mut self.ema_image,
            Scope::Kind(MediaKind::Video) => &mut self.ema_video,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.phase_start)
    }

    /// Seconds per completed item since the phase began, unsmoothed
    pub fn current_avg(&self, scope: Scope, now: Instant) -> Option<f64> {
        let done = self.completed(scope);
        if done == 0 {
            return None;
        }
        Some(self.elapsed(now).as_secs_f64() / done as f64)
    }

    /// Remaining time for `total` items in `scope`.
    ///
    /// Unavailable when more items are done than planned, when nothing has
    /// completed yet, or when the phase is younger than `policy.min_elapsed`
    /// (unless `always_show`). Uses the EMA when positive, otherwise the raw
    /// average.
    pub fn eta(&self, scope: Scope, total: u64, now: Instant, policy: &EtaPolicy) -> Eta {
        let done = self.completed(scope);
        if done > total {
            return Eta::Unavailable;
        }
        if !policy.always_show && self.elapsed(now) < policy.min_elapsed {
            return Eta::Unavailable;
        }

        let avg = match self.ema(scope) {
            Some(ema) if ema > 0.0 => Some(ema),
            _ => self.current_avg(scope, now),
        };
        match avg {
            Some(avg) if avg.is_finite() && avg >= 0.0 => {
                Eta::Remaining(Duration::from_secs_f64((total - done) as f64 * avg))
            }
            _ => Eta::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const IMAGE: Scope = Scope::Kind(MediaKind::Image);
    const VIDEO: Scope = Scope::Kind(MediaKind::Video);

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_first_update_seeds_ema() {
        let mut ema = Ema::default();
        assert_eq!(ema.update(4.0), 4.0);
        assert!((ema.update(2.0) - 3.6).abs() < 1e-12);
    }

    #[test]
    fn test_eta_uses_ema_for_remaining_items() {
        let t0 = Instant::now();
        let mut state = ProgressState::new(t0);
        state.record_completion(MediaKind::Image, t0 + secs(2.0));
        state.record_completion(MediaKind::Image, t0 + secs(4.0));

        // avg: 2.0 then 2.0 -> ema 2.0; 8 remaining
        let eta = state.eta(IMAGE, 10, t0 + secs(4.0), &EtaPolicy::default());
        assert_eq!(eta, Eta::Remaining(secs(16.0)));
    }

    #[test]
    fn test_eta_unavailable_cases() {
        let t0 = Instant::now();
        let mut state = ProgressState::new(t0);
        let policy = EtaPolicy::default();

        // Nothing done yet
        assert_eq!(state.eta(IMAGE, 5, t0 + secs(10.0), &policy), Eta::Unavailable);

        state.record_completion(MediaKind::Image, t0 + secs(0.5));
        // Phase younger than a second
        assert_eq!(state.eta(IMAGE, 5, t0 + secs(0.5), &policy), Eta::Unavailable);
        // More done than planned
        assert_eq!(state.eta(IMAGE, 0, t0 + secs(5.0), &policy), Eta::Unavailable);

        let always = EtaPolicy { always_show: true, ..policy };
        assert_eq!(state.eta(IMAGE, 5, t0 + secs(0.5), &always), Eta::Remaining(secs(2.0)));
    }

    #[test]
    fn test_phase_reset_decouples_video_estimate() {
        let t0 = Instant::now();
        let mut state = ProgressState::new(t0);
        for i in 1..=10 {
            state.record_completion(MediaKind::Image, t0 + secs(0.1 * i as f64));
        }
        assert_eq!(state.completed(Scope::Overall), 10);

        let t1 = t0 + secs(1.0);
        state.start_phase(t1);
        assert_eq!(state.completed(Scope::Overall), 0);
        assert_eq!(state.ema(Scope::Overall), None);
        assert_eq!(state.ema(IMAGE), None);
        assert_eq!(state.completed(IMAGE), 10, "per-kind counters survive the reset");

        state.record_completion(MediaKind::Video, t1 + secs(30.0));
        assert_eq!(state.ema(VIDEO), Some(30.0));
        assert_eq!(
            state.eta(VIDEO, 3, t1 + secs(30.0), &EtaPolicy::default()),
            Eta::Remaining(secs(60.0))
        );
    }

    #[test]
    fn test_attach_to_job_threshold() {
        let policy = EtaPolicy::default();
        assert!(!policy.attach_to_job(secs(3.0)));
        assert!(policy.attach_to_job(secs(3.5)));
        let always = EtaPolicy { always_show: true, ..policy };
        assert!(always.attach_to_job(secs(0.01)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Recorded EMAs follow ema[0] = avg[0], ema[i] = 0.2*avg[i] + 0.8*ema[i-1]
        /// where avg[i] = elapsed_i / (i + 1).
        #[test]
        fn test_ema_matches_closed_form_recurrence(
            gaps_ms in prop::collection::vec(1u64..20_000, 1..40),
        ) {
            let t0 = Instant::now();
            let mut state = ProgressState::new(t0);
            let mut elapsed_ms = 0u64;
            let mut expected: Option<f64> = None;

            for (i, gap) in gaps_ms.iter().enumerate() {
                elapsed_ms += gap;
                let now = t0 + Duration::from_millis(elapsed_ms);
                state.record_completion(MediaKind::Video, now);

                let avg = Duration::from_millis(elapsed_ms).as_secs_f64() / (i + 1) as f64;
                let next = match expected {
                    None => avg,
                    Some(prev) => 0.2 * avg + 0.8 * prev,
                };
                expected = Some(next);

                let got = state.ema(VIDEO).unwrap();
                prop_assert!((got - next).abs() < 1e-9, "step {}: {} != {}", i, got, next);
                prop_assert!((state.ema(Scope::Overall).unwrap() - next).abs() < 1e-9);
            }
        }
    }
}
