pub mod aggregator;
pub mod candidate;
pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod pool;
pub mod preflight;
pub mod progress;
pub mod quarantine;
pub mod report;
pub mod scan;
pub mod scheduler;
pub mod signal;
pub mod stats;

pub use candidate::{Candidate, CandidateSet, MediaKind};
pub use config::ShrinkConfig;
pub use encoder::{CommandEncoder, Encoder};
pub use error::ShrinkError;
pub use job::{Job, JobOutcome, SkipReason};
pub use scheduler::{RunOutcome, Scheduler};
pub use stats::RunSummary;
