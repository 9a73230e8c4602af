use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a run (or a maintenance command) before any job starts.
///
/// Everything that can go wrong inside a single job is reported through
/// [`crate::job::JobOutcome`] instead and never reaches this type.
#[derive(Debug, Error)]
pub enum ShrinkError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("required tool `{bin}` is not usable: {reason}")]
    MissingTool { bin: String, reason: String },

    #[error("refusing to purge `{name}`: {reason}")]
    UnsafePurge { name: String, reason: String },

    #[error("failed to purge {}: {source}", .path.display())]
    PurgeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ShrinkError {
    /// Process exit code the CLI reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShrinkError::InvalidConfig(_) => 2,
            ShrinkError::MissingTool { .. } => 3,
            ShrinkError::UnsafePurge { .. } | ShrinkError::PurgeFailed { .. } => 4,
        }
    }
}
