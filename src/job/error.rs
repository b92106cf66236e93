//! Error taxonomy for a mixed-mode writing run

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for job operations
pub type Result<T> = std::result::Result<T, JobError>;

/// Everything that can end a run early
#[derive(Error, Debug)]
pub enum JobError {
    /// Image generation or audio decoding failed
    #[error("{stage} failed: {reason}")]
    ProducerFailure { stage: &'static str, reason: String },

    /// A buffer file, toc file or named pipe could not be created or written
    #[error("I/O error on {}: {source}", path.display())]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external writing process reported failure or could not be driven
    #[error("Writing failed: {0}")]
    WriterFailure(String),

    /// Waiting for an empty medium or reloading the medium did not succeed
    #[error("Media not ready: {0}")]
    MediaState(String),

    /// The project description cannot be written
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    /// Settings could not be loaded or stored
    #[error("Settings error: {0}")]
    Settings(String),

    /// The user canceled the run. Not a failure; never reported as an error message.
    #[error("Canceled by user")]
    UserCanceled,
}

impl JobError {
    pub fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::ArtifactIo {
            path: path.into(),
            source,
        }
    }

    pub fn producer(stage: &'static str, reason: impl Into<String>) -> Self {
        JobError::ProducerFailure {
            stage,
            reason: reason.into(),
        }
    }

    /// True for the outcome that is not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::UserCanceled)
    }
}
