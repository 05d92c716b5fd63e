use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::job::JobState;

#[derive(Error, Debug)]
pub enum SbsError {
    #[error("Could not acquire lock {0}")]
    LockUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(u64),

    #[error("Dependency job does not exist: {0}")]
    DependencyMissing(u64),

    #[error("Script not found: {}", .0.display())]
    ScriptMissing(PathBuf),

    #[error("Job {id} is in state {state}, cannot {verb}")]
    InvalidState {
        id: u64,
        state: JobState,
        verb: &'static str,
    },

    #[error("Bad value for setting {key}: {value:?}")]
    BadSetting { key: &'static str, value: String },

    #[error("Corrupt record for job {0}: {1}")]
    CorruptRecord(u64, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SbsError>;
