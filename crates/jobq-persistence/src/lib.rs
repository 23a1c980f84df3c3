mod schema;
mod store;

pub use store::{Exclusive, JobField, JobStore, StoreConfig};

use jobq_core::{JobId, JobState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Job error: {0}")]
    JobError(#[from] jobq_core::JobError),

    #[error("Job already exists: {0}")]
    DuplicateId(JobId),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is {state}, not dead")]
    NotDead { id: JobId, state: JobState },

    #[error("Store still locked after {attempts} attempts")]
    StoreLocked { attempts: u32 },

    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PersistenceError {
    /// Transient lock contention from another connection.
    pub fn is_busy(&self) -> bool {
        match self {
            PersistenceError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
