use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The row changed (or disappeared) since it was read. The caller's
    /// write has been discarded; re-read and decide again.
    #[error("Version conflict on schedule {id}")]
    Conflict { id: Uuid },

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    NotFound { id: Uuid },

    /// A stored row could not be decoded (bad trigger JSON or timestamp).
    #[error("Corrupt schedule row: {id}")]
    Corrupt { id: Uuid },

    /// The provided trigger definition is invalid.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),
}

impl SchedulerError {
    /// True for the optimistic-concurrency loss case, which callers treat
    /// as normal control flow rather than a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
