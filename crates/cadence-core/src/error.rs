use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Interval value must be greater than 0 (got {value})")]
    InvalidInterval { value: i32 },

    #[error("Date is outside the supported calendar range")]
    DateOutOfRange,

    #[error("Recurrence template {0} is referenced by existing tasks")]
    TemplateInUse(Uuid),

    #[error("Task {0} is done and can no longer be modified")]
    TaskLocked(Uuid),
}

/// One recurring task that could not be reconciled.
///
/// Collected by the batch reconciler instead of being propagated, so a single
/// misconfigured definition never stops the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationError {
    /// `None` when the failure happened before any recurring task was selected,
    /// e.g. while loading the active set.
    pub recurring_task_id: Option<Uuid>,
    pub message: String,
}

impl std::fmt::Display for ReconciliationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.recurring_task_id {
            Some(id) => write!(f, "Error processing recurring task {}: {}", id, self.message),
            None => write!(f, "Batch generation failed: {}", self.message),
        }
    }
}

impl std::error::Error for ReconciliationError {}
