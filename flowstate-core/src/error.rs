use flowstate_db::DbError;

/// Errors raised by the state containers.
///
/// Absence is never an error: missing instances, jobs, incidents, scopes and
/// timers surface as `None`/empty results. Everything here is either an
/// illegal-state precondition violation, checked before any write, or a
/// substrate failure.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Expected job {key} to have a non-empty type on {operation}")]
    EmptyJobType { key: i64, operation: &'static str },

    #[error("Expected job {key} to have a positive deadline on {operation}, but was {deadline}")]
    InvalidDeadline {
        key: i64,
        operation: &'static str,
        deadline: i64,
    },

    #[error("Expected parent {parent_key} of element instance {key} to exist")]
    ParentNotFound { key: i64, parent_key: i64 },

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, StateError>;
