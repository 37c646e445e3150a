//! The closed error-kind set every layer above the adapter speaks.
//!
//! Driver errors never cross this boundary raw: the backends translate them
//! into one of these kinds before surfacing.

/// Error kinds surfaced by the kernel. The set is closed; callers match on
/// the variant, not on message text.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced entity id absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Reservation overlap, ambiguous short-id, child of a closed epic.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Schema validation, empty recipient list, unknown status transition.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Embedder down, database unreachable, daemon not running.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Lock timeout or rollback-after-error composite; retry with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// Projection inconsistency detected at read; replay, do not auto-repair.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Migration failure or schema version collision; abort the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Stable kind tag for boundary envelopes (`{error: {kind, message}}`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Invalid(_) => "Invalid",
            Self::Unavailable(_) => "Unavailable",
            Self::Transient(_) => "Transient",
            Self::Corruption(_) => "Corruption",
            Self::Fatal(_) => "Fatal",
        }
    }

    /// Whether a caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::Transient(format!("sqlite busy: {err}"))
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    Self::Corruption(format!("sqlite corrupt: {err}"))
                }
                rusqlite::ErrorCode::CannotOpen => {
                    Self::Unavailable(format!("sqlite open failed: {err}"))
                }
                _ => Self::Invalid(format!("sqlite: {err}")),
            },
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("no rows".into()),
            _ => Self::Invalid(format!("sqlite: {err}")),
        }
    }
}

impl From<postgres::Error> for StoreError {
    fn from(err: postgres::Error) -> Self {
        if err.is_closed() {
            return Self::Unavailable(format!("postgres connection closed: {err}"));
        }
        match err.code() {
            Some(state) if state.code().starts_with("40") => {
                // serialization_failure / deadlock_detected
                Self::Transient(format!("postgres: {err}"))
            }
            Some(state) if state.code().starts_with("08") => {
                Self::Unavailable(format!("postgres: {err}"))
            }
            _ => Self::Invalid(format!("postgres: {err}")),
        }
    }
}
