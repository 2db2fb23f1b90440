use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid transition: cannot {action} from {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Session {0} already holds a valid chunk plan")]
    PlanAlreadyAssigned(String),

    #[error("Session has no chunk plan")]
    PlanMissing,

    #[error("Re-issued plan changes geometry: {0}")]
    PlanGeometryMismatch(String),

    #[error("Part {part} out of range 1..={total}")]
    PartOutOfRange { part: u32, total: u32 },

    #[error("Ledger incomplete: {have}/{need} parts confirmed")]
    LedgerIncomplete { have: usize, need: u32 },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
