use thiserror::Error;

/// Failure taxonomy for the three-phase upload protocol.
///
/// `Init` is surfaced and never auto-retried; `Chunk` is retried per
/// part under the scheduler's budget; `Report` is retried on its own
/// budget without blocking other parts; `Complete` leaves the session
/// retryable with the same parts list; `Expired` triggers a re-init
/// that preserves the ledger; `Cancelled` is discarded silently.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Init rejected: {0}")]
    Init(String),

    #[error("Chunk transfer failed: {0}")]
    Chunk(String),

    #[error("Chunk report failed: {0}")]
    Report(String),

    #[error("Complete failed: {0}")]
    Complete(String),

    #[error("Pre-signed part target expired")]
    Expired,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProtocolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProtocolError::Cancelled)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, ProtocolError::Expired)
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
