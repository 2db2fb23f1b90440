use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::session::SessionError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Chunk retry budget exhausted for part {part}: {cause}")]
    RetryBudgetExhausted { part: u32, cause: String },

    #[error("Plan re-issue made no progress after {0} rounds")]
    StalledOnExpiry(u32),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
