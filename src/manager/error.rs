use thiserror::Error;

use crate::session::SessionError;
use crate::source::SourceError;

/// Admission-time rejection. Files failing validation never become
/// sessions and never disturb the rest of their batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File exceeds size limit: {size} > {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("File is empty")]
    Empty,

    #[error("Upload queue is full ({max} files)")]
    QueueFull { max: usize },

    #[error("Type not accepted for this category: {content_type}")]
    UnsupportedType { content_type: String },

    #[error("File unreadable: {0}")]
    Unreadable(String),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("No ledger store configured")]
    StoreNotConfigured,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
