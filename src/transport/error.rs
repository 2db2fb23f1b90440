use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Part target rejected as expired (HTTP {0})")]
    Expired(u16),

    #[error("Response missing integrity token (ETag header)")]
    MissingIntegrityToken,

    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
