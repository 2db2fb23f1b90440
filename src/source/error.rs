use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Read out of bounds: offset {offset} + len {len} exceeds size {size}")]
    OutOfBounds { offset: u64, len: usize, size: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;
