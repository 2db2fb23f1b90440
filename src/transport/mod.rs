pub mod error;
pub mod rate_limiter;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use rate_limiter::UploadRateLimiter;
pub use transport::ChunkTransport;
