//! studio-uplink: resilient chunked media upload engine
//!
//! Moves large media assets (multi-gigabyte video and image files)
//! from a local machine into cloud object storage over the backend's
//! three-phase multipart protocol (init, chunk, complete):
//! chunked, resumable, pausable, with a global bounded-concurrency
//! cap and idempotent resumption from the uploaded-parts ledger.

pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod transport;

pub use manager::{
    AdmissionResult, FileKind, FileSpec, UploadEvent, UploadManager, UploadManagerConfig,
};
pub use protocol::{HttpStorageClient, StorageApi};
pub use scheduler::SchedulerConfig;
pub use session::{LedgerStore, SessionSnapshot, UploadStatus};
pub use transport::UploadRateLimiter;
