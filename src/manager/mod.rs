pub mod admission;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{ManagerError, ManagerResult, ValidationError};
pub use manager::UploadManager;
pub use types::{
    AdmissionResult, BatchProgress, CompletedItem, FileKind, FileSpec, RejectedFile, SourceSpec,
    UploadEvent, UploadManagerConfig,
};
