pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpStorageClient, StorageApi};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{
    ChunkPlan, CompletedAsset, FileDescriptor, PartTarget, UploadContext, UploadedPart,
};
