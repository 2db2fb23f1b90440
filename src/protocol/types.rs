use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the caller knows about a file before `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub file_name: String,
    pub content_type: String,
    pub total_size: u64,
}

/// Destination context for `init`: which project/category the upload
/// lands in. The authenticated identity rides on the client itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadContext {
    pub project_id: Option<String>,
    pub category: Option<String>,
}

/// One pre-signed, single-use, time-limited part destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartTarget {
    pub part_number: u32,
    pub url: String,
}

/// The chunk plan issued by `init`: fixed geometry plus one target per
/// part. Targets expire; geometry never changes across re-issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub upload_id: String,
    pub storage_upload_id: String,
    pub storage_path: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub part_targets: Vec<PartTarget>,
    pub expires_at: DateTime<Utc>,
}

impl ChunkPlan {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Byte range for a 1-indexed part: `[(n-1)*chunk_size,
    /// min(n*chunk_size, total_size))`. Computed purely from geometry,
    /// never negotiated per part.
    pub fn part_range(&self, part_number: u32, total_size: u64) -> (u64, usize) {
        let offset = u64::from(part_number - 1) * self.chunk_size;
        let len = self.chunk_size.min(total_size - offset) as usize;
        (offset, len)
    }

    /// Two plans are interchangeable epochs of the same upload when
    /// their geometry matches; only the target URLs may differ.
    pub fn same_geometry(&self, other: &ChunkPlan) -> bool {
        self.chunk_size == other.chunk_size && self.total_chunks == other.total_chunks
    }

    pub fn target(&self, part_number: u32) -> Option<&PartTarget> {
        self.part_targets
            .iter()
            .find(|t| t.part_number == part_number)
    }
}

/// A confirmed part: number plus the storage backend's integrity
/// token (ETag), replayed verbatim at finalize time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// What `complete` hands back once the object is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedAsset {
    pub asset_id: String,
    pub storage_path: String,
}
