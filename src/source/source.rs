use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::{SourceError, SourceResult};

/// Read-only handle over the bytes being uploaded.
///
/// Size and content are treated as immutable once a file is admitted;
/// a source that becomes unreadable mid-upload reports
/// `SourceError::Unavailable` rather than stalling.
#[async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    /// Read exactly `len` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, len: usize) -> SourceResult<Bytes>;

    fn total_size(&self) -> u64;

    /// Human-readable origin, used in error messages and logs.
    fn describe(&self) -> String;
}

/// File-backed source. Opens the file per read so a handle can sit in
/// the working set for hours without pinning a descriptor.
pub struct FileSource {
    path: PathBuf,
    total_size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;

        Ok(Self {
            path,
            total_size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    async fn read_range(&self, offset: u64, len: usize) -> SourceResult<Bytes> {
        if offset + len as u64 > self.total_size {
            return Err(SourceError::OutOfBounds {
                offset,
                len,
                size: self.total_size,
            });
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.path.display())))?;

        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory source, used by tests and small pre-buffered payloads.
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    async fn read_range(&self, offset: u64, len: usize) -> SourceResult<Bytes> {
        let size = self.data.len() as u64;
        if offset + len as u64 > size {
            return Err(SourceError::OutOfBounds { offset, len, size });
        }

        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
