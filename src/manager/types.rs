use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::manager::admission;
use crate::manager::error::{ManagerResult, ValidationError};
use crate::protocol::CompletedAsset;
use crate::scheduler::SchedulerConfig;
use crate::session::SessionSnapshot;
use crate::source::SourceError;

/// Destination category. Selects the default accepted-types set when
/// the config doesn't override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Raw,
    Deliverable,
    Portfolio,
    TeamWip,
}

impl FileKind {
    pub fn category(&self) -> &'static str {
        match self {
            FileKind::Raw => "raw",
            FileKind::Deliverable => "deliverable",
            FileKind::Portfolio => "portfolio",
            FileKind::TeamWip => "team-wip",
        }
    }

    /// MIME patterns and extensions accepted by default. `*` accepts
    /// everything (scratch space for the team).
    pub fn default_accepted_types(&self) -> &'static [&'static str] {
        match self {
            FileKind::Raw => &[
                "image/*", "video/*", ".arw", ".cr2", ".cr3", ".nef", ".dng", ".raf", ".braw",
                ".r3d",
            ],
            FileKind::Deliverable => &[
                "image/jpeg",
                "image/png",
                "image/tiff",
                "video/mp4",
                "video/quicktime",
                ".pdf",
            ],
            FileKind::Portfolio => &["image/jpeg", "image/png", "image/webp", "video/mp4"],
            FileKind::TeamWip => &["*"],
        }
    }
}

/// Client-facing configuration surface.
#[derive(Debug, Clone)]
pub struct UploadManagerConfig {
    /// Queue-level cap, counting live (non-removed) sessions.
    pub max_files: usize,
    /// Per-file size cap in bytes.
    pub max_file_size: u64,
    /// MIME patterns (`image/*`) or extensions (`.braw`). Empty means
    /// the `file_kind` category default.
    pub accepted_types: Vec<String>,
    pub file_kind: FileKind,
    /// Destination project, forwarded to `init`.
    pub project_id: Option<String>,
    pub scheduler: SchedulerConfig,
}

impl Default for UploadManagerConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_size: 5 * 1024 * 1024 * 1024,
            accepted_types: Vec::new(),
            file_kind: FileKind::Raw,
            project_id: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Where a submitted file's bytes come from.
pub enum SourceSpec {
    Path(PathBuf),
    Memory(Bytes),
}

/// One file submitted for admission.
pub struct FileSpec {
    pub file_name: String,
    pub content_type: String,
    pub total_size: u64,
    pub source: SourceSpec,
}

impl FileSpec {
    /// Build a spec from a local file, statting its size and guessing
    /// the content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> ManagerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;

        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let content_type = admission::guess_content_type(&file_name).to_string();

        Ok(Self {
            file_name,
            content_type,
            total_size: metadata.len(),
            source: SourceSpec::Path(path),
        })
    }

    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            total_size: bytes.len() as u64,
            source: SourceSpec::Memory(bytes),
        }
    }
}

/// Per-file admission verdicts. Rejections carry the validation
/// reason; accepted files are already live sessions.
#[derive(Debug)]
pub struct AdmissionResult {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedFile>,
}

#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: ValidationError,
}

/// Lifecycle notifications, consumed via `UploadManager::take_events`.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    SessionStarted {
        session_id: String,
        file_name: String,
    },
    SessionProgress {
        snapshot: SessionSnapshot,
    },
    SessionCompleted {
        session_id: String,
        asset: CompletedAsset,
    },
    SessionFailed {
        session_id: String,
        reason: String,
    },
    /// Emitted once per batch, when every live session has completed.
    BatchCompleted { items: Vec<CompletedItem> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedItem {
    pub asset_id: String,
    pub file_name: String,
    pub storage_path: String,
}

/// Aggregate view across the working set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_sessions: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub progress_percent: f32,
}
