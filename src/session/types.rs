use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{ChunkPlan, CompletedAsset, PartTarget, UploadContext, UploadedPart};
use crate::session::error::{SessionError, SessionResult};

/// Session status. Illegal combinations are unrepresentable: only the
/// finalize transition constructs `Completed`, and it requires a full
/// ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Paused,
    Processing,
    Completed,
    Error(String),
}

impl UploadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, UploadStatus::Uploading | UploadStatus::Processing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, UploadStatus::Paused)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, UploadStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UploadStatus::Error(_))
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, UploadStatus::Paused | UploadStatus::Error(_))
    }

    fn name(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Paused => "paused",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Error(_) => "error",
        }
    }
}

/// The uploaded-parts ledger: part number -> integrity token.
///
/// Monotonically growing, keyed by part number, so duplicate and late
/// reports are idempotent: re-recording a part overwrites, never
/// duplicates, an entry. The ledger is the sole source of truth for
/// completion and resumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartLedger {
    parts: BTreeMap<u32, String>,
}

impl PartLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed part. Returns false when the part was
    /// already present (entry overwritten, count unchanged).
    pub fn record(&mut self, part_number: u32, etag: String) -> bool {
        self.parts.insert(part_number, etag).is_none()
    }

    pub fn contains(&self, part_number: u32) -> bool {
        self.parts.contains_key(&part_number)
    }

    pub fn etag(&self, part_number: u32) -> Option<&str> {
        self.parts.get(&part_number).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Ordered parts list as `complete` wants it.
    pub fn to_parts(&self) -> Vec<UploadedPart> {
        self.parts
            .iter()
            .map(|(&part_number, etag)| UploadedPart {
                part_number,
                etag: etag.clone(),
            })
            .collect()
    }
}

/// Per-file upload state: chunk plan, ledger, status, timing.
///
/// Pure data plus checked transitions; the live source handle and
/// cancellation token are owned by the manager alongside this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub total_size: u64,
    /// Local path for file-backed sources, kept for crash resumption.
    pub source_path: Option<String>,
    pub context: UploadContext,
    pub status: UploadStatus,
    pub(crate) plan: Option<ChunkPlan>,
    pub parts: PartLedger,
    pub asset: Option<CompletedAsset>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Millisecond timestamp of the first transition into
    /// `Uploading`; used only for ETA, never reset on pause/resume.
    pub started_at_ms: Option<i64>,
}

impl UploadSession {
    pub fn new(
        id: String,
        file_name: String,
        content_type: String,
        total_size: u64,
        source_path: Option<String>,
        context: UploadContext,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            file_name,
            content_type,
            total_size,
            source_path,
            context,
            status: UploadStatus::Pending,
            plan: None,
            parts: PartLedger::new(),
            asset: None,
            created_at: now,
            updated_at: now,
            started_at_ms: None,
        }
    }

    pub fn plan(&self) -> Option<&ChunkPlan> {
        self.plan.as_ref()
    }

    /// Assign the chunk plan issued by `init`. At most once per epoch:
    /// re-assigning while a valid plan exists is a protocol violation.
    /// After expiry a re-issued plan replaces the targets, but must
    /// keep the same geometry; the ledger is preserved either way.
    pub fn assign_plan(&mut self, plan: ChunkPlan) -> SessionResult<()> {
        if plan.part_targets.len() != plan.total_chunks as usize {
            return Err(SessionError::PlanGeometryMismatch(format!(
                "{} targets for {} chunks",
                plan.part_targets.len(),
                plan.total_chunks
            )));
        }

        match self.plan {
            Some(ref existing) if !existing.is_expired() => {
                Err(SessionError::PlanAlreadyAssigned(self.id.clone()))
            }
            Some(ref existing) if !existing.same_geometry(&plan) => {
                Err(SessionError::PlanGeometryMismatch(format!(
                    "{}x{} -> {}x{}",
                    existing.chunk_size, existing.total_chunks, plan.chunk_size, plan.total_chunks
                )))
            }
            _ => {
                self.plan = Some(plan);
                self.touch();
                Ok(())
            }
        }
    }

    /// Record a confirmed part in the ledger. Returns false when the
    /// part was already present.
    pub fn record_part(&mut self, part_number: u32, etag: String) -> SessionResult<bool> {
        let plan = self.plan.as_ref().ok_or(SessionError::PlanMissing)?;
        if part_number == 0 || part_number > plan.total_chunks {
            return Err(SessionError::PartOutOfRange {
                part: part_number,
                total: plan.total_chunks,
            });
        }

        let fresh = self.parts.record(part_number, etag);
        self.touch();
        Ok(fresh)
    }

    pub fn is_ledger_complete(&self) -> bool {
        match self.plan {
            Some(ref plan) => self.parts.len() == plan.total_chunks as usize,
            None => false,
        }
    }

    /// Targets still needing transfer: `plan.part_targets \ ledger`,
    /// ascending. This is what resume continues from: no byte
    /// already confirmed is re-sent.
    pub fn remaining_parts(&self) -> SessionResult<Vec<PartTarget>> {
        let plan = self.plan.as_ref().ok_or(SessionError::PlanMissing)?;
        Ok(plan
            .part_targets
            .iter()
            .filter(|t| !self.parts.contains(t.part_number))
            .cloned()
            .collect())
    }

    // Transitions. Each checks the current status and returns
    // InvalidTransition rather than panicking.

    pub fn start(&mut self) -> SessionResult<()> {
        match self.status {
            UploadStatus::Pending => {
                self.status = UploadStatus::Uploading;
                if self.started_at_ms.is_none() {
                    self.started_at_ms = Some(chrono::Utc::now().timestamp_millis());
                }
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "start",
            }),
        }
    }

    pub fn pause(&mut self) -> SessionResult<()> {
        match self.status {
            UploadStatus::Uploading => {
                self.status = UploadStatus::Paused;
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "pause",
            }),
        }
    }

    pub fn resume(&mut self) -> SessionResult<()> {
        match self.status {
            UploadStatus::Paused => {
                self.status = UploadStatus::Uploading;
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "resume",
            }),
        }
    }

    /// All parts are in the ledger; `complete` is about to be issued.
    pub fn begin_processing(&mut self) -> SessionResult<()> {
        match self.status {
            UploadStatus::Uploading => {
                if !self.is_ledger_complete() {
                    let need = self.plan.as_ref().map(|p| p.total_chunks).unwrap_or(0);
                    return Err(SessionError::LedgerIncomplete {
                        have: self.parts.len(),
                        need,
                    });
                }
                self.status = UploadStatus::Processing;
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "begin_processing",
            }),
        }
    }

    pub fn finalize(&mut self, asset: CompletedAsset) -> SessionResult<()> {
        match self.status {
            UploadStatus::Processing => {
                if !self.is_ledger_complete() {
                    let need = self.plan.as_ref().map(|p| p.total_chunks).unwrap_or(0);
                    return Err(SessionError::LedgerIncomplete {
                        have: self.parts.len(),
                        need,
                    });
                }
                self.asset = Some(asset);
                self.status = UploadStatus::Completed;
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "finalize",
            }),
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> SessionResult<()> {
        match self.status {
            UploadStatus::Uploading | UploadStatus::Processing => {
                self.status = UploadStatus::Error(reason.into());
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "fail",
            }),
        }
    }

    /// Clear the failure and re-admit. The ledger survives, so only
    /// the remaining parts are re-sent; an expired plan is re-issued
    /// by the driver before transfer resumes.
    pub fn retry(&mut self) -> SessionResult<()> {
        match self.status {
            UploadStatus::Error(_) => {
                self.status = UploadStatus::Uploading;
                self.touch();
                Ok(())
            }
            ref other => Err(SessionError::InvalidTransition {
                from: other.name(),
                action: "retry",
            }),
        }
    }

    /// Normalize a checkpoint loaded after a restart: anything that
    /// was mid-flight comes back paused, waiting for an explicit
    /// resume.
    pub fn mark_recovered(&mut self) {
        if matches!(
            self.status,
            UploadStatus::Pending | UploadStatus::Uploading | UploadStatus::Processing
        ) {
            self.status = UploadStatus::Paused;
            self.touch();
        }
    }

    /// The local source disappeared. An unreadable file must surface
    /// as an error, never a silent stall.
    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        if !self.status.is_completed() {
            self.status = UploadStatus::Error(reason.into());
            self.touch();
        }
    }

    // Derived figures: recomputable from ledger and geometry, never
    // stored authoritatively.

    pub fn bytes_uploaded(&self) -> u64 {
        let plan = match self.plan {
            Some(ref plan) => plan,
            None => return 0,
        };
        self.parts
            .to_parts()
            .iter()
            .map(|p| plan.part_range(p.part_number, self.total_size).1 as u64)
            .sum()
    }

    pub fn progress_percent(&self) -> f32 {
        match self.plan {
            Some(ref plan) if plan.total_chunks > 0 => {
                (self.parts.len() as f32 / plan.total_chunks as f32) * 100.0
            }
            _ => 0.0,
        }
    }

    /// `elapsed * (total - uploaded) / uploaded`; unknown until the
    /// first byte lands.
    pub fn eta_seconds(&self) -> Option<f64> {
        let started = self.started_at_ms?;
        let uploaded = self.bytes_uploaded();
        if uploaded == 0 {
            return None;
        }
        let elapsed_ms = (chrono::Utc::now().timestamp_millis() - started).max(0) as f64;
        let remaining = (self.total_size - uploaded) as f64;
        Some(elapsed_ms / 1000.0 * remaining / uploaded as f64)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            status: self.status.clone(),
            uploaded_parts: self.parts.len() as u32,
            total_chunks: self.plan.as_ref().map(|p| p.total_chunks).unwrap_or(0),
            bytes_uploaded: self.bytes_uploaded(),
            total_size: self.total_size,
            progress_percent: self.progress_percent(),
            eta_seconds: self.eta_seconds(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Read-side view of a session for progress display and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub file_name: String,
    pub status: UploadStatus,
    pub uploaded_parts: u32,
    pub total_chunks: u32,
    pub bytes_uploaded: u64,
    pub total_size: u64,
    pub progress_percent: f32,
    pub eta_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn test_plan(chunk_size: u64, total_chunks: u32) -> ChunkPlan {
        ChunkPlan {
            upload_id: "up-1".into(),
            storage_upload_id: "r2-1".into(),
            storage_path: "projects/p1/raw/reel.mov".into(),
            chunk_size,
            total_chunks,
            part_targets: (1..=total_chunks)
                .map(|n| PartTarget {
                    part_number: n,
                    url: format!("https://r2.test/{n}"),
                })
                .collect(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn test_session(total_size: u64) -> UploadSession {
        UploadSession::new(
            "sess-1".into(),
            "reel.mov".into(),
            "video/quicktime".into(),
            total_size,
            None,
            UploadContext::default(),
        )
    }

    #[test]
    fn test_ledger_idempotent() {
        let mut ledger = PartLedger::new();
        assert!(ledger.record(1, "a".into()));
        assert!(!ledger.record(1, "b".into()));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.etag(1), Some("b"));
    }

    #[test]
    fn test_plan_assigned_once() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();

        let result = session.assign_plan(test_plan(512, 2));
        assert!(matches!(result, Err(SessionError::PlanAlreadyAssigned(_))));
    }

    #[test]
    fn test_expired_plan_reissue_keeps_ledger() {
        let mut session = test_session(1024);
        let mut plan = test_plan(512, 2);
        plan.expires_at = Utc::now() - Duration::seconds(1);
        session.assign_plan(plan).unwrap();
        session.record_part(1, "etag-1".into()).unwrap();

        let fresh = test_plan(512, 2);
        session.assign_plan(fresh).unwrap();
        assert_eq!(session.parts.len(), 1);
        assert!(session.parts.contains(1));
    }

    #[test]
    fn test_reissue_rejects_geometry_change() {
        let mut session = test_session(1024);
        let mut plan = test_plan(512, 2);
        plan.expires_at = Utc::now() - Duration::seconds(1);
        session.assign_plan(plan).unwrap();

        let result = session.assign_plan(test_plan(256, 4));
        assert!(matches!(
            result,
            Err(SessionError::PlanGeometryMismatch(_))
        ));
    }

    #[test]
    fn test_part_out_of_range() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();

        assert!(matches!(
            session.record_part(0, "x".into()),
            Err(SessionError::PartOutOfRange { .. })
        ));
        assert!(matches!(
            session.record_part(3, "x".into()),
            Err(SessionError::PartOutOfRange { .. })
        ));
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();

        session.start().unwrap();
        assert_eq!(session.status, UploadStatus::Uploading);
        assert!(session.started_at_ms.is_some());

        session.record_part(1, "a".into()).unwrap();
        session.record_part(2, "b".into()).unwrap();
        assert!(session.is_ledger_complete());

        session.begin_processing().unwrap();
        session
            .finalize(CompletedAsset {
                asset_id: "asset-1".into(),
                storage_path: "projects/p1/raw/reel.mov".into(),
            })
            .unwrap();
        assert!(session.status.is_completed());
        assert_eq!(session.progress_percent(), 100.0);
    }

    #[test]
    fn test_processing_requires_full_ledger() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();
        session.start().unwrap();
        session.record_part(1, "a".into()).unwrap();

        let result = session.begin_processing();
        assert!(matches!(
            result,
            Err(SessionError::LedgerIncomplete { have: 1, need: 2 })
        ));
        assert_eq!(session.status, UploadStatus::Uploading);
    }

    #[test]
    fn test_pause_resume_preserves_parts() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();
        session.start().unwrap();
        session.record_part(1, "a".into()).unwrap();
        let started = session.started_at_ms;

        session.pause().unwrap();
        assert!(session.status.is_paused());
        assert_eq!(session.parts.len(), 1);

        session.resume().unwrap();
        assert_eq!(session.started_at_ms, started);

        let remaining = session.remaining_parts().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].part_number, 2);
    }

    #[test]
    fn test_retry_clears_error() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();
        session.start().unwrap();
        session.fail("connection reset").unwrap();
        assert!(session.status.is_failed());

        session.retry().unwrap();
        assert_eq!(session.status, UploadStatus::Uploading);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut session = test_session(1024);
        assert!(session.pause().is_err());
        assert!(session.resume().is_err());
        assert!(session.retry().is_err());
        assert!(session.begin_processing().is_err());
    }

    #[test]
    fn test_bytes_uploaded_counts_short_tail() {
        // 1000 bytes in 512-byte chunks: parts of 512 and 488
        let mut session = test_session(1000);
        session.assign_plan(test_plan(512, 2)).unwrap();
        session.record_part(2, "tail".into()).unwrap();
        assert_eq!(session.bytes_uploaded(), 488);

        session.record_part(1, "head".into()).unwrap();
        assert_eq!(session.bytes_uploaded(), 1000);
    }

    #[test]
    fn test_eta_unknown_before_first_byte() {
        let mut session = test_session(1024);
        session.assign_plan(test_plan(512, 2)).unwrap();
        session.start().unwrap();
        assert!(session.eta_seconds().is_none());

        session.record_part(1, "a".into()).unwrap();
        assert!(session.eta_seconds().is_some());
    }
}
