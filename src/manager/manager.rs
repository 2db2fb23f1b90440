use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::manager::admission;
use crate::manager::error::{ManagerError, ManagerResult, ValidationError};
use crate::manager::types::{
    AdmissionResult, BatchProgress, CompletedItem, FileSpec, RejectedFile, SourceSpec,
    UploadEvent, UploadManagerConfig,
};
use crate::metrics;
use crate::protocol::{StorageApi, UploadContext};
use crate::scheduler::{DriveOutcome, DriverUpdate, SessionDriver};
use crate::session::{LedgerStore, SessionSnapshot, UploadSession, UploadStatus};
use crate::source::{ChunkSource, FileSource, MemorySource};

/// A live session: its state, its bytes, and the token that tears its
/// transfers down. The token is replaced on every (re)start, so a
/// transfer belonging to a previous run can never outlive its signal.
struct SessionHandle {
    session: Arc<RwLock<UploadSession>>,
    source: Arc<dyn ChunkSource>,
    cancel: RwLock<CancellationToken>,
}

/// Orchestrates one-to-many upload sessions: admission, lifecycle
/// commands, aggregation. The working set is the single owned
/// collection of in-flight uploads; it is only reachable through
/// these operations.
pub struct UploadManager {
    config: UploadManagerConfig,
    driver: Arc<SessionDriver>,
    sessions: Arc<DashMap<String, Arc<SessionHandle>>>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<UploadEvent>>>,
    updates_tx: mpsc::UnboundedSender<DriverUpdate>,
    store: Option<Arc<LedgerStore>>,
    /// Cleared when the batch-completion event fires; re-armed by the
    /// next admission.
    batch_open: Arc<AtomicBool>,
}

impl UploadManager {
    pub fn new(
        api: Arc<dyn StorageApi>,
        config: UploadManagerConfig,
        store: Option<Arc<LedgerStore>>,
    ) -> Self {
        metrics::init_metrics();

        let driver = Arc::new(SessionDriver::new(api, config.scheduler.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let manager = Self {
            config,
            driver,
            sessions: Arc::new(DashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            updates_tx,
            store,
            batch_open: Arc::new(AtomicBool::new(false)),
        };

        manager.spawn_update_pump(updates_rx);
        manager
    }

    /// Take the event stream. Can only be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.lock().take()
    }

    /// Validate and admit a batch of files. Accepted files become
    /// `Pending` sessions and are handed to the scheduler
    /// immediately; rejected files never become sessions and do not
    /// disturb the rest of the batch.
    pub async fn admit(&self, files: Vec<FileSpec>) -> AdmissionResult {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for spec in files {
            if let Err(reason) = admission::validate(&self.config, self.sessions.len(), &spec) {
                tracing::info!(file = %spec.file_name, "admission rejected: {}", reason);
                rejected.push(RejectedFile {
                    file_name: spec.file_name,
                    reason,
                });
                continue;
            }

            let FileSpec {
                file_name,
                content_type,
                source,
                ..
            } = spec;

            let (source, source_path): (Arc<dyn ChunkSource>, Option<String>) = match source {
                SourceSpec::Path(path) => match FileSource::open(&path).await {
                    Ok(file_source) => {
                        let display = path.display().to_string();
                        (Arc::new(file_source), Some(display))
                    }
                    Err(e) => {
                        rejected.push(RejectedFile {
                            file_name,
                            reason: ValidationError::Unreadable(e.to_string()),
                        });
                        continue;
                    }
                },
                SourceSpec::Memory(bytes) => (Arc::new(MemorySource::new(bytes)), None),
            };

            let id = uuid::Uuid::new_v4().to_string();
            let context = UploadContext {
                project_id: self.config.project_id.clone(),
                category: Some(self.config.file_kind.category().to_string()),
            };
            let session = UploadSession::new(
                id.clone(),
                file_name.clone(),
                content_type,
                source.total_size(),
                source_path,
                context,
            );

            let handle = Arc::new(SessionHandle {
                session: Arc::new(RwLock::new(session)),
                source,
                cancel: RwLock::new(CancellationToken::new()),
            });

            self.sessions.insert(id.clone(), handle.clone());
            self.batch_open.store(true, Ordering::SeqCst);
            self.checkpoint(&handle).await;

            tracing::info!(session = %id, file = %file_name, "file admitted");
            self.spawn_driver(&id, handle);
            accepted.push(id);
        }

        AdmissionResult { accepted, rejected }
    }

    /// Pause: cancels the session's in-flight transfers; parts
    /// already acknowledged are retained and never re-sent.
    pub async fn pause(&self, session_id: &str) -> ManagerResult<()> {
        let handle = self.handle(session_id)?;
        handle.session.write().pause()?;
        handle.cancel.read().cancel();
        self.checkpoint(&handle).await;
        tracing::info!(session = %session_id, "paused");
        Ok(())
    }

    /// Resume: the scheduler recomputes the remaining-parts set and
    /// continues from there.
    pub async fn resume(&self, session_id: &str) -> ManagerResult<()> {
        let handle = self.handle(session_id)?;
        handle.session.write().resume()?;
        tracing::info!(session = %session_id, "resumed");
        self.spawn_driver(session_id, handle);
        Ok(())
    }

    /// Retry a failed session: clears the error and re-admits it to
    /// the scheduler. An expired plan is re-issued first, preserving
    /// already-uploaded parts.
    pub async fn retry(&self, session_id: &str) -> ManagerResult<()> {
        let handle = self.handle(session_id)?;
        handle.session.write().retry()?;
        tracing::info!(session = %session_id, "retrying");
        self.spawn_driver(session_id, handle);
        Ok(())
    }

    /// Cancel: aborts in-flight transfers and drops the session from
    /// the working set. Server-side multipart leftovers are an
    /// accepted leak, bounded by the backend's expiry policy.
    pub async fn cancel(&self, session_id: &str) -> ManagerResult<()> {
        let (_, handle) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))?;
        handle.cancel.read().cancel();

        if let Some(ref store) = self.store {
            let _ = store.delete(session_id).await;
        }

        tracing::info!(session = %session_id, "cancelled and removed");
        // dropping the last incomplete session can finish the batch
        maybe_emit_batch(&self.sessions, &self.events_tx, &self.batch_open);
        Ok(())
    }

    /// Dismiss a session from the working set; for a session still in
    /// flight this is a cancel.
    pub async fn remove(&self, session_id: &str) -> ManagerResult<()> {
        self.cancel(session_id).await
    }

    pub fn progress(&self, session_id: &str) -> ManagerResult<SessionSnapshot> {
        Ok(self.handle(session_id)?.session.read().snapshot())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|entry| entry.value().session.read().snapshot())
            .collect()
    }

    pub fn overall_progress(&self) -> BatchProgress {
        let total_sessions = self.sessions.len();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut bytes_uploaded = 0u64;
        let mut total_bytes = 0u64;

        for entry in self.sessions.iter() {
            let s = entry.value().session.read();
            total_bytes += s.total_size;
            bytes_uploaded += s.bytes_uploaded();
            if s.status.is_completed() {
                completed += 1;
            } else if s.status.is_failed() {
                failed += 1;
            }
        }

        let progress_percent = if total_bytes > 0 {
            (bytes_uploaded as f32 / total_bytes as f32) * 100.0
        } else {
            0.0
        };

        BatchProgress {
            total_sessions,
            completed,
            failed,
            bytes_uploaded,
            total_bytes,
            progress_percent,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Re-admit persisted sessions after a restart. Sessions whose
    /// source file is still readable come back `Paused`, confirmed
    /// parts intact, waiting for `resume`; sessions whose source is
    /// gone are marked errored in the store and skipped.
    pub async fn recover(&self) -> ManagerResult<Vec<SessionSnapshot>> {
        let store = self
            .store
            .as_ref()
            .ok_or(ManagerError::StoreNotConfigured)?;

        let mut recovered = Vec::new();
        for mut session in store.list_resumable().await? {
            if self.sessions.contains_key(&session.id) {
                continue;
            }

            let source: Option<Arc<dyn ChunkSource>> = match session.source_path.as_deref() {
                Some(path) => match FileSource::open(path).await {
                    Ok(file_source) => Some(Arc::new(file_source)),
                    Err(e) => {
                        session.mark_unavailable(format!("source unavailable after restart: {e}"));
                        None
                    }
                },
                None => {
                    session.mark_unavailable("in-memory source does not survive restart");
                    None
                }
            };

            match source {
                Some(source) => {
                    session.mark_recovered();
                    if let Err(e) = store.save(&session).await {
                        tracing::warn!(session = %session.id, "checkpoint failed: {}", e);
                    }

                    let snapshot = session.snapshot();
                    let id = session.id.clone();
                    tracing::info!(
                        session = %id,
                        parts = session.parts.len(),
                        "session recovered from ledger store"
                    );

                    let handle = Arc::new(SessionHandle {
                        session: Arc::new(RwLock::new(session)),
                        source,
                        cancel: RwLock::new(CancellationToken::new()),
                    });
                    self.sessions.insert(id, handle);
                    self.batch_open.store(true, Ordering::SeqCst);
                    recovered.push(snapshot);
                }
                None => {
                    if let Err(e) = store.save(&session).await {
                        tracing::warn!(session = %session.id, "checkpoint failed: {}", e);
                    }
                }
            }
        }

        Ok(recovered)
    }

    fn handle(&self, session_id: &str) -> ManagerResult<Arc<SessionHandle>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))
    }

    async fn checkpoint(&self, handle: &SessionHandle) {
        if let Some(ref store) = self.store {
            let session = handle.session.read().clone();
            if let Err(e) = store.save(&session).await {
                tracing::warn!(session = %session.id, "checkpoint failed: {}", e);
            }
        }
    }

    /// Hand a session to the scheduler with a fresh cancellation
    /// token, and handle its terminal outcome.
    fn spawn_driver(&self, session_id: &str, handle: Arc<SessionHandle>) {
        {
            let mut s = handle.session.write();
            if s.status == UploadStatus::Pending {
                if let Err(e) = s.start() {
                    tracing::warn!(session = %session_id, "cannot start session: {}", e);
                    return;
                }
                metrics::record_session_started();
            }
        }

        let file_name = handle.session.read().file_name.clone();
        let _ = self.events_tx.send(UploadEvent::SessionStarted {
            session_id: session_id.to_string(),
            file_name,
        });

        let cancel = CancellationToken::new();
        *handle.cancel.write() = cancel.clone();

        let driver = self.driver.clone();
        let updates = self.updates_tx.clone();
        let sessions = self.sessions.clone();
        let events = self.events_tx.clone();
        let store = self.store.clone();
        let batch_open = self.batch_open.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let outcome = driver
                .drive(
                    handle.session.clone(),
                    handle.source.clone(),
                    cancel,
                    updates,
                )
                .await;

            if let Some(ref store) = store {
                let checkpoint = handle.session.read().clone();
                if let Err(e) = store.save(&checkpoint).await {
                    tracing::warn!(session = %session_id, "checkpoint failed: {}", e);
                }
            }

            match outcome {
                DriveOutcome::Completed(asset) => {
                    let _ = events.send(UploadEvent::SessionCompleted {
                        session_id: session_id.clone(),
                        asset,
                    });
                    maybe_emit_batch(&sessions, &events, &batch_open);
                }
                DriveOutcome::Failed(reason) => {
                    let _ = events.send(UploadEvent::SessionFailed {
                        session_id: session_id.clone(),
                        reason,
                    });
                }
                DriveOutcome::Suspended => {}
            }
        });
    }

    fn spawn_update_pump(&self, mut updates_rx: mpsc::UnboundedReceiver<DriverUpdate>) {
        let sessions = self.sessions.clone();
        let store = self.store.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            while let Some(update) = updates_rx.recv().await {
                if let Some(ref store) = store {
                    let checkpoint = sessions
                        .get(&update.session_id)
                        .map(|entry| entry.value().session.read().clone());
                    if let Some(session) = checkpoint {
                        if let Err(e) = store.save(&session).await {
                            tracing::warn!(
                                session = %update.session_id,
                                "checkpoint failed: {}",
                                e
                            );
                        }
                    }
                }
                let _ = events.send(UploadEvent::SessionProgress {
                    snapshot: update.snapshot,
                });
            }
        });
    }
}

/// Emit the one batch-completion event once every live session has
/// completed. Re-armed by the next admission.
fn maybe_emit_batch(
    sessions: &DashMap<String, Arc<SessionHandle>>,
    events: &mpsc::UnboundedSender<UploadEvent>,
    batch_open: &AtomicBool,
) {
    if sessions.is_empty() {
        return;
    }

    let mut items = Vec::new();
    for entry in sessions.iter() {
        let s = entry.value().session.read();
        match (&s.status, &s.asset) {
            (UploadStatus::Completed, Some(asset)) => items.push(CompletedItem {
                asset_id: asset.asset_id.clone(),
                file_name: s.file_name.clone(),
                storage_path: asset.storage_path.clone(),
            }),
            _ => return,
        }
    }

    if batch_open.swap(false, Ordering::SeqCst) {
        tracing::info!(count = items.len(), "batch completed");
        let _ = events.send(UploadEvent::BatchCompleted { items });
    }
}
