use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::protocol::{FileDescriptor, PartTarget, ProtocolError, StorageApi};
use crate::session::{SessionError, UploadSession};
use crate::source::ChunkSource;

use super::error::{SchedulerError, SchedulerResult};
use super::types::{DriveOutcome, DriverUpdate, SchedulerConfig};

/// Consecutive re-init rounds that confirm nothing before the driver
/// gives up instead of spinning on a backend that keeps issuing dead
/// URLs.
const MAX_STALLED_ROUNDS: u32 = 3;

/// Drives sessions' remaining parts through the transport under a
/// global bounded-parallelism cap.
///
/// One driver is shared by all sessions; the semaphore enforces the
/// invariant that at most `max_concurrent` part transfers are in
/// flight globally at any instant. Within one session parts are
/// dispatched in ascending order; across sessions, permit acquisition
/// order decides.
pub struct SessionDriver {
    api: Arc<dyn StorageApi>,
    permits: Arc<Semaphore>,
    config: SchedulerConfig,
}

/// One part's work order: target, byte range, owning upload.
#[derive(Debug, Clone)]
struct PartJob {
    target: PartTarget,
    offset: u64,
    len: usize,
    upload_id: String,
}

enum PartOutcome {
    Confirmed,
    Cancelled,
    Expired,
    Failed { part: u32, cause: String },
    SourceGone(String),
}

enum RoundEnd {
    Clean,
    Suspended,
    Expired,
}

impl SessionDriver {
    pub fn new(api: Arc<dyn StorageApi>, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            api,
            permits,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drive one session from its current ledger to a terminal or
    /// suspended state. Never panics and never returns `Err`: every
    /// failure is folded into the session state and the outcome.
    pub async fn drive(
        &self,
        session: Arc<RwLock<UploadSession>>,
        source: Arc<dyn ChunkSource>,
        cancel: CancellationToken,
        updates: mpsc::UnboundedSender<DriverUpdate>,
    ) -> DriveOutcome {
        match self
            .drive_inner(&session, &source, &cancel, &updates)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if cancel.is_cancelled() {
                    // The user got there first; the error is an
                    // artifact of tearing the transfers down.
                    return DriveOutcome::Suspended;
                }
                let reason = e.to_string();
                {
                    let mut s = session.write();
                    if s.status.is_active() {
                        let _ = s.fail(reason.clone());
                    }
                }
                metrics::record_session_failed();
                tracing::warn!(error = %reason, "session failed");
                DriveOutcome::Failed(reason)
            }
        }
    }

    async fn drive_inner(
        &self,
        session: &Arc<RwLock<UploadSession>>,
        source: &Arc<dyn ChunkSource>,
        cancel: &CancellationToken,
        updates: &mpsc::UnboundedSender<DriverUpdate>,
    ) -> SchedulerResult<DriveOutcome> {
        self.ensure_plan(session).await?;

        let mut stalled_rounds = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(DriveOutcome::Suspended);
            }

            let jobs = self.prepare_jobs(session)?;
            if jobs.is_empty() {
                break;
            }

            let confirmed_before = session.read().parts.len();
            match self
                .transfer_round(session, source, cancel, updates, jobs)
                .await?
            {
                RoundEnd::Clean => {}
                RoundEnd::Suspended => return Ok(DriveOutcome::Suspended),
                RoundEnd::Expired => {
                    if session.read().parts.len() == confirmed_before {
                        stalled_rounds += 1;
                        if stalled_rounds >= MAX_STALLED_ROUNDS {
                            return Err(SchedulerError::StalledOnExpiry(stalled_rounds));
                        }
                    } else {
                        stalled_rounds = 0;
                    }
                    tracing::info!("part targets expired, re-issuing chunk plan");
                    self.reissue_plan(session).await?;
                }
            }
        }

        self.finalize(session, cancel).await
    }

    async fn ensure_plan(&self, session: &Arc<RwLock<UploadSession>>) -> SchedulerResult<()> {
        let needs_plan = {
            let s = session.read();
            match s.plan() {
                None => true,
                Some(plan) => plan.is_expired(),
            }
        };
        if needs_plan {
            self.reissue_plan(session).await?;
        }
        Ok(())
    }

    /// Run `init` and install the plan. The ledger survives: on a
    /// re-issue after expiry only the target URLs change, and parts
    /// already confirmed are never re-sent.
    async fn reissue_plan(&self, session: &Arc<RwLock<UploadSession>>) -> SchedulerResult<()> {
        let (descriptor, ctx, session_id) = {
            let s = session.read();
            (
                FileDescriptor {
                    file_name: s.file_name.clone(),
                    content_type: s.content_type.clone(),
                    total_size: s.total_size,
                },
                s.context.clone(),
                s.id.clone(),
            )
        };

        let plan = self.api.init(&descriptor, &ctx).await?;
        tracing::info!(
            session = %session_id,
            upload_id = %plan.upload_id,
            chunks = plan.total_chunks,
            chunk_size = plan.chunk_size,
            "chunk plan issued"
        );
        session.write().assign_plan(plan)?;
        Ok(())
    }

    fn prepare_jobs(&self, session: &Arc<RwLock<UploadSession>>) -> SchedulerResult<Vec<PartJob>> {
        let s = session.read();
        let plan = s.plan().ok_or(SessionError::PlanMissing)?;
        let remaining = s.remaining_parts()?;

        Ok(remaining
            .into_iter()
            .map(|target| {
                let (offset, len) = plan.part_range(target.part_number, s.total_size);
                PartJob {
                    target,
                    offset,
                    len,
                    upload_id: plan.upload_id.clone(),
                }
            })
            .collect())
    }

    /// Dispatch one batch of remaining parts and drain it. A fatal
    /// part failure or an expired target cancels the round's
    /// remaining retries; confirmed parts recorded before the round
    /// ended are kept either way.
    async fn transfer_round(
        &self,
        session: &Arc<RwLock<UploadSession>>,
        source: &Arc<dyn ChunkSource>,
        cancel: &CancellationToken,
        updates: &mpsc::UnboundedSender<DriverUpdate>,
        jobs: Vec<PartJob>,
    ) -> SchedulerResult<RoundEnd> {
        let round_cancel = cancel.child_token();
        let mut join_set: JoinSet<PartOutcome> = JoinSet::new();

        for job in jobs {
            let api = self.api.clone();
            let permits = self.permits.clone();
            let session = session.clone();
            let source = source.clone();
            let user_cancel = cancel.clone();
            let round_cancel = round_cancel.clone();
            let updates = updates.clone();
            let config = self.config.clone();

            join_set.spawn(upload_one_part(
                api,
                permits,
                session,
                source,
                user_cancel,
                round_cancel,
                updates,
                config,
                job,
            ));
        }

        let mut expired = false;
        let mut fatal: Option<SchedulerError> = None;

        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(SchedulerError::Worker(e.to_string()));
                    }
                    round_cancel.cancel();
                    continue;
                }
            };

            match outcome {
                PartOutcome::Confirmed => {}
                PartOutcome::Cancelled => {}
                PartOutcome::Expired => {
                    expired = true;
                    round_cancel.cancel();
                }
                PartOutcome::Failed { part, cause } => {
                    if fatal.is_none() {
                        fatal = Some(SchedulerError::RetryBudgetExhausted { part, cause });
                    }
                    round_cancel.cancel();
                }
                PartOutcome::SourceGone(cause) => {
                    if fatal.is_none() {
                        fatal = Some(SchedulerError::Source(
                            crate::source::SourceError::Unavailable(cause),
                        ));
                    }
                    round_cancel.cancel();
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if expired {
            return Ok(RoundEnd::Expired);
        }
        if cancel.is_cancelled() {
            return Ok(RoundEnd::Suspended);
        }
        Ok(RoundEnd::Clean)
    }

    /// Ledger is full: transition to processing and finalize. The
    /// completion precondition lives in `begin_processing`, which
    /// refuses a partial ledger.
    async fn finalize(
        &self,
        session: &Arc<RwLock<UploadSession>>,
        cancel: &CancellationToken,
    ) -> SchedulerResult<DriveOutcome> {
        if cancel.is_cancelled() {
            return Ok(DriveOutcome::Suspended);
        }

        let (upload_id, parts, session_id) = {
            let mut s = session.write();
            s.begin_processing()?;
            let plan = s.plan().ok_or(SessionError::PlanMissing)?;
            (plan.upload_id.clone(), s.parts.to_parts(), s.id.clone())
        };

        tracing::info!(session = %session_id, parts = parts.len(), "finalizing upload");

        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.retry_base_delay,
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.config.complete_retry_window),
            ..Default::default()
        };

        let asset = loop {
            match self.api.complete(&upload_id, &parts).await {
                Ok(asset) => break asset,
                Err(e) => {
                    if cancel.is_cancelled() {
                        return Ok(DriveOutcome::Suspended);
                    }
                    match backoff.next_backoff() {
                        Some(delay) => {
                            tracing::warn!(
                                session = %session_id,
                                error = %e,
                                "complete failed, retrying in {:?}",
                                delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(SchedulerError::Protocol(e)),
                    }
                }
            }
        };

        session.write().finalize(asset.clone())?;
        metrics::record_session_completed();
        tracing::info!(
            session = %session_id,
            asset = %asset.asset_id,
            path = %asset.storage_path,
            "upload completed"
        );

        Ok(DriveOutcome::Completed(asset))
    }
}

/// One part, end to end: permit, slice, transfer with retry, ledger
/// record, bookkeeping report.
#[allow(clippy::too_many_arguments)]
async fn upload_one_part(
    api: Arc<dyn StorageApi>,
    permits: Arc<Semaphore>,
    session: Arc<RwLock<UploadSession>>,
    source: Arc<dyn ChunkSource>,
    cancel: CancellationToken,
    round_cancel: CancellationToken,
    updates: mpsc::UnboundedSender<DriverUpdate>,
    config: SchedulerConfig,
    job: PartJob,
) -> PartOutcome {
    // The permit is the global in-flight slot; holding it across the
    // transfer (and only the transfer) is what enforces the cap.
    let permit = tokio::select! {
        permit = permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return PartOutcome::Cancelled,
        },
        _ = round_cancel.cancelled() => return PartOutcome::Cancelled,
    };
    metrics::record_parts_in_flight(config.max_concurrent - permits.available_permits());

    let bytes = match source.read_range(job.offset, job.len).await {
        Ok(bytes) => bytes,
        Err(e) => return PartOutcome::SourceGone(e.to_string()),
    };

    let result = upload_with_retry(api.as_ref(), &job.target, bytes, &round_cancel, &config).await;

    drop(permit);
    metrics::record_parts_in_flight(config.max_concurrent - permits.available_permits());

    match result {
        Ok(etag) => {
            // Cancellation purity: a transfer that finished after the
            // user's signal must not mutate the ledger.
            if cancel.is_cancelled() {
                return PartOutcome::Cancelled;
            }

            let part_number = job.target.part_number;
            let (session_id, snapshot) = {
                let mut s = session.write();
                if let Err(e) = s.record_part(part_number, etag.clone()) {
                    return PartOutcome::Failed {
                        part: part_number,
                        cause: e.to_string(),
                    };
                }
                (s.id.clone(), s.snapshot())
            };

            metrics::record_part_uploaded(job.len as u64);
            tracing::debug!(session = %session_id, part = part_number, "part confirmed");
            let _ = updates.send(DriverUpdate {
                session_id,
                part_number,
                snapshot,
            });

            report_with_retry(
                api.as_ref(),
                &job.upload_id,
                part_number,
                &etag,
                job.len as u64,
                &round_cancel,
                &config,
            )
            .await;

            PartOutcome::Confirmed
        }
        Err(e) if e.is_cancelled() => PartOutcome::Cancelled,
        Err(e) if e.is_expired() => PartOutcome::Expired,
        Err(e) => PartOutcome::Failed {
            part: job.target.part_number,
            cause: e.to_string(),
        },
    }
}

/// Transfer one part with bounded attempts, doubling delay plus
/// jitter between them. Cancellation and expiry pass straight
/// through; everything else burns an attempt.
async fn upload_with_retry(
    api: &dyn StorageApi,
    target: &PartTarget,
    bytes: Bytes,
    cancel: &CancellationToken,
    config: &SchedulerConfig,
) -> Result<String, ProtocolError> {
    let mut attempts = 0u32;
    let mut delay = config.retry_base_delay;

    loop {
        if cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }

        let attempt = tokio::time::timeout(
            config.chunk_timeout,
            api.upload_part(target, bytes.clone(), cancel),
        );
        let result = match attempt.await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Chunk(format!(
                "part {} made no progress within {:?}",
                target.part_number, config.chunk_timeout
            ))),
        };

        match result {
            Ok(etag) => return Ok(etag),
            Err(e) if e.is_cancelled() || e.is_expired() => return Err(e),
            Err(e) if attempts + 1 < config.chunk_retry_limit => {
                attempts += 1;
                metrics::record_part_retry();
                tracing::warn!(
                    part = target.part_number,
                    "transfer failed (attempt {}/{}): {}",
                    attempts,
                    config.chunk_retry_limit,
                    e
                );

                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=50));
                tokio::select! {
                    _ = tokio::time::sleep(delay + jitter) => {}
                    _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
                }
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Report a confirmed part on its own backoff budget. The ledger, not
/// the report, is the completion authority; when the window runs out
/// we log and move on rather than fail a part that already landed.
async fn report_with_retry(
    api: &dyn StorageApi,
    upload_id: &str,
    part_number: u32,
    etag: &str,
    bytes: u64,
    cancel: &CancellationToken,
    config: &SchedulerConfig,
) {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.retry_base_delay,
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(config.report_retry_window),
        ..Default::default()
    };

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match api.report_chunk(upload_id, part_number, etag, bytes).await {
            Ok(()) => return,
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    metrics::record_report_retry();
                    tracing::warn!(
                        part = part_number,
                        "report failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                None => {
                    tracing::warn!(
                        part = part_number,
                        "giving up on report for part after {:?}: {}",
                        config.report_retry_window,
                        e
                    );
                    return;
                }
            },
        }
    }
}
