//! In-memory storage backend with injectable failures, shared by the
//! pipeline integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use studio_uplink::protocol::{
    ChunkPlan, CompletedAsset, FileDescriptor, PartTarget, ProtocolError, StorageApi,
    UploadContext, UploadedPart,
};

#[derive(Default)]
pub struct MockBackend {
    pub chunk_size: u64,
    pub part_delay: Duration,
    /// part number -> remaining transfer failures to inject
    pub failing_parts: Mutex<HashMap<u32, u32>>,
    /// per-file plan epoch; bumped on each re-init
    epochs: Mutex<HashMap<String, u32>>,
    /// epoch-1 targets start returning 403-style expiry after this
    /// many confirmed uploads
    pub expire_epoch_after: Mutex<Option<u32>>,

    pub successful_uploads: AtomicU32,
    pub upload_log: Mutex<Vec<u32>>,
    pub reports: Mutex<Vec<(String, u32)>>,
    pub completes: Mutex<Vec<(String, Vec<UploadedPart>)>>,
    in_flight: AtomicUsize,
    pub high_water: AtomicUsize,
}

impl MockBackend {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            ..Default::default()
        }
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    pub fn fail_part(self, part: u32, times: u32) -> Self {
        self.failing_parts.lock().insert(part, times);
        self
    }

    pub fn expire_after(self, uploads: u32) -> Self {
        *self.expire_epoch_after.lock() = Some(uploads);
        self
    }

    pub fn uploads_of(&self) -> Vec<u32> {
        self.upload_log.lock().clone()
    }

    pub fn clear_upload_log(&self) {
        self.upload_log.lock().clear();
    }

    fn url_parts(url: &str) -> (String, u32, u32) {
        // mock://<file>/epoch-<e>/part/<n>
        let trimmed = url.strip_prefix("mock://").unwrap_or(url);
        let mut segments = trimmed.split('/');
        let file = segments.next().unwrap_or_default().to_string();
        let epoch = segments
            .next()
            .and_then(|s| s.strip_prefix("epoch-"))
            .and_then(|e| e.parse().ok())
            .unwrap_or(0);
        let part = segments
            .nth(1)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        (file, epoch, part)
    }
}

#[async_trait]
impl StorageApi for MockBackend {
    async fn init(
        &self,
        file: &FileDescriptor,
        _ctx: &UploadContext,
    ) -> Result<ChunkPlan, ProtocolError> {
        if file.total_size == 0 {
            return Err(ProtocolError::Init("file is empty".into()));
        }

        let epoch = {
            let mut epochs = self.epochs.lock();
            let epoch = epochs.entry(file.file_name.clone()).or_insert(0);
            *epoch += 1;
            *epoch
        };

        let total_chunks = file.total_size.div_ceil(self.chunk_size) as u32;
        Ok(ChunkPlan {
            upload_id: format!("up-{}", file.file_name),
            storage_upload_id: format!("r2-{}", file.file_name),
            storage_path: format!("projects/p1/{}", file.file_name),
            chunk_size: self.chunk_size,
            total_chunks,
            part_targets: (1..=total_chunks)
                .map(|n| PartTarget {
                    part_number: n,
                    url: format!("mock://{}/epoch-{epoch}/part/{n}", file.file_name),
                })
                .collect(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn upload_part(
        &self,
        target: &PartTarget,
        _bytes: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String, ProtocolError> {
        let (file, url_epoch, part) = Self::url_parts(&target.url);

        let current_epoch = self.epochs.lock().get(&file).copied().unwrap_or(0);
        if url_epoch < current_epoch {
            return Err(ProtocolError::Expired);
        }
        if let Some(threshold) = *self.expire_epoch_after.lock() {
            if url_epoch == 1 && self.successful_uploads.load(Ordering::SeqCst) >= threshold {
                return Err(ProtocolError::Expired);
            }
        }

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(in_flight, Ordering::SeqCst);

        let transfer = async {
            if !self.part_delay.is_zero() {
                tokio::time::sleep(self.part_delay).await;
            }
        };
        tokio::select! {
            _ = transfer => {}
            _ = cancel.cancelled() => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(ProtocolError::Cancelled);
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failing = self.failing_parts.lock();
            match failing.get_mut(&part) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(ProtocolError::Chunk(format!(
                "injected network failure for part {part}"
            )));
        }

        self.successful_uploads.fetch_add(1, Ordering::SeqCst);
        self.upload_log.lock().push(part);
        Ok(format!("etag-{part}-{url_epoch}"))
    }

    async fn report_chunk(
        &self,
        upload_id: &str,
        part_number: u32,
        _etag: &str,
        _bytes: u64,
    ) -> Result<(), ProtocolError> {
        self.reports.lock().push((upload_id.to_string(), part_number));
        Ok(())
    }

    async fn complete(
        &self,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<CompletedAsset, ProtocolError> {
        self.completes
            .lock()
            .push((upload_id.to_string(), parts.to_vec()));
        Ok(CompletedAsset {
            asset_id: format!("asset-{upload_id}"),
            storage_path: format!("projects/p1/{}", upload_id.trim_start_matches("up-")),
        })
    }
}
