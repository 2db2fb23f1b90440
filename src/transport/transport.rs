use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::protocol::PartTarget;

use super::error::{TransportError, TransportResult};
use super::rate_limiter::UploadRateLimiter;

/// Performs a single part's network transfer: one HTTP `PUT` of a
/// byte slice against a pre-signed destination URL. Success is a 2xx
/// response carrying an `ETag` header; the header value is the
/// integrity token replayed at finalize time.
///
/// Every transfer is cancellable mid-flight. A cancellation result is
/// `TransportError::Cancelled`, which callers discard rather than
/// retry or record.
pub struct ChunkTransport {
    http: reqwest::Client,
    limiter: Option<UploadRateLimiter>,
}

impl ChunkTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: UploadRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Upload one part slice to its pre-signed target, returning the
    /// integrity token. HTTP 403 maps to `Expired`: pre-signed URLs
    /// outlive their window, they don't half-work.
    pub async fn put_part(
        &self,
        target: &PartTarget,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> TransportResult<String> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        if let Some(ref limiter) = self.limiter {
            tokio::select! {
                _ = limiter.wait_for_part() => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
            tokio::select! {
                _ = limiter.wait_for_bytes(bytes.len()) => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }

        let request = self.http.put(&target.url).body(bytes).send();

        let response = tokio::select! {
            result = request => result.map_err(|e| TransportError::Http(e.to_string()))?,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(TransportError::Expired(status.as_u16()));
        }
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "part {} PUT returned {}",
                target.part_number, status
            )));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .ok_or(TransportError::MissingIntegrityToken)?;

        tracing::debug!(
            part = target.part_number,
            etag = %etag,
            "part transfer acknowledged"
        );

        Ok(etag)
    }
}

impl Default for ChunkTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let transport = ChunkTransport::new();
        let target = PartTarget {
            part_number: 1,
            url: "https://storage.invalid/part/1".into(),
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .put_part(&target, Bytes::from_static(b"data"), &cancel)
            .await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let transport = ChunkTransport::new();
        let target = PartTarget {
            part_number: 1,
            // .invalid TLD never resolves
            url: "http://storage.invalid/part/1".into(),
        };

        let result = transport
            .put_part(&target, Bytes::from_static(b"data"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Http(_))));
    }
}
