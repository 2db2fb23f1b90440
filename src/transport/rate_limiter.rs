//! Bandwidth limiting for part transfers using the governor crate

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter gating part uploads by bytes/second and parts/second.
///
/// Studio machines often share an office uplink with live editing
/// sessions; capping the pipeline keeps a 50 GB batch from starving
/// everything else.
pub struct UploadRateLimiter {
    /// Bytes per second limiter (1KB units)
    bytes_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    /// Parts per second limiter
    parts_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    enabled: bool,
}

impl UploadRateLimiter {
    /// Create a new rate limiter with specified limits
    ///
    /// # Arguments
    /// * `bytes_per_second` - Maximum bytes per second (0 = unlimited)
    /// * `parts_per_second` - Maximum parts per second (0 = unlimited)
    pub fn new(bytes_per_second: u32, parts_per_second: u32) -> Self {
        let bytes_limiter = if bytes_per_second > 0 {
            // 1KB units for finer control
            let kb_per_second = (bytes_per_second / 1024).max(1);
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(kb_per_second).unwrap()))
        } else {
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(u32::MAX).unwrap()))
        };

        let parts_limiter = if parts_per_second > 0 {
            RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(parts_per_second).unwrap(),
            ))
        } else {
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(u32::MAX).unwrap()))
        };

        Self {
            bytes_limiter: Arc::new(bytes_limiter),
            parts_limiter: Arc::new(parts_limiter),
            enabled: bytes_per_second > 0 || parts_per_second > 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// Wait until we're allowed to send the specified number of bytes
    pub async fn wait_for_bytes(&self, bytes: usize) {
        if !self.enabled {
            return;
        }

        let kb_units = (bytes.div_ceil(1024)).max(1) as u32;

        for _ in 0..kb_units {
            self.bytes_limiter.until_ready().await;
        }
    }

    /// Wait until we're allowed to send a part
    pub async fn wait_for_part(&self) {
        if !self.enabled {
            return;
        }

        self.parts_limiter.until_ready().await;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for UploadRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Clone for UploadRateLimiter {
    fn clone(&self) -> Self {
        Self {
            bytes_limiter: self.bytes_limiter.clone(),
            parts_limiter: self.parts_limiter.clone(),
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_unlimited_rate_limiter() {
        let limiter = UploadRateLimiter::unlimited();

        assert!(!limiter.is_enabled());

        // Should not block
        let start = Instant::now();
        for _ in 0..100 {
            limiter.wait_for_part().await;
        }
        let elapsed = start.elapsed();

        assert!(elapsed.as_millis() < 100);
    }

    #[tokio::test]
    async fn test_rate_limited_parts() {
        // 10 parts per second
        let limiter = UploadRateLimiter::new(0, 10);

        assert!(limiter.is_enabled());

        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait_for_part().await;
        }
        let elapsed = start.elapsed();

        // The governor crate allows burst, so initial parts may be
        // immediate; we mainly test that the limiter doesn't block
        // indefinitely.
        assert!(elapsed.as_millis() < 5000, "Rate limiter took too long");
    }
}
