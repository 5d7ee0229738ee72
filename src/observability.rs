use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::info;

use crate::api::ApiError;

/// Things worth counting on the way to and from the mapping service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEvent {
    Request,
    TokenRefresh,
    CacheHit,
    CacheMiss,
}

/// Process-wide counters, logged once when the CLI exits.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    requests: AtomicU64,
    token_refreshes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    unavailable: AtomicU64,
    not_authorized: AtomicU64,
    rejected: AtomicU64,
    unexpected: AtomicU64,
}

impl ApiMetrics {
    pub fn record(&self, event: ApiEvent) {
        let counter = match event {
            ApiEvent::Request => &self.requests,
            ApiEvent::TokenRefresh => &self.token_refreshes,
            ApiEvent::CacheHit => &self.cache_hits,
            ApiEvent::CacheMiss => &self.cache_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed call under the same buckets callers react to.
    pub fn record_failure(&self, error: &ApiError) {
        let counter = match error {
            ApiError::Unavailable(_) => &self.unavailable,
            ApiError::NotAuthorized { .. } => &self.not_authorized,
            ApiError::Validation { .. } => &self.rejected,
            ApiError::Unexpected { .. } => &self.unexpected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ApiStats {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ApiStats {
            requests: read(&self.requests),
            token_refreshes: read(&self.token_refreshes),
            cache_hits: read(&self.cache_hits),
            cache_misses: read(&self.cache_misses),
            failures: read(&self.unavailable)
                + read(&self.not_authorized)
                + read(&self.rejected)
                + read(&self.unexpected),
            unavailable: read(&self.unavailable),
            not_authorized: read(&self.not_authorized),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.snapshot();
        if stats.requests == 0 {
            return;
        }
        info!(
            requests = stats.requests,
            refreshes = stats.token_refreshes,
            failures = stats.failures,
            unavailable = stats.unavailable,
            not_authorized = stats.not_authorized,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            "Mapping API usage"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApiStats {
    pub requests: u64,
    pub token_refreshes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub unavailable: u64,
    pub not_authorized: u64,
}

static API_METRICS: LazyLock<ApiMetrics> = LazyLock::new(ApiMetrics::default);

pub fn api_metrics() -> &'static ApiMetrics {
    &API_METRICS
}

/// Wall-clock timer for a long-running curator operation such as automap.
pub struct OperationTimer {
    label: &'static str,
    started: Instant,
}

impl OperationTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }

    /// Log and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        info!(operation = self.label, elapsed_ms = elapsed.as_millis() as u64, "Finished");
        elapsed
    }
}
