//! Gateway counters.
//!
//! One instance is created at startup and shared through the application
//! state; `/health` reports a snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Requests forwarded to a translation shard
    proxied: AtomicUsize,

    /// HTML responses buffered and rewritten
    html_rewrites: AtomicUsize,

    /// Non-HTML responses streamed through
    streamed: AtomicUsize,

    /// Native-language redirects issued
    native_redirects: AtomicUsize,

    /// Requests rejected with 400
    rejected: AtomicUsize,

    /// Upstream connection failures and timeouts (502)
    upstream_failures: AtomicUsize,

    /// Requests forwarded to the origin
    passthrough: AtomicUsize,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_proxied(&self) {
        self.proxied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_html_rewrite(&self) {
        self.html_rewrites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_streamed(&self) {
        self.streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_native_redirect(&self) {
        self.native_redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    /// Generate a snapshot of all counters.
    pub fn report(&self) -> MetricsReport {
        let proxied = self.proxied.load(Ordering::Relaxed);
        let upstream_failures = self.upstream_failures.load(Ordering::Relaxed);

        // Failure rate over proxied requests (0.0 when none)
        let upstream_failure_rate = if proxied > 0 {
            upstream_failures as f64 / proxied as f64
        } else {
            0.0
        };

        MetricsReport {
            proxied,
            html_rewrites: self.html_rewrites.load(Ordering::Relaxed),
            streamed: self.streamed.load(Ordering::Relaxed),
            native_redirects: self.native_redirects.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            upstream_failures,
            upstream_failure_rate,
            passthrough: self.passthrough.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub proxied: usize,
    pub html_rewrites: usize,
    pub streamed: usize,
    pub native_redirects: usize,
    pub rejected: usize,
    pub upstream_failures: usize,
    pub upstream_failure_rate: f64,
    pub passthrough: usize,
}
