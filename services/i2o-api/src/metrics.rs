//! Application metrics collection and reporting.

use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Which endpoint produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Raster,
    TimeSeries,
    Vector,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Raster => "raster",
            ArtifactKind::TimeSeries => "timeseries",
            ArtifactKind::Vector => "vector",
        }
    }
}

/// Metrics collector for the API.
#[derive(Debug)]
pub struct MetricsCollector {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub renders_total: AtomicU64,
    pub render_errors: AtomicU64,

    render_times: RwLock<TimingStats>,
    fetch_times: RwLock<TimingStats>,

    start_time: Instant,
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
}

impl TimingStats {
    fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.total_us += duration_us;
        if self.min_us == 0 || duration_us < self.min_us {
            self.min_us = duration_us;
        }
        if duration_us > self.max_us {
            self.max_us = duration_us;
        }
    }

    fn summary(&self) -> TimingSummary {
        let avg_ms = if self.count == 0 {
            0.0
        } else {
            (self.total_us as f64 / self.count as f64) / 1000.0
        };
        TimingSummary {
            count: self.count,
            avg_ms,
            min_ms: self.min_us as f64 / 1000.0,
            max_ms: self.max_us as f64 / 1000.0,
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            renders_total: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            render_times: RwLock::new(TimingStats::default()),
            fetch_times: RwLock::new(TimingStats::default()),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, kind: ArtifactKind) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("api_requests_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn record_cache_hit(&self, kind: ArtifactKind) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("result_cache_hits_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn record_cache_miss(&self, kind: ArtifactKind) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("result_cache_misses_total", "kind" => kind.as_str()).increment(1);
    }

    /// Record a dataset acquisition, successful or not.
    pub async fn record_fetch(&self, duration_us: u64, success: bool) {
        if !success {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            counter!("dataset_fetch_failures_total").increment(1);
        }
        histogram!("dataset_fetch_duration_ms").record(duration_us as f64 / 1000.0);
        self.fetch_times.write().await.record(duration_us);
    }

    pub async fn record_render(&self, duration_us: u64, success: bool) {
        self.renders_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.render_errors.fetch_add(1, Ordering::Relaxed);
        }
        counter!("renders_total").increment(1);
        histogram!("render_duration_ms").record(duration_us as f64 / 1000.0);
        self.render_times.write().await.record(duration_us);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if hits + misses > 0 {
            (hits as f64 / (hits + misses) as f64) * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            renders_total: self.renders_total.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            render: self.render_times.read().await.summary(),
            fetch: self.fetch_times.read().await.summary(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time view served at `/api/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub fetch_failures: u64,
    pub renders_total: u64,
    pub render_errors: u64,
    pub render: TimingSummary,
    pub fetch: TimingSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_hit_rate_and_timings() {
        let m = MetricsCollector::new();
        m.record_cache_hit(ArtifactKind::Raster);
        m.record_cache_miss(ArtifactKind::Raster);
        m.record_cache_miss(ArtifactKind::Vector);
        m.record_cache_hit(ArtifactKind::TimeSeries);
        m.record_render(2_000, true).await;
        m.record_render(4_000, false).await;
        m.record_fetch(1_000, false).await;

        let s = m.snapshot().await;
        assert_eq!(s.cache_hit_rate, 50.0);
        assert_eq!(s.render.count, 2);
        assert_eq!(s.render.avg_ms, 3.0);
        assert_eq!(s.render_errors, 1);
        assert_eq!(s.fetch_failures, 1);
    }
}
