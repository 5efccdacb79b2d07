use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Contadores de salud de reproducción a nivel proceso.
///
/// Solo contadores monotónicos y una media acumulada, sin ventanas de
/// tiempo. Se muta bajo su propio lock desde cualquier tenant.
#[derive(Debug, Default)]
pub struct PlaybackMetrics {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    plays_started: u64,
    plays_failed: u64,
    fallback_used: u64,
    startup_total_ms: f64,
    startup_samples: u64,
    extractor_failures: HashMap<String, u64>,
    last_fallback_source: Option<String>,
}

/// Lectura consistente de las métricas, serializable para diagnósticos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub plays_started: u64,
    pub plays_failed: u64,
    pub fallback_used: u64,
    pub avg_startup_ms: f64,
    pub extractor_failures_by_type: HashMap<String, u64>,
    pub last_fallback_source: Option<String>,
}

impl PlaybackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_started(&self) {
        self.inner.lock().plays_started += 1;
    }

    pub fn incr_failed(&self) {
        self.inner.lock().plays_failed += 1;
    }

    pub fn incr_fallback(&self) {
        self.inner.lock().fallback_used += 1;
    }

    /// Latencia de arranque medida de punta a punta en la resolución.
    pub fn observe_startup(&self, ms: f64) {
        let mut inner = self.inner.lock();
        inner.startup_total_ms += ms;
        inner.startup_samples += 1;
    }

    pub fn record_extractor_failure(&self, category: &str) {
        let mut inner = self.inner.lock();
        *inner
            .extractor_failures
            .entry(category.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_fallback_source(&self, source: &str) {
        self.inner.lock().last_fallback_source = Some(source.to_string());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let avg = if inner.startup_samples == 0 {
            0.0
        } else {
            inner.startup_total_ms / inner.startup_samples as f64
        };
        MetricsSnapshot {
            plays_started: inner.plays_started,
            plays_failed: inner.plays_failed,
            fallback_used: inner.fallback_used,
            avg_startup_ms: (avg * 100.0).round() / 100.0,
            extractor_failures_by_type: inner.extractor_failures.clone(),
            last_fallback_source: inner.last_fallback_source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters_and_mean() {
        let metrics = PlaybackMetrics::new();
        metrics.incr_started();
        metrics.incr_started();
        metrics.incr_failed();
        metrics.incr_fallback();
        metrics.observe_startup(100.0);
        metrics.observe_startup(200.0);
        metrics.record_extractor_failure("throttle");
        metrics.record_extractor_failure("throttle");
        metrics.record_fallback_source("https://stream");

        let snap = metrics.snapshot();
        assert_eq!(snap.plays_started, 2);
        assert_eq!(snap.plays_failed, 1);
        assert_eq!(snap.fallback_used, 1);
        assert_eq!(snap.avg_startup_ms, 150.0);
        assert_eq!(snap.extractor_failures_by_type["throttle"], 2);
        assert_eq!(snap.last_fallback_source.as_deref(), Some("https://stream"));
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = PlaybackMetrics::new().snapshot();
        assert_eq!(snap.plays_started, 0);
        assert_eq!(snap.avg_startup_ms, 0.0);
        assert!(snap.last_fallback_source.is_none());
    }
}
