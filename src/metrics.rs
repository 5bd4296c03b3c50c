// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for sleeve-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `sleeve_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: cluster, combined, marker
//! - `action`: inserted, updated
//! - `operation`: save, batch_save, force_redetection

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record persisted records
pub fn record_saves(entity: &str, action: &str, count: u64) {
    counter!(
        "sleeve_engine_saves_total",
        "entity" => entity.to_string(),
        "action" => action.to_string()
    )
    .increment(count);
}

/// Record rows removed by scoped replacement that were not written back
pub fn record_ghosts_removed(entity: &str, count: u64) {
    counter!(
        "sleeve_engine_ghosts_removed_total",
        "entity" => entity.to_string()
    )
    .increment(count);
}

/// Record batch size
pub fn record_batch_size(entity: &str, count: usize) {
    histogram!(
        "sleeve_engine_batch_size",
        "entity" => entity.to_string()
    )
    .record(count as f64);
}

/// Record zones whose flags were raised by a cascade
pub fn record_cascade(tier: &str, zones: u64) {
    counter!(
        "sleeve_engine_cascaded_zones_total",
        "tier" => tier.to_string()
    )
    .increment(zones);
}

/// Record a rolled-back write
pub fn record_rollback(entity: &str, operation: &str) {
    counter!(
        "sleeve_engine_rollbacks_total",
        "entity" => entity.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a category marker update
pub fn record_marker_advance(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "sleeve_engine_marker_updates_total",
        "status" => status
    )
    .increment(1);
}

/// Set snapshot index size
pub fn set_snapshot_index_entries(count: usize) {
    gauge!("sleeve_engine_snapshot_index_entries").set(count as f64);
}

/// Record operation latency
pub fn record_latency(entity: &str, operation: &str, duration: Duration) {
    histogram!(
        "sleeve_engine_operation_seconds",
        "entity" => entity.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    entity: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(entity: &'static str, operation: &'static str) -> Self {
        Self {
            entity,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.entity, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::collections::HashMap;

    #[test]
    fn test_saves_are_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_saves("cluster", "inserted", 2);
            record_saves("combined", "updated", 1);
            record_ghosts_removed("cluster", 3);
        });

        let mut counters: HashMap<String, u64> = HashMap::new();
        for (key, _, _, value) in snapshotter.snapshot().into_vec() {
            if let DebugValue::Counter(v) = value {
                *counters.entry(key.key().name().to_string()).or_default() += v;
            }
        }
        assert_eq!(counters.get("sleeve_engine_saves_total"), Some(&3));
        assert_eq!(counters.get("sleeve_engine_ghosts_removed_total"), Some(&3));
    }

    #[test]
    fn test_api_without_recorder() {
        record_batch_size("cluster", 12);
        record_cascade("combined", 4);
        record_rollback("cluster", "batch_save");
        record_marker_advance(true);
        set_snapshot_index_entries(10);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("cluster", "save");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
