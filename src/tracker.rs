use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;

/// Default maximum number of recent call events to keep.
const DEFAULT_MAX_RECENT: usize = 500;

/// A single tool call event recorded by the tracker.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub tool_name: String,
    pub backend_name: String,
    pub timestamp: Instant,
    pub duration: Duration,
    pub success: bool,
}

/// Serializable summary of a call event for the recent-tools resource.
#[derive(Debug, Clone, Serialize)]
pub struct CallEventSummary {
    pub tool_name: String,
    pub backend_name: String,
    pub duration_ms: u64,
    pub success: bool,
    /// Seconds ago relative to the snapshot time.
    pub seconds_ago: f64,
}

/// Latency statistics for a backend.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_ms: f64,
    pub sample_count: u64,
}

/// Thread-safe call tracker that records tool invocations.
///
/// Provides three concurrent data structures:
/// - A bounded ring buffer of recent calls (Mutex<VecDeque>)
/// - Per-tool usage counters (DashMap<String, u64>)
/// - Per-backend HDR histograms for latency percentiles (DashMap<String, Mutex<Histogram>>)
pub struct CallTracker {
    /// Bounded FIFO of recent call events. Mutex held only for the push (~nanoseconds).
    recent: Mutex<VecDeque<CallEvent>>,
    /// Per-tool invocation counts for usage-weighted search.
    usage_counts: DashMap<String, u64>,
    /// Per-backend latency histograms. Inner Mutex because Histogram::record is &mut self.
    latency: DashMap<String, Mutex<Histogram<u64>>>,
    /// Maximum entries in the recent ring buffer.
    max_recent: usize,
}

impl CallTracker {
    /// Create a new tracker with default capacity (500 recent events).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECENT)
    }

    /// Create a new tracker with a custom recent-events capacity.
    pub fn with_capacity(max_recent: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(max_recent)),
            usage_counts: DashMap::new(),
            latency: DashMap::new(),
            max_recent,
        }
    }

    /// Record a completed tool call. Called from BackendManager::call_tool.
    pub fn record(&self, tool_name: &str, backend_name: &str, duration: Duration, success: bool) {
        let event = CallEvent {
            tool_name: tool_name.to_string(),
            backend_name: backend_name.to_string(),
            timestamp: Instant::now(),
            duration,
            success,
        };

        // Update recent ring buffer
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() >= self.max_recent {
                recent.pop_front();
            }
            recent.push_back(event);
        }

        // Update usage count (lock-free via DashMap)
        self.usage_counts
            .entry(tool_name.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);

        // Update latency histogram
        let duration_us = duration.as_micros() as u64;
        self.latency
            .entry(backend_name.to_string())
            .or_insert_with(|| {
                // Track latencies from 1µs to 10 minutes with 3 significant digits
                Mutex::new(
                    Histogram::<u64>::new_with_bounds(1, 600_000_000, 3)
                        .expect("valid histogram bounds"),
                )
            })
            .value()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(duration_us.max(1)) // clamp to min 1µs
            .ok(); // ignore out-of-range (>10min)
    }

    /// Get the total invocation count for a tool.
    pub fn usage_count(&self, tool_name: &str) -> u64 {
        self.usage_counts
            .get(tool_name)
            .map(|r| *r.value())
            .unwrap_or(0)
    }

    /// Snapshot all usage counts for cache persistence.
    pub fn snapshot_usage(&self) -> HashMap<String, u64> {
        self.usage_counts
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }

    /// Load usage counts from cache (additive — merges with existing).
    pub fn load_usage(&self, counts: HashMap<String, u64>) {
        for (tool, count) in counts {
            self.usage_counts
                .entry(tool)
                .and_modify(|c| *c += count)
                .or_insert(count);
        }
    }

    /// Get latency statistics for a specific backend.
    pub fn latency_stats(&self, backend_name: &str) -> Option<LatencyStats> {
        let entry = self.latency.get(backend_name)?;
        let hist = entry.value().lock().unwrap_or_else(|e| e.into_inner());
        if hist.is_empty() {
            return None;
        }
        Some(LatencyStats {
            p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            avg_ms: hist.mean() / 1000.0,
            sample_count: hist.len(),
        })
    }

    /// Get recent call events as serializable summaries.
    pub fn recent_calls(&self, limit: usize) -> Vec<CallEventSummary> {
        let now = Instant::now();
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent
            .iter()
            .rev() // most recent first
            .take(limit)
            .map(|e| CallEventSummary {
                tool_name: e.tool_name.clone(),
                backend_name: e.backend_name.clone(),
                duration_ms: e.duration.as_millis() as u64,
                success: e.success,
                seconds_ago: now.duration_since(e.timestamp).as_secs_f64(),
            })
            .collect()
    }

    /// Get all backend names that have latency data.
    pub fn backends_with_latency(&self) -> Vec<String> {
        self.latency
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
