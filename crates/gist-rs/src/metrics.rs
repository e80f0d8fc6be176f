//! Rolling statistics over completion calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::admission::AdmissionController;

/// Number of recent latencies kept for the moving average.
pub const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct MetricsState {
    total_calls: u64,
    successful_calls: u64,
    tokens_used: u64,
    latencies: VecDeque<Duration>,
}

/// Derived view of [`CallMetrics`]. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub success_rate_percent: f64,
    pub tokens_used: u64,
    pub avg_latency: Duration,
    pub calls_per_second: f64,
    pub tokens_per_second: f64,
}

/// Records one outcome per completion attempt (cache hits included).
///
/// Guarded by its own lock, independent of [`AdmissionController`].
#[derive(Debug)]
pub struct CallMetrics {
    started: Instant,
    state: Mutex<MetricsState>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(MetricsState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, success: bool, tokens: u64, latency: Duration) {
        let mut state = self.lock();
        state.total_calls += 1;
        if success {
            state.successful_calls += 1;
        }
        state.tokens_used += tokens;
        if state.latencies.len() == LATENCY_WINDOW {
            state.latencies.pop_front();
        }
        state.latencies.push_back(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Snapshot with rates computed against an explicit clock reading.
    ///
    /// Every denominator (call count, elapsed seconds) is floored at 1.
    pub fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        let state = self.lock();
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64().max(1.0);
        let avg_latency = if state.latencies.is_empty() {
            Duration::ZERO
        } else {
            state.latencies.iter().sum::<Duration>() / state.latencies.len() as u32
        };

        MetricsSnapshot {
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            success_rate_percent: state.successful_calls as f64 / state.total_calls.max(1) as f64
                * 100.0,
            tokens_used: state.tokens_used,
            avg_latency,
            calls_per_second: state.total_calls as f64 / elapsed,
            tokens_per_second: state.tokens_used as f64 / elapsed,
        }
    }

    /// Emit a one-line status report, with the in-flight count if an
    /// admission controller is supplied.
    pub fn log_status(&self, admission: Option<&AdmissionController>) {
        let snap = self.snapshot();
        let concurrency = admission
            .map(|a| {
                let s = a.snapshot();
                format!(", {}/{} in flight", s.in_flight, s.max_concurrent)
            })
            .unwrap_or_default();
        info!(
            "API stats: {} calls, {:.1}% success, {} tokens, {:.2} calls/s, {:.0} tokens/s, avg {:.2}s{}",
            snap.total_calls,
            snap.success_rate_percent,
            snap.tokens_used,
            snap.calls_per_second,
            snap.tokens_per_second,
            snap.avg_latency.as_secs_f64(),
            concurrency,
        );
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}
