//! Admission control for a rate-limited completion service.
//!
//! Two independent limits gate every remote attempt:
//!
//! 1. A one-minute **quota window** counting requests and estimated tokens.
//!    Admission stays below a safety margin of the configured requests- and
//!    tokens-per-minute limits. The window resets wholesale once it is older
//!    than its length.
//! 2. An **AIMD concurrency ceiling**. Every tenth cumulative success raises
//!    the ceiling by one (up to a cap); every failure lowers it by two (down
//!    to a floor). Successes ramp up slowly, errors back off quickly.
//!
//! All state lives behind one mutex, so the check and the increments of a
//! single admission happen atomically with respect to other callers.
//! Admission never fails; callers that cannot be admitted poll until they
//! can (see [`AdmissionController::await_admission`]).
//!
//! The ceiling cap is not derived from the configured quota, so the governor
//! can climb to the cap even when the remote service tolerates less
//! parallelism than that.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Tuning knobs for [`AdmissionController`].
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Requests-per-minute limit of the remote service.
    pub requests_per_minute: u64,
    /// Tokens-per-minute limit of the remote service.
    pub tokens_per_minute: u64,
    /// Concurrency ceiling before any feedback has been observed.
    pub initial_max_concurrent: u32,
    /// Fraction of each quota that admission may use.
    pub safety_margin: f64,
    /// Length of the quota window.
    pub window: Duration,
    /// Sleep between admission attempts in [`AdmissionController::await_admission`].
    pub poll_interval: Duration,
    /// Cumulative successes per one-step increase of the ceiling.
    pub successes_per_step: u64,
    /// Ceiling decrease applied on every failure.
    pub failure_penalty: u32,
    /// Lowest value the ceiling may take.
    pub min_concurrent: u32,
    /// Highest value the ceiling may take.
    pub max_concurrent_cap: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 5000,
            tokens_per_minute: 200_000,
            initial_max_concurrent: 20,
            safety_margin: 0.95,
            window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            successes_per_step: 10,
            failure_penalty: 2,
            min_concurrent: 1,
            max_concurrent_cap: 50,
        }
    }
}

impl AdmissionConfig {
    /// Set the per-minute quota.
    pub fn with_limits(mut self, requests_per_minute: u64, tokens_per_minute: u64) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.tokens_per_minute = tokens_per_minute;
        self
    }

    /// Set the starting concurrency ceiling.
    pub fn with_initial_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.initial_max_concurrent = max_concurrent;
        self
    }

    fn clamp_concurrency(&self, value: u32) -> u32 {
        value.clamp(self.min_concurrent, self.max_concurrent_cap.max(self.min_concurrent))
    }
}

/// Point-in-time view of the controller's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub request_count: u64,
    pub token_count: u64,
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    pub in_flight: u32,
    pub max_concurrent: u32,
    pub success_count: u64,
}

#[derive(Debug)]
struct AdmissionState {
    window_start: Instant,
    request_count: u64,
    token_count: u64,
    requests_per_minute: u64,
    tokens_per_minute: u64,
    in_flight: u32,
    max_concurrent: u32,
    success_count: u64,
}

/// Sliding-window quota tracker combined with an AIMD concurrency governor.
///
/// Shared by reference (typically `Arc<AdmissionController>`) between every
/// caller that talks to the same remote service.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let state = AdmissionState {
            window_start: Instant::now(),
            request_count: 0,
            token_count: 0,
            requests_per_minute: config.requests_per_minute,
            tokens_per_minute: config.tokens_per_minute,
            in_flight: 0,
            max_concurrent: config.clamp_concurrency(config.initial_max_concurrent),
            success_count: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to admit one call estimated to consume `estimated_tokens`.
    ///
    /// On success the request count, token count and in-flight count are all
    /// incremented; the caller must later report the outcome through
    /// [`complete`](Self::complete).
    pub fn try_admit(&self, estimated_tokens: u64) -> bool {
        self.try_admit_at(estimated_tokens, Instant::now())
    }

    /// [`try_admit`](Self::try_admit) against an explicit clock reading.
    pub fn try_admit_at(&self, estimated_tokens: u64, now: Instant) -> bool {
        let mut state = self.lock();

        if now.saturating_duration_since(state.window_start) > self.config.window {
            trace!(
                "Admission window reset after {} requests / {} tokens",
                state.request_count, state.token_count
            );
            state.window_start = now;
            state.request_count = 0;
            state.token_count = 0;
        }

        let margin = self.config.safety_margin;
        let request_room = (state.request_count as f64) < state.requests_per_minute as f64 * margin;
        let token_room = ((state.token_count + estimated_tokens) as f64)
            < state.tokens_per_minute as f64 * margin;
        let slot_free = state.in_flight < state.max_concurrent;

        if request_room && token_room && slot_free {
            state.request_count += 1;
            state.token_count += estimated_tokens;
            state.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Wait until a call estimated at `estimated_tokens` is admitted.
    ///
    /// Polls [`try_admit`](Self::try_admit) every `poll_interval`. There is no
    /// fairness between waiters, and a call whose estimate can never fit the
    /// token quota waits forever; bound it with an outer timeout.
    pub async fn await_admission(&self, estimated_tokens: u64) {
        let mut waited = false;
        while !self.try_admit(estimated_tokens) {
            if !waited {
                debug!("Admission blocked for {estimated_tokens} estimated tokens, waiting");
                waited = true;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Report the outcome of an admitted call and release its slot.
    ///
    /// `tokens_used` is informational; the quota window already counted the
    /// estimate at admission time.
    pub fn complete(&self, success: bool, tokens_used: u64) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        if success {
            state.success_count += 1;
            if state.success_count % self.config.successes_per_step.max(1) == 0
                && state.max_concurrent < self.config.max_concurrent_cap
            {
                state.max_concurrent += 1;
                debug!(
                    "Concurrency ceiling raised to {} after {} successes",
                    state.max_concurrent, state.success_count
                );
            }
        } else {
            let lowered = state
                .max_concurrent
                .saturating_sub(self.config.failure_penalty)
                .max(self.config.min_concurrent);
            if lowered != state.max_concurrent {
                debug!(
                    "Concurrency ceiling lowered {} -> {} after failure",
                    state.max_concurrent, lowered
                );
            }
            state.max_concurrent = lowered;
        }

        trace!(
            "Call completed: success={success}, tokens={tokens_used}, in_flight={}",
            state.in_flight
        );
    }

    /// Release an admitted slot without reporting an outcome.
    ///
    /// Used when an admitted call is abandoned before it finishes (for
    /// example when its future is dropped by a timeout). The ceiling is left
    /// untouched.
    pub fn release(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Override the quota and, optionally, the concurrency ceiling.
    ///
    /// The ceiling is clamped into `[min_concurrent, max_concurrent_cap]`.
    pub fn configure(
        &self,
        requests_per_minute: u64,
        tokens_per_minute: u64,
        max_concurrent: Option<u32>,
    ) {
        let mut state = self.lock();
        state.requests_per_minute = requests_per_minute;
        state.tokens_per_minute = tokens_per_minute;
        if let Some(max) = max_concurrent {
            state.max_concurrent = self.config.clamp_concurrency(max);
        }
        info!(
            "Admission limits: {} req/min, {} tokens/min, max concurrency {}",
            state.requests_per_minute, state.tokens_per_minute, state.max_concurrent
        );
    }

    /// Current concurrency ceiling.
    pub fn max_concurrent(&self) -> u32 {
        self.lock().max_concurrent
    }

    /// Number of admitted calls not yet completed.
    pub fn in_flight(&self) -> u32 {
        self.lock().in_flight
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.lock();
        AdmissionSnapshot {
            request_count: state.request_count,
            token_count: state.token_count,
            requests_per_minute: state.requests_per_minute,
            tokens_per_minute: state.tokens_per_minute,
            in_flight: state.in_flight,
            max_concurrent: state.max_concurrent,
            success_count: state.success_count,
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}
