//! Client-side load shaping: error-rate load shedding and warm-up rate caps.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::average::MovingSum;
use crate::metrics::Counter;

/// Window over which request outcomes are tracked.
const THROTTLER_WINDOW_MS: u64 = 120_000;
/// Bucket granularity of the outcome window.
const THROTTLER_BUCKET_MS: u64 = 10_000;
/// Headroom multiplier on the success rate before shedding starts.
const THROTTLER_OVERLOAD_FACTOR: f64 = 1.25;

/// Cluster-wide request budget at pipeline start, divided across workers.
const RAMP_UP_BASE_BUDGET: f64 = 500.0;
/// Seconds over which the budget grows by a factor of 1.5.
const RAMP_UP_GROWTH_PERIOD_SECS: f64 = 300.0;
/// Default worker-count hint when the embedder provides none.
pub const DEFAULT_HINT_NUM_WORKERS: u32 = 500;

struct ThrottlerState {
    all_requests: MovingSum,
    successful_requests: MovingSum,
    rng: SmallRng,
}

/// Probabilistic request rejection driven by the recent server error rate.
///
/// Tracks requests R (one per throttle decision) and successful requests S
/// over a sliding window. Each decision rejects with probability
/// `max(0, (R - K*S) / (R + 1))`: zero while the Store keeps succeeding,
/// approaching one under sustained failure. Shared per worker; the writer
/// consults it before every commit attempt and must sleep and re-decide on
/// rejection.
pub struct AdaptiveThrottler {
    overload_factor: f64,
    state: Mutex<ThrottlerState>,
}

impl AdaptiveThrottler {
    pub fn new() -> Self {
        Self::with_params(
            THROTTLER_WINDOW_MS,
            THROTTLER_BUCKET_MS,
            THROTTLER_OVERLOAD_FACTOR,
        )
    }

    /// Throttler with explicit window/bucket/overload parameters.
    pub fn with_params(window_ms: u64, bucket_ms: u64, overload_factor: f64) -> Self {
        Self {
            overload_factor,
            state: Mutex::new(ThrottlerState {
                all_requests: MovingSum::new(window_ms, bucket_ms),
                successful_requests: MovingSum::new(window_ms, bucket_ms),
                rng: SmallRng::from_entropy(),
            }),
        }
    }

    fn probability(&self, all: f64, successful: f64) -> f64 {
        ((all - self.overload_factor * successful) / (all + 1.0)).max(0.0)
    }

    /// Decide whether the caller must skip this attempt. Every decision
    /// counts toward the request window, rejected ones included, so a
    /// sleep-and-re-decide loop keeps feeding the overload signal.
    pub fn throttle_request(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock().expect("throttler state poisoned");
        let all = state.all_requests.sum(now_ms) as f64;
        let successful = state.successful_requests.sum(now_ms) as f64;
        let probability = self.probability(all, successful);
        let throttled = state.rng.gen::<f64>() < probability;
        state.all_requests.add(now_ms, 1);
        throttled
    }

    /// Report a request that the Store answered OK.
    pub fn successful_request(&self, now_ms: u64) {
        let mut state = self.state.lock().expect("throttler state poisoned");
        state.successful_requests.add(now_ms, 1);
    }
}

impl Default for AdaptiveThrottler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker request-rate ceiling during pipeline warm-up.
///
/// The cluster-wide budget starts at `RAMP_UP_BASE_BUDGET` requests per
/// second and grows geometrically (×1.5 every five minutes); each worker gets
/// a `1/hint_num_workers` share, floored at one request per second. `admit`
/// gates one mutation: it returns once the current wall-second has budget
/// left and otherwise sleeps to the next second boundary, counting the slept
/// time in the throttling metric.
pub struct RampupThrottle {
    hint_num_workers: u32,
    start: Instant,
    current_second: u64,
    admitted_in_second: u64,
    throttling_msecs: Counter,
}

impl RampupThrottle {
    /// Build a throttle. `start` is the pipeline-wide start instant, created
    /// once per run and passed to every worker's throttle.
    pub fn new(hint_num_workers: u32, start: Instant, throttling_msecs: Counter) -> Self {
        Self {
            hint_num_workers: hint_num_workers.max(1),
            start,
            current_second: 0,
            admitted_in_second: 0,
            throttling_msecs,
        }
    }

    /// Per-worker budget for wall-second `second` since pipeline start.
    /// Monotone non-decreasing in `second`.
    pub fn budget_for_second(&self, second: u64) -> u64 {
        let growth = 1.5f64.powf(second as f64 / RAMP_UP_GROWTH_PERIOD_SECS);
        let share = RAMP_UP_BASE_BUDGET * growth / self.hint_num_workers as f64;
        (share.floor() as u64).max(1)
    }

    /// Admit one request, sleeping across second boundaries while the
    /// current second's budget is spent.
    pub async fn admit(&mut self) {
        loop {
            let second = self.start.elapsed().as_secs();
            if second != self.current_second {
                self.current_second = second;
                self.admitted_in_second = 0;
            }
            if self.admitted_in_second < self.budget_for_second(second) {
                self.admitted_in_second += 1;
                return;
            }
            let next_second = self.start + Duration::from_secs(second + 1);
            let wait = next_second.saturating_duration_since(Instant::now());
            self.throttling_msecs.inc(wait.as_millis() as u64);
            tokio::time::sleep_until(next_second).await;
        }
    }
}
