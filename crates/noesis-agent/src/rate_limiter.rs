use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// A token bucket `(tokens_per_interval, interval_ms, capacity)` (§4.7). Refill is
/// pro-rata over elapsed wall-clock time, capped at capacity. Mutex-guarded-struct
/// style follows the teacher's `ratelimit.rs::RateLimiter`, but the refill algorithm
/// itself is new — the teacher only has a sliding-window counter, no bucket.
pub struct RateLimiter {
    tokens_per_interval: f64,
    interval: Duration,
    capacity: f64,
    state: Mutex<BucketState>,
    notify: Notify,
}

struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(tokens_per_interval: f64, interval_ms: u64, capacity: f64) -> Self {
        Self {
            tokens_per_interval,
            interval: Duration::from_millis(interval_ms.max(1)),
            capacity,
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.tokens_per_interval / self.interval.as_secs_f64()
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let added = elapsed.as_secs_f64() * self.refill_rate_per_sec();
        if added > 0.0 {
            state.available = (state.available + added).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Non-blocking: take `n` tokens immediately if available, otherwise leave the
    /// bucket untouched and return `false`.
    pub fn try_acquire(&self, n: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.available >= n {
            state.available -= n;
            true
        } else {
            false
        }
    }

    /// Block until `n` tokens are available, computing the wait deterministically
    /// from the current deficit rather than polling (§4.7, §8 "acquiring k > available
    /// waits at least `(k - available)·interval/tokens_per_interval`").
    pub async fn acquire(&self, n: f64) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                self.refill(&mut state);
                if state.available >= n {
                    state.available -= n;
                    None
                } else {
                    let deficit = n - state.available;
                    Some(Duration::from_secs_f64(deficit / self.refill_rate_per_sec()))
                }
            };

            match wait {
                None => return,
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }
}

/// Per-API usage counters `(requests, tokens, errors, last_request_time)` (§4.7).
#[derive(Default)]
struct ApiCounters {
    requests: AtomicU64,
    tokens: AtomicU64,
    errors: AtomicU64,
    last_request_ms: AtomicU64,
}

/// Tracks LLM request/token/error counts per API identifier and produces a
/// deterministic human-readable report. Reporting style follows the teacher's
/// `GatewayMetrics::to_prometheus`/`to_json`, generalized from a fixed channel set to
/// an open-ended API-name map.
pub struct UsageAccountant {
    counters: Mutex<HashMap<String, ApiCounters>>,
    started_at_ms: u64,
}

impl UsageAccountant {
    pub fn new(now_ms: u64) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            started_at_ms: now_ms,
        }
    }

    /// Increment request/token counters for `api`; increment the error counter too
    /// when `error` is true (§4.7 "every LLM request increments request/token
    /// counters and, on failure, errors").
    pub fn record(&self, api: &str, tokens: u64, error: bool, now_ms: u64) {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(api.to_string()).or_default();
        entry.requests.fetch_add(1, Ordering::Relaxed);
        entry.tokens.fetch_add(tokens, Ordering::Relaxed);
        if error {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
        entry.last_request_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.lock().unwrap();
        let mut apis = serde_json::Map::new();
        for (api, c) in counters.iter() {
            apis.insert(
                api.clone(),
                serde_json::json!({
                    "requests": c.requests.load(Ordering::Relaxed),
                    "tokens": c.tokens.load(Ordering::Relaxed),
                    "errors": c.errors.load(Ordering::Relaxed),
                    "last_request_time_ms": c.last_request_ms.load(Ordering::Relaxed),
                }),
            );
        }
        serde_json::json!({
            "started_at_ms": self.started_at_ms,
            "apis": apis,
        })
    }

    /// Deterministic human-readable report, one line per API, sorted by name.
    pub fn report(&self) -> String {
        let counters = self.counters.lock().unwrap();
        let mut names: Vec<&String> = counters.keys().collect();
        names.sort();

        let mut out = String::new();
        for name in names {
            let c = &counters[name];
            out.push_str(&format!(
                "{name}: requests={} tokens={} errors={} last_request_ms={}\n",
                c.requests.load(Ordering::Relaxed),
                c.tokens.load(Ordering::Relaxed),
                c.errors.load(Ordering::Relaxed),
                c.last_request_ms.load(Ordering::Relaxed),
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_within_capacity() {
        let bucket = RateLimiter::new(10.0, 1000, 10.0);
        assert!(bucket.try_acquire(5.0));
        assert!(bucket.try_acquire(5.0));
        assert!(!bucket.try_acquire(1.0));
    }

    #[tokio::test]
    async fn test_refill_over_time() {
        let bucket = RateLimiter::new(100.0, 100, 10.0);
        assert!(bucket.try_acquire(10.0));
        assert!(!bucket.try_acquire(1.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bucket.try_acquire(1.0));
    }

    #[tokio::test]
    async fn test_acquire_waits_when_deficient() {
        let bucket = RateLimiter::new(1000.0, 1000, 1.0);
        assert!(bucket.try_acquire(1.0));
        let start = Instant::now();
        bucket.acquire(0.5).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn test_usage_accountant_records_and_reports() {
        let accountant = UsageAccountant::new(1000);
        accountant.record("openai", 120, false, 2000);
        accountant.record("openai", 80, true, 3000);
        accountant.record("anthropic", 50, false, 1500);

        let report = accountant.report();
        assert!(report.contains("openai: requests=2 tokens=200 errors=1"));
        assert!(report.contains("anthropic: requests=1 tokens=50 errors=0"));

        let json = accountant.to_json();
        assert_eq!(json["apis"]["openai"]["requests"], 2);
        assert_eq!(json["apis"]["openai"]["errors"], 1);
    }
}
