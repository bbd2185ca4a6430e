use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Rate limit configuration: a hard call budget over a rolling window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum provider calls allowed in the window.
    pub max_calls_per_window: u32,
    /// Trailing window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Conservative default: 45 of a typical 50/hour provider budget,
        // leaving headroom for calls made outside this process.
        Self {
            max_calls_per_window: 45,
            window: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_calls_per_window: u32, window_secs: u64) -> Self {
        Self {
            max_calls_per_window,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitSnapshot {
    pub calls_in_window: u32,
    pub max_calls_per_window: u32,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

/// Sliding-window call counter shared by all sessions talking to one
/// provider. Strict count-in-window semantics: no token-bucket smoothing,
/// no burst allowance. All state sits behind one mutex; critical sections
/// never block on I/O.
#[derive(Debug)]
pub struct RateLimitManager {
    config: RateLimitConfig,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Whether a call may be made now. Does not record anything.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut calls = self.calls.lock().expect("rate limit lock poisoned");
        Self::prune(&mut calls, now, self.config.window);
        (calls.len() as u32) < self.config.max_calls_per_window
    }

    /// Consume one slot. Call this once per actual provider call, never
    /// speculatively.
    pub fn record_call(&self) {
        self.record_call_at(Instant::now())
    }

    pub fn record_call_at(&self, now: Instant) {
        let mut calls = self.calls.lock().expect("rate limit lock poisoned");
        Self::prune(&mut calls, now, self.config.window);
        // Keep the retained count capped even if a caller skipped allow().
        if calls.len() as u32 >= self.config.max_calls_per_window {
            calls.pop_front();
        }
        calls.push_back(now);
    }

    /// Time until the oldest recorded call ages out of the window, i.e.
    /// when capacity next frees by one slot. Zero whenever `allow()` holds.
    pub fn time_until_reset(&self) -> Duration {
        self.time_until_reset_at(Instant::now())
    }

    pub fn time_until_reset_at(&self, now: Instant) -> Duration {
        let mut calls = self.calls.lock().expect("rate limit lock poisoned");
        Self::prune(&mut calls, now, self.config.window);
        if (calls.len() as u32) < self.config.max_calls_per_window {
            return Duration::ZERO;
        }
        match calls.front() {
            Some(oldest) => self
                .config
                .window
                .saturating_sub(now.saturating_duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> RateLimitSnapshot {
        let calls_in_window = {
            let mut calls = self.calls.lock().expect("rate limit lock poisoned");
            Self::prune(&mut calls, now, self.config.window);
            calls.len() as u32
        };
        RateLimitSnapshot {
            calls_in_window,
            max_calls_per_window: self.config.max_calls_per_window,
            window_secs: self.config.window.as_secs(),
            retry_after_secs: self.time_until_reset_at(now).as_secs(),
        }
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = calls.front() {
            if now.saturating_duration_since(*oldest) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}
