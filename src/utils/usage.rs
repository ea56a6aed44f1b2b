use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trailing window used for per-minute admission accounting.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Length of the daily quota period.
pub const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Usage statistics for the translation API.
///
/// Tracks the sliding per-minute admission window, the daily request count,
/// cumulative estimated cost, cache performance, and per-model /
/// per-language-pair histograms. Thread-safe clone handle around shared
/// state.
///
/// Ownership discipline: the scheduler is the only writer of the admission
/// window and day counter; cache hit/miss counters are atomics so the cache
/// gateway can account for them without touching the scheduler's state.
#[derive(Clone)]
pub struct UsageTracker {
    inner: Arc<UsageInner>,
}

struct UsageInner {
    // Admission window (scheduler-owned)
    window: Mutex<VecDeque<Instant>>,
    requests_today: AtomicU32,
    day_started_at: Mutex<Instant>,

    // Cost accounting, stored as integer micro-USD to stay lock-free
    cost_micros: AtomicU64,

    // Cache performance
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,

    // Histograms
    model_usage: DashMap<String, AtomicU64>,
    language_pairs: DashMap<String, AtomicU64>,

    started_at: Instant,
}

impl UsageTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(UsageInner {
                window: Mutex::new(VecDeque::new()),
                requests_today: AtomicU32::new(0),
                day_started_at: Mutex::new(now),
                cost_micros: AtomicU64::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                model_usage: DashMap::new(),
                language_pairs: DashMap::new(),
                started_at: now,
            }),
        }
    }

    /// Drop window entries older than 60s and return the in-window count.
    /// Called lazily on every admission check.
    pub fn requests_last_minute(&self, now: Instant) -> usize {
        let mut window = self.inner.window.lock();
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= MINUTE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }

    /// Oldest timestamp still inside the minute window, if any.
    pub fn oldest_in_window(&self, now: Instant) -> Option<Instant> {
        self.requests_last_minute(now);
        self.inner.window.lock().front().copied()
    }

    /// Daily request count, resetting the period if 24h have elapsed.
    pub fn requests_today(&self, now: Instant) -> u32 {
        self.maybe_reset_day(now);
        self.inner.requests_today.load(Ordering::Relaxed)
    }

    fn maybe_reset_day(&self, now: Instant) {
        let mut started = self.inner.day_started_at.lock();
        if now.saturating_duration_since(*started) >= DAY_WINDOW {
            *started = now;
            self.inner.requests_today.store(0, Ordering::Relaxed);
        }
    }

    /// Record one admitted dispatch. Must be called exactly once per
    /// admission, never for queued-but-undispatched requests.
    pub fn record_admission(&self, now: Instant) {
        self.maybe_reset_day(now);
        self.inner.window.lock().push_back(now);
        self.inner.requests_today.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cost(&self, usd: f64) {
        let micros = (usd * 1_000_000.0).round().max(0.0) as u64;
        self.inner.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_model(&self, model: &str) {
        self.inner
            .model_usage
            .entry(model.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_language_pair(&self, source_lang: &str, target_lang: &str) {
        self.inner
            .language_pairs
            .entry(format!("{}->{}", source_lang, target_lang))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for reporting.
    pub fn snapshot(&self) -> UsageSnapshot {
        let now = Instant::now();
        let requests_last_minute = self.requests_last_minute(now);
        let requests_today = self.requests_today(now);

        let model_usage: HashMap<String, u64> = self
            .inner
            .model_usage
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let language_pairs: HashMap<String, u64> = self
            .inner
            .language_pairs
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        UsageSnapshot {
            requests_last_minute,
            requests_today,
            estimated_cost_usd: self.inner.cost_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            model_usage,
            language_pairs,
            uptime_seconds: self.inner.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub requests_last_minute: usize,
    pub requests_today: u32,
    pub estimated_cost_usd: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub model_usage: HashMap<String, u64>,
    pub language_pairs: HashMap<String, u64>,
    pub uptime_seconds: u64,
}
