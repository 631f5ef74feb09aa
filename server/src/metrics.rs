use axum::http::Method;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Latency group a request is accounted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    OpenPacks,
    BattleWrite,
    BattleRead,
    Ledger,
    Other,
}

impl Route {
    pub fn classify(method: &Method, path: &str) -> Self {
        if path.starts_with("/packs") {
            Route::OpenPacks
        } else if path.starts_with("/battles") {
            if method == Method::GET {
                Route::BattleRead
            } else {
                Route::BattleWrite
            }
        } else if path.starts_with("/cards")
            || path.starts_with("/accounts")
            || path.starts_with("/admin/accounts")
        {
            Route::Ledger
        } else {
            Route::Other
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub open_packs: LatencySnapshot,
    pub battle_write: LatencySnapshot,
    pub battle_read: LatencySnapshot,
    pub ledger: LatencySnapshot,
    pub reject_origin: u64,
    pub reject_body_limit: u64,
    pub reject_rate_limit: u64,
}

#[derive(Default)]
pub struct HttpMetrics {
    open_packs: LatencyMetrics,
    battle_write: LatencyMetrics,
    battle_read: LatencyMetrics,
    ledger: LatencyMetrics,
    reject_origin: AtomicU64,
    reject_body_limit: AtomicU64,
    reject_rate_limit: AtomicU64,
}

impl HttpMetrics {
    pub fn record(&self, route: Route, duration: Duration) {
        let metrics = match route {
            Route::OpenPacks => &self.open_packs,
            Route::BattleWrite => &self.battle_write,
            Route::BattleRead => &self.battle_read,
            Route::Ledger => &self.ledger,
            Route::Other => return,
        };
        metrics.record(duration);
    }

    pub fn inc_reject_origin(&self) {
        self.reject_origin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            open_packs: self.open_packs.snapshot(),
            battle_write: self.battle_write.snapshot(),
            battle_read: self.battle_read.snapshot(),
            ledger: self.ledger.snapshot(),
            reject_origin: self.reject_origin.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
        }
    }
}
