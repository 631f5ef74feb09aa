use packbattle_types::ErrorKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetricsSnapshot {
    pub packs_opened: u64,
    pub cards_drawn: u64,
    pub battles_created: u64,
    pub battles_finished: u64,
    pub battles_cancelled: u64,
    pub cards_sold: u64,
    pub coins_granted: u64,
    pub validation_errors: u64,
    pub economic_errors: u64,
    pub state_errors: u64,
    pub authorization_errors: u64,
    pub not_found_errors: u64,
    pub internal_errors: u64,
}

#[derive(Default)]
pub struct EngineMetrics {
    packs_opened: AtomicU64,
    cards_drawn: AtomicU64,
    battles_created: AtomicU64,
    battles_finished: AtomicU64,
    battles_cancelled: AtomicU64,
    cards_sold: AtomicU64,
    coins_granted: AtomicU64,
    validation_errors: AtomicU64,
    economic_errors: AtomicU64,
    state_errors: AtomicU64,
    authorization_errors: AtomicU64,
    not_found_errors: AtomicU64,
    internal_errors: AtomicU64,
}

impl EngineMetrics {
    pub fn record_open(&self, packs: u64, cards: u64) {
        self.packs_opened.fetch_add(packs, Ordering::Relaxed);
        self.cards_drawn.fetch_add(cards, Ordering::Relaxed);
    }

    pub fn record_battle_created(&self) {
        self.battles_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_battle_finished(&self, cards: u64) {
        self.battles_finished.fetch_add(1, Ordering::Relaxed);
        self.cards_drawn.fetch_add(cards, Ordering::Relaxed);
    }

    pub fn record_battle_cancelled(&self) {
        self.battles_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sale(&self) {
        self.cards_sold.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_grant(&self, amount: u64) {
        self.coins_granted.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Validation => &self.validation_errors,
            ErrorKind::Economic => &self.economic_errors,
            ErrorKind::State => &self.state_errors,
            ErrorKind::Authorization => &self.authorization_errors,
            ErrorKind::NotFound => &self.not_found_errors,
            ErrorKind::Internal => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            packs_opened: self.packs_opened.load(Ordering::Relaxed),
            cards_drawn: self.cards_drawn.load(Ordering::Relaxed),
            battles_created: self.battles_created.load(Ordering::Relaxed),
            battles_finished: self.battles_finished.load(Ordering::Relaxed),
            battles_cancelled: self.battles_cancelled.load(Ordering::Relaxed),
            cards_sold: self.cards_sold.load(Ordering::Relaxed),
            coins_granted: self.coins_granted.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            economic_errors: self.economic_errors.load(Ordering::Relaxed),
            state_errors: self.state_errors.load(Ordering::Relaxed),
            authorization_errors: self.authorization_errors.load(Ordering::Relaxed),
            not_found_errors: self.not_found_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}
