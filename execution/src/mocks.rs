//! Fixtures shared by the engine's tests and downstream crates (`mocks` feature).

use packbattle_types::pack::{
    Battle, BattleMode, BattleStatus, BoxCard, CardBox, PullRate, Rarity, Reason,
};
use packbattle_types::Actor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Catalog, MemoryCatalog};
use crate::engine::{Clock, Engine, EngineConfig};
use crate::ledger::CoinLedger;
use crate::session::BattleRecord;
use crate::state::{Memory, State};

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by_ms: u64) {
        self.now.fetch_add(by_ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

pub fn card(id: u64, name: &str, percent: f64, coin_value: u64, rarity: Rarity) -> BoxCard {
    BoxCard {
        id,
        name: name.to_string(),
        pull_rate: PullRate::from_percent(percent).expect("valid percent"),
        coin_value,
        rarity,
    }
}

/// `Common` at 60% worth 1 coin, `Rare` at 40% worth 5.
pub fn two_card_box(id: u64, price: u64) -> CardBox {
    CardBox {
        id,
        name: format!("box-{id}"),
        price,
        cards_per_pack: 1,
        cards: vec![
            card(id * 100 + 1, "Common", 60.0, 1, Rarity::Common),
            card(id * 100 + 2, "Rare", 40.0, 5, Rarity::Rare),
        ],
    }
}

/// Credits `amount` grant coins to `user_id`.
pub fn fund<S: State + ?Sized>(state: &mut S, user_id: &str, amount: u64) {
    CoinLedger::new(state)
        .credit(user_id, amount, Reason::Grant, &format!("fund:{user_id}:{amount}"))
        .expect("fund account");
}

/// A WAITING battle record with nobody seated.
pub fn battle_record(battle_id: u64, creator_id: &str, entry_fee: u64, max: u32) -> BattleRecord {
    BattleRecord::new(Battle {
        id: battle_id,
        status: BattleStatus::Waiting,
        mode: BattleMode::HighestWins,
        share_rewards: false,
        rounds: 1,
        max_participants: max,
        entry_fee,
        box_id: 1,
        creator_id: creator_id.to_string(),
        winner_id: None,
        created_at: 0,
        ended_at: None,
    })
}

pub struct TestEngine {
    pub engine: Engine<Memory>,
    pub catalog: Arc<MemoryCatalog>,
    pub clock: Arc<ManualClock>,
}

/// Seeded in-memory engine with [`two_card_box`] published as box 1 (price 10).
pub fn test_engine(seed: u64) -> TestEngine {
    test_engine_with(EngineConfig {
        seed: Some(seed),
        house_edge_bps: 0,
        box_cache_ttl: Duration::from_secs(60),
    })
}

pub fn test_engine_with(config: EngineConfig) -> TestEngine {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.put_box(two_card_box(1, 10)).expect("seed catalog");
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let engine = Engine::new(Memory::default(), catalog.clone(), clock.clone(), config);
    TestEngine {
        engine,
        catalog,
        clock,
    }
}

pub fn admin() -> Actor {
    Actor::admin("admin")
}
