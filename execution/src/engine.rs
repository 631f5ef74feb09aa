//! Engine facade.
//!
//! Every mutating operation runs as one unit of work: the engine lock is
//! taken, a [`Pending`] overlay is built over the store, and the overlay's
//! change set is applied in a single call only if the whole operation
//! succeeded. The lock serializes slot allocation and balance updates, so
//! concurrent joins and debits never observe stale state.

use packbattle_types::api::{
    BattleStatusResponse, CreateBattleRequest, JoinResponse, OpenPacksResponse, PulledCard,
    ReadyResponse, ReplayResponse, SellResponse, StartResponse,
};
use packbattle_types::pack::{
    Battle, BattleStatus, CardBox, CoinBalance, Pull, Reason, MAX_OPEN_QUANTITY,
};
use packbattle_types::{Actor, EngineError, ErrorKind};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::cache::{BoxCache, BoxCacheSnapshot};
use crate::catalog::Catalog;
use crate::ledger::CoinLedger;
use crate::lottery::draw;
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::pull_rate::PullRateTable;
use crate::resolver::reveal_steps;
use crate::session::{BattleRecord, BattleSession, BattleSettings};
use crate::state::{
    load_battle, load_battle_index, load_inventory, load_open_receipt, load_pull, load_sale,
    next_id, push_inventory, store_inventory, store_open_receipt, store_pull, store_sale,
    Counter, Key, OpenReceipt, Pending, SaleReceipt, State, StorageResultExt,
};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Fixed RNG seed. Draws come from OS entropy when unset.
    pub seed: Option<u64>,
    /// Share of every battle pot kept by the house, in basis points.
    pub house_edge_bps: u16,
    pub box_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            house_edge_bps: 0,
            box_cache_ttl: Duration::from_secs(30),
        }
    }
}

struct Inner<S> {
    state: S,
    rng: StdRng,
}

pub struct Engine<S: State> {
    inner: Mutex<Inner<S>>,
    catalog: Arc<dyn Catalog>,
    cache: BoxCache,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
    house_edge_bps: u16,
}

impl<S: State> Engine<S> {
    pub fn new(
        state: S,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Mutex::new(Inner { state, rng }),
            catalog,
            cache: BoxCache::new(config.box_cache_ttl),
            clock,
            metrics: EngineMetrics::default(),
            house_edge_bps: config.house_edge_bps,
        }
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> BoxCacheSnapshot {
        self.cache.snapshot()
    }

    /// Runs `op` as one unit of work. Nothing it wrote survives an error.
    fn transact<T>(
        &self,
        name: &'static str,
        op: impl FnOnce(&mut Pending<'_, S>, &mut StdRng) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| EngineError::storage("engine lock poisoned"))?;
        let Inner { state, rng } = &mut *inner;
        let result = {
            let mut pending = Pending::new(&*state);
            op(&mut pending, rng).map(|value| (value, pending.commit()))
        };
        let outcome = result.and_then(|(value, changes)| {
            state.apply(changes).storage()?;
            Ok(value)
        });
        if let Err(err) = &outcome {
            self.metrics.record_error(err.kind());
            if err.kind() == ErrorKind::Internal {
                warn!(op = name, error = %err, "operation failed");
            } else {
                debug!(op = name, code = err.code(), "operation rejected");
            }
        }
        outcome
    }

    fn read<T>(&self, op: impl FnOnce(&S) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| EngineError::storage("engine lock poisoned"))?;
        op(&inner.state)
    }

    /// Current box contents, validated. The cache only saves the catalog
    /// round trip; validation runs on every call.
    fn load_table(&self, box_id: u64) -> Result<(CardBox, PullRateTable), EngineError> {
        let card_box = self.get_box(box_id)?;
        let table = PullRateTable::from_box(&card_box)?;
        Ok((card_box, table))
    }

    pub fn get_box(&self, box_id: u64) -> Result<CardBox, EngineError> {
        if let Some(card_box) = self.cache.get(box_id) {
            return Ok(card_box);
        }
        let card_box = self
            .catalog
            .get_box(box_id)?
            .ok_or(EngineError::BoxNotFound(box_id))?;
        self.cache.insert(card_box.clone());
        Ok(card_box)
    }

    pub fn list_boxes(&self) -> Result<Vec<CardBox>, EngineError> {
        self.catalog.list()
    }

    /// Validates and publishes a box, then drops any cached copy.
    pub fn publish_box(&self, actor: &Actor, card_box: CardBox) -> Result<CardBox, EngineError> {
        if !actor.is_admin {
            return Err(EngineError::NotAdmin);
        }
        PullRateTable::from_box(&card_box)?;
        self.catalog.put_box(card_box.clone())?;
        self.cache.invalidate(card_box.id);
        info!(box_id = card_box.id, cards = card_box.cards.len(), "box published");
        Ok(card_box)
    }

    pub fn invalidate_box(&self, box_id: u64) {
        self.cache.invalidate(box_id);
    }

    pub fn clear_box_cache(&self) {
        self.cache.clear();
    }

    /// Buys and opens `quantity` packs. Replaying `idempotency_key` returns
    /// the original draw.
    pub fn open_packs(
        &self,
        actor: &Actor,
        box_id: u64,
        quantity: u32,
        idempotency_key: &str,
    ) -> Result<OpenPacksResponse, EngineError> {
        let now = self.clock.now_ms();
        let response = self.transact("open_packs", |state, rng| {
            let receipt_key = Key::OpenReceipt(idempotency_key.to_string());
            if let Some(receipt) = load_open_receipt(state, &receipt_key)? {
                if receipt.user_id == actor.user_id
                    && receipt.box_id == box_id
                    && receipt.quantity == quantity
                {
                    return Ok(OpenPacksResponse {
                        pulls: receipt.pulls,
                        remaining_coins: receipt.remaining_coins,
                    });
                }
                return Err(EngineError::IdempotencyConflict {
                    key: idempotency_key.to_string(),
                });
            }
            if !(1..=MAX_OPEN_QUANTITY).contains(&quantity) {
                return Err(EngineError::InvalidQuantity {
                    quantity,
                    max: MAX_OPEN_QUANTITY,
                });
            }
            let (card_box, table) = self.load_table(box_id)?;

            let cost = card_box
                .price
                .checked_mul(quantity as u64)
                .ok_or(EngineError::BalanceOverflow)?;
            let mut ledger = CoinLedger::new(&mut *state);
            let remaining_coins = if cost > 0 {
                ledger.debit(
                    &actor.user_id,
                    cost,
                    Reason::Purchase,
                    &format!("open:{idempotency_key}"),
                )?
            } else {
                ledger.balance(&actor.user_id)?.available
            };

            let draws = quantity
                .checked_mul(card_box.cards_per_pack)
                .ok_or(EngineError::InvalidQuantity {
                    quantity,
                    max: MAX_OPEN_QUANTITY,
                })?;
            let mut pulls = Vec::with_capacity(draws as usize);
            for _ in 0..draws {
                let card = draw(&table, &mut *rng);
                let pull = Pull::snapshot(
                    next_id(state, Counter::Pull)?,
                    &actor.user_id,
                    box_id,
                    card,
                    None,
                    now,
                );
                push_inventory(state, &actor.user_id, pull.id)?;
                pulls.push(PulledCard {
                    id: pull.id,
                    card: card.clone(),
                    card_value: pull.card_value,
                });
                store_pull(state, Key::Pull(pull.id), pull)?;
            }
            store_open_receipt(
                state,
                receipt_key,
                OpenReceipt {
                    user_id: actor.user_id.clone(),
                    box_id,
                    quantity,
                    pulls: pulls.clone(),
                    remaining_coins,
                },
            )?;
            info!(
                user_id = %actor.user_id,
                box_id,
                quantity,
                cost,
                "packs opened"
            );
            Ok(OpenPacksResponse {
                pulls,
                remaining_coins,
            })
        })?;
        self.metrics
            .record_open(quantity as u64, response.pulls.len() as u64);
        Ok(response)
    }

    pub fn balance(&self, user_id: &str) -> Result<CoinBalance, EngineError> {
        self.read(|state| {
            Ok(crate::state::load_account(state, &Key::Account(user_id.to_string()))?
                .unwrap_or_default())
        })
    }

    /// Admin credit. The key makes a retried grant a no-op.
    pub fn grant(
        &self,
        actor: &Actor,
        user_id: &str,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<CoinBalance, EngineError> {
        if !actor.is_admin {
            return Err(EngineError::NotAdmin);
        }
        let balance = self.transact("grant", |state, _| {
            let mut ledger = CoinLedger::new(state);
            ledger.credit(
                user_id,
                amount,
                Reason::Grant,
                &format!("grant:{idempotency_key}"),
            )?;
            ledger.balance(user_id)
        })?;
        self.metrics.record_grant(amount);
        info!(user_id, amount, granted_by = %actor.user_id, "coins granted");
        Ok(balance)
    }

    /// Converts an owned pull back into coins at its snapshotted value.
    pub fn sell(
        &self,
        actor: &Actor,
        pull_id: u64,
        idempotency_key: Option<&str>,
    ) -> Result<SellResponse, EngineError> {
        let response = self.transact("sell", |state, _| {
            if let Some(sale) = load_sale(state, &Key::Sale(pull_id))? {
                if sale.user_id == actor.user_id
                    && idempotency_key.is_some()
                    && sale.idempotency_key.as_deref() == idempotency_key
                {
                    return Ok(SellResponse {
                        coins_received: sale.coins_received,
                        new_balance: sale.new_balance,
                    });
                }
                return Err(EngineError::AlreadyListed { pull_id });
            }
            let pull = load_pull(state, &Key::Pull(pull_id))?
                .filter(|pull| pull.user_id == actor.user_id)
                .ok_or(EngineError::PullNotFound(pull_id))?;
            if pull.battle_id.is_some() {
                return Err(EngineError::AlreadyListed { pull_id });
            }

            let mut ledger = CoinLedger::new(&mut *state);
            let new_balance = if pull.card_value > 0 {
                ledger.credit(
                    &actor.user_id,
                    pull.card_value,
                    Reason::Sale,
                    &format!("sell:{pull_id}"),
                )?
            } else {
                ledger.balance(&actor.user_id)?.available
            };

            state.delete(&Key::Pull(pull_id)).storage()?;
            let inventory_key = Key::Inventory(actor.user_id.clone());
            let mut inventory = load_inventory(state, &inventory_key)?.unwrap_or_default();
            inventory.retain(|id| *id != pull_id);
            store_inventory(state, inventory_key, inventory)?;
            store_sale(
                state,
                Key::Sale(pull_id),
                SaleReceipt {
                    user_id: actor.user_id.clone(),
                    coins_received: pull.card_value,
                    new_balance,
                    idempotency_key: idempotency_key.map(str::to_string),
                },
            )?;
            info!(user_id = %actor.user_id, pull_id, coins = pull.card_value, "card sold");
            Ok(SellResponse {
                coins_received: pull.card_value,
                new_balance,
            })
        })?;
        self.metrics.record_sale();
        Ok(response)
    }

    /// Pulls currently owned by `user_id`, oldest first.
    pub fn inventory(&self, user_id: &str) -> Result<Vec<Pull>, EngineError> {
        self.read(|state| {
            let ids = load_inventory(state, &Key::Inventory(user_id.to_string()))?
                .unwrap_or_default();
            let mut pulls = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(pull) = load_pull(state, &Key::Pull(id))? {
                    pulls.push(pull);
                }
            }
            Ok(pulls)
        })
    }

    pub fn create_battle(
        &self,
        actor: &Actor,
        request: CreateBattleRequest,
    ) -> Result<Battle, EngineError> {
        let now = self.clock.now_ms();
        let (card_box, _) = self.load_table(request.box_id)?;
        let battle = self.transact("create_battle", |state, _| {
            let settings = BattleSettings {
                mode: request.mode,
                rounds: request.rounds,
                max_participants: request.max_participants,
                share_rewards: request.share_rewards,
            };
            let record = BattleSession::create(state, actor, &card_box, settings, now)?.save()?;
            Ok(record.battle)
        })?;
        self.metrics.record_battle_created();
        Ok(battle)
    }

    pub fn join(&self, actor: &Actor, battle_id: u64) -> Result<JoinResponse, EngineError> {
        let now = self.clock.now_ms();
        self.transact("join", |state, _| {
            let mut session = BattleSession::load(state, battle_id)?;
            session.join(actor, now)?;
            let record = session.save()?;
            let new_balance = CoinLedger::new(state).balance(&actor.user_id)?.available;
            Ok(JoinResponse {
                coins_deducted: record.battle.entry_fee,
                battle: record.battle,
                new_balance,
            })
        })
    }

    /// Leaves a WAITING battle. Returns the battle and the refunded fee.
    pub fn leave(&self, actor: &Actor, battle_id: u64) -> Result<(Battle, u64), EngineError> {
        self.transact("leave", |state, _| {
            let mut session = BattleSession::load(state, battle_id)?;
            let refunded = session.leave(actor)?;
            Ok((session.save()?.battle, refunded))
        })
    }

    pub fn set_ready(
        &self,
        actor: &Actor,
        battle_id: u64,
        ready: bool,
    ) -> Result<ReadyResponse, EngineError> {
        self.transact("set_ready", |state, _| {
            let mut session = BattleSession::load(state, battle_id)?;
            let is_ready = session.set_ready(actor, ready)?;
            session.save()?;
            Ok(ReadyResponse { is_ready })
        })
    }

    pub fn add_bots(
        &self,
        actor: &Actor,
        battle_id: u64,
        count: u32,
    ) -> Result<Battle, EngineError> {
        let now = self.clock.now_ms();
        self.transact("add_bots", |state, _| {
            let mut session = BattleSession::load(state, battle_id)?;
            session.add_bots(actor, count, now)?;
            Ok(session.save()?.battle)
        })
    }

    /// Runs the whole battle atomically. On any failure the battle stays
    /// WAITING with every reservation still held.
    pub fn start(&self, actor: &Actor, battle_id: u64) -> Result<StartResponse, EngineError> {
        let now = self.clock.now_ms();
        let response = self.transact("start", |state, rng| {
            let mut session = BattleSession::load(state, battle_id)?;
            session.ensure_startable(actor)?;
            let (_, table) = self.load_table(session.battle().box_id)?;
            let (outcome, settlement) =
                session.start(actor, &table, rng, self.house_edge_bps, now)?;
            let record = session.save()?;
            Ok(StartResponse {
                battle: record.battle,
                pulls: record.pulls,
                winner_id: outcome.winner_id,
                rounds: outcome.rounds,
                settlement,
            })
        })?;
        self.metrics
            .record_battle_finished(response.pulls.len() as u64);
        Ok(response)
    }

    pub fn cancel(&self, actor: &Actor, battle_id: u64) -> Result<Battle, EngineError> {
        let now = self.clock.now_ms();
        let battle = self.transact("cancel", |state, _| {
            let mut session = BattleSession::load(state, battle_id)?;
            session.cancel(actor, now)?;
            Ok(session.save()?.battle)
        })?;
        self.metrics.record_battle_cancelled();
        Ok(battle)
    }

    fn load_record(state: &S, battle_id: u64) -> Result<BattleRecord, EngineError> {
        load_battle(state, &Key::Battle(battle_id))?.ok_or(EngineError::BattleNotFound(battle_id))
    }

    /// Read-only snapshot for polling clients. Round results are recomputed
    /// from the stored log.
    pub fn status(&self, battle_id: u64) -> Result<BattleStatusResponse, EngineError> {
        self.read(|state| {
            let record = Self::load_record(state, battle_id)?;
            let rounds = record
                .outcome()?
                .map(|outcome| outcome.rounds)
                .unwrap_or_default();
            Ok(BattleStatusResponse {
                battle: record.battle,
                participants: record.participants,
                pulls: record.pulls,
                rounds,
                settlement: record.settlement,
            })
        })
    }

    /// Snapshot attached to state errors so a client can resync.
    pub fn snapshot_for(&self, err: &EngineError) -> Option<BattleStatusResponse> {
        err.battle_id().and_then(|battle_id| self.status(battle_id).ok())
    }

    /// Ordered reveal script. Empty until the battle has been started.
    pub fn replay(&self, battle_id: u64) -> Result<ReplayResponse, EngineError> {
        self.read(|state| {
            let record = Self::load_record(state, battle_id)?;
            let Some(outcome) = record.outcome()? else {
                return Ok(ReplayResponse {
                    battle_id,
                    steps: Vec::new(),
                    winner_id: None,
                });
            };
            let mut pulls = BTreeMap::new();
            for battle_pull in &record.pulls {
                let pull = load_pull(state, &Key::Pull(battle_pull.pull_id))?
                    .ok_or(EngineError::PullNotFound(battle_pull.pull_id))?;
                pulls.insert(pull.id, pull);
            }
            let steps = reveal_steps(&outcome, &record.participants, &record.pulls, &pulls)?;
            Ok(ReplayResponse {
                battle_id,
                steps,
                winner_id: Some(outcome.winner_id),
            })
        })
    }

    /// Battles in creation order, optionally filtered by status.
    pub fn list_battles(&self, status: Option<BattleStatus>) -> Result<Vec<Battle>, EngineError> {
        self.read(|state| {
            let ids = load_battle_index(state, &Key::BattleIndex)?.unwrap_or_default();
            let mut battles = Vec::new();
            for id in ids {
                let record = Self::load_record(state, id)?;
                if status.map_or(true, |status| record.battle.status == status) {
                    battles.push(record.battle);
                }
            }
            Ok(battles)
        })
    }
}
