//! Battle state machine.
//!
//! `WAITING -> IN_PROGRESS -> FINISHED`, or `WAITING -> CANCELLED`. A
//! [`BattleSession`] loads one [`BattleRecord`], applies a single transition
//! against the caller's unit of work and writes the record back with
//! [`BattleSession::save`]. A guard failure returns before anything is
//! written, and a failure part-way through `start` is discarded with the
//! unit of work, leaving the battle WAITING and retryable.

use packbattle_types::pack::{
    Battle, BattleMode, BattleOutcome, BattlePull, BattleStatus, CardBox, Participant, Pull,
    Reason, ReservationToken, Settlement, MAX_BATTLE_PARTICIPANTS, MAX_BATTLE_ROUNDS,
    MIN_BATTLE_PARTICIPANTS,
};
use packbattle_types::{Actor, EngineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::ledger::CoinLedger;
use crate::lottery::{draw, RandomSource};
use crate::pull_rate::PullRateTable;
use crate::registry::ParticipantRegistry;
use crate::resolver::{resolve_battle, settle};
use crate::state::{
    load_battle, load_battle_index, next_id, push_inventory, store_battle, store_battle_index,
    store_pull, Counter, Key, State,
};

/// Everything persisted for one battle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleRecord {
    pub battle: Battle,
    pub participants: Vec<Participant>,
    /// Held entry fee per participant id. Bots and free battles have none.
    pub reservations: BTreeMap<u64, ReservationToken>,
    /// Round-major draw log, written once by `start`.
    pub pulls: Vec<BattlePull>,
    pub next_seat: u32,
    pub settlement: Option<Settlement>,
}

impl BattleRecord {
    pub fn new(battle: Battle) -> Self {
        Self {
            battle,
            participants: Vec::new(),
            reservations: BTreeMap::new(),
            pulls: Vec::new(),
            next_seat: 0,
            settlement: None,
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| participant.user_id == user_id)
    }

    pub fn spots_left(&self) -> u32 {
        self.battle
            .max_participants
            .saturating_sub(self.participants.len() as u32)
    }

    /// Participants in seat order.
    pub fn seated(&self) -> Vec<&Participant> {
        let mut seated: Vec<_> = self.participants.iter().collect();
        seated.sort_by_key(|participant| participant.seat);
        seated
    }

    pub fn outcome(&self) -> Result<Option<BattleOutcome>, EngineError> {
        if self.pulls.is_empty() {
            return Ok(None);
        }
        resolve_battle(
            self.battle.mode,
            self.battle.rounds,
            &self.participants,
            &self.pulls,
        )
        .map(Some)
    }
}

/// Battle settings chosen by the creator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BattleSettings {
    pub mode: BattleMode,
    pub rounds: u32,
    pub max_participants: u32,
    pub share_rewards: bool,
}

impl BattleSettings {
    fn validate(&self) -> Result<(), EngineError> {
        if !(1..=MAX_BATTLE_ROUNDS).contains(&self.rounds) {
            return Err(EngineError::InvalidBattle(format!(
                "rounds must be between 1 and {MAX_BATTLE_ROUNDS}"
            )));
        }
        if !(MIN_BATTLE_PARTICIPANTS..=MAX_BATTLE_PARTICIPANTS).contains(&self.max_participants) {
            return Err(EngineError::InvalidBattle(format!(
                "maxParticipants must be between {MIN_BATTLE_PARTICIPANTS} and {MAX_BATTLE_PARTICIPANTS}"
            )));
        }
        Ok(())
    }
}

pub struct BattleSession<'a, S: State + ?Sized> {
    state: &'a mut S,
    record: BattleRecord,
}

impl<'a, S: State + ?Sized> BattleSession<'a, S> {
    /// Opens a new WAITING battle and seats the creator, who pays the entry
    /// fee like everyone else.
    pub fn create(
        state: &'a mut S,
        creator: &Actor,
        card_box: &CardBox,
        settings: BattleSettings,
        now: u64,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let entry_fee = card_box
            .price
            .checked_mul(settings.rounds as u64)
            .ok_or(EngineError::BalanceOverflow)?;
        let battle = Battle {
            id: next_id(state, Counter::Battle)?,
            status: BattleStatus::Waiting,
            mode: settings.mode,
            share_rewards: settings.share_rewards,
            rounds: settings.rounds,
            max_participants: settings.max_participants,
            entry_fee,
            box_id: card_box.id,
            creator_id: creator.user_id.clone(),
            winner_id: None,
            created_at: now,
            ended_at: None,
        };
        let mut index = load_battle_index(state, &Key::BattleIndex)?.unwrap_or_default();
        index.push(battle.id);
        store_battle_index(state, Key::BattleIndex, index)?;

        let mut session = Self {
            state,
            record: BattleRecord::new(battle),
        };
        session.join(creator, now)?;
        info!(
            battle_id = session.record.battle.id,
            creator = %creator.user_id,
            entry_fee,
            "battle created"
        );
        Ok(session)
    }

    pub fn load(state: &'a mut S, battle_id: u64) -> Result<Self, EngineError> {
        let record = load_battle(state, &Key::Battle(battle_id))?
            .ok_or(EngineError::BattleNotFound(battle_id))?;
        Ok(Self { state, record })
    }

    pub fn record(&self) -> &BattleRecord {
        &self.record
    }

    pub fn battle(&self) -> &Battle {
        &self.record.battle
    }

    /// Writes the record into the unit of work.
    pub fn save(self) -> Result<BattleRecord, EngineError> {
        store_battle(
            self.state,
            Key::Battle(self.record.battle.id),
            self.record.clone(),
        )?;
        Ok(self.record)
    }

    pub fn join(&mut self, actor: &Actor, now: u64) -> Result<Participant, EngineError> {
        ParticipantRegistry::new(&mut *self.state).join(&mut self.record, &actor.user_id, now)
    }

    pub fn leave(&mut self, actor: &Actor) -> Result<u64, EngineError> {
        ParticipantRegistry::new(&mut *self.state).leave(&mut self.record, &actor.user_id)
    }

    pub fn set_ready(&mut self, actor: &Actor, ready: bool) -> Result<bool, EngineError> {
        ParticipantRegistry::new(&mut *self.state).set_ready(
            &mut self.record,
            &actor.user_id,
            ready,
        )
    }

    pub fn add_bots(
        &mut self,
        actor: &Actor,
        count: u32,
        now: u64,
    ) -> Result<Vec<Participant>, EngineError> {
        ParticipantRegistry::new(&mut *self.state).add_bots(&mut self.record, actor, count, now)
    }

    fn ensure_creator_or_admin(&self, actor: &Actor) -> Result<(), EngineError> {
        if actor.is_admin || actor.user_id == self.record.battle.creator_id {
            Ok(())
        } else {
            Err(EngineError::NotAuthorized)
        }
    }

    fn ensure_waiting(&self) -> Result<(), EngineError> {
        let battle = &self.record.battle;
        if battle.status != BattleStatus::Waiting {
            return Err(EngineError::BattleNotWaiting {
                battle_id: battle.id,
                status: battle.status,
            });
        }
        Ok(())
    }

    /// Start guards, in order: authority, status, capacity, readiness.
    pub fn ensure_startable(&self, actor: &Actor) -> Result<(), EngineError> {
        self.ensure_creator_or_admin(actor)?;
        self.ensure_waiting()?;
        let battle = &self.record.battle;
        let joined = self.record.participants.len() as u32;
        if joined < battle.max_participants {
            return Err(EngineError::NotFull {
                battle_id: battle.id,
                joined,
                max: battle.max_participants,
            });
        }
        let waiting = self
            .record
            .participants
            .iter()
            .filter(|participant| !participant.counts_as_ready())
            .count() as u32;
        if waiting > 0 {
            return Err(EngineError::NotReady {
                battle_id: battle.id,
                waiting,
            });
        }
        Ok(())
    }

    /// Draws every round, resolves, settles and finishes the battle.
    ///
    /// `table` must be freshly validated from the current box contents.
    pub fn start<R: RandomSource + ?Sized>(
        &mut self,
        actor: &Actor,
        table: &PullRateTable,
        rng: &mut R,
        house_edge_bps: u16,
        now: u64,
    ) -> Result<(BattleOutcome, Settlement), EngineError> {
        self.ensure_startable(actor)?;
        let battle_id = self.record.battle.id;
        if table.box_id() != self.record.battle.box_id {
            return Err(EngineError::InvalidBattle(format!(
                "battle {battle_id} draws from box {}, not {}",
                self.record.battle.box_id,
                table.box_id()
            )));
        }
        self.record.battle.status = BattleStatus::InProgress;
        info!(battle_id, "battle in progress");

        let seated: Vec<Participant> = self.record.seated().into_iter().cloned().collect();
        let mut log = Vec::with_capacity(seated.len() * self.record.battle.rounds as usize);
        for round_number in 1..=self.record.battle.rounds {
            for participant in &seated {
                let card = draw(table, &mut *rng);
                let pull = Pull::snapshot(
                    next_id(self.state, Counter::Pull)?,
                    &participant.user_id,
                    table.box_id(),
                    card,
                    Some(battle_id),
                    now,
                );
                if !participant.is_bot {
                    push_inventory(self.state, &participant.user_id, pull.id)?;
                }
                log.push(BattlePull {
                    id: next_id(self.state, Counter::BattlePull)?,
                    battle_id,
                    participant_id: participant.id,
                    round_number,
                    pull_id: pull.id,
                    coin_value: pull.card_value,
                });
                store_pull(self.state, Key::Pull(pull.id), pull)?;
            }
        }
        self.record.pulls = log;

        let committed = ParticipantRegistry::new(&mut *self.state).commit_all(&self.record)?;
        let outcome = resolve_battle(
            self.record.battle.mode,
            self.record.battle.rounds,
            &self.record.participants,
            &self.record.pulls,
        )?;
        let settlement = settle(
            &outcome,
            &self.record.participants,
            self.record.battle.entry_fee,
            self.record.battle.share_rewards,
            house_edge_bps,
        )?;
        if committed != settlement.pot {
            return Err(EngineError::storage(format!(
                "battle {battle_id} committed {committed} coins but the pot is {}",
                settlement.pot
            )));
        }

        let mut ledger = CoinLedger::new(&mut *self.state);
        let credited = settlement
            .payouts
            .iter()
            .filter(|payout| payout.credited && payout.amount > 0);
        for payout in credited {
            ledger.credit(
                &payout.user_id,
                payout.amount,
                Reason::Prize,
                &format!("battle:{battle_id}:prize:{}", payout.participant_id),
            )?;
        }

        let battle = &mut self.record.battle;
        battle.status = BattleStatus::Finished;
        battle.winner_id = Some(outcome.winner_id.clone());
        battle.ended_at = Some(now);
        self.record.settlement = Some(settlement.clone());
        info!(
            battle_id,
            winner = %outcome.winner_id,
            pot = settlement.pot,
            house_retained = settlement.house_retained,
            "battle finished"
        );
        Ok((outcome, settlement))
    }

    /// Cancels a WAITING battle and refunds every entry fee.
    pub fn cancel(&mut self, actor: &Actor, now: u64) -> Result<u64, EngineError> {
        self.ensure_creator_or_admin(actor)?;
        self.ensure_waiting()?;
        let refunded = ParticipantRegistry::new(&mut *self.state).release_all(&mut self.record)?;
        let battle = &mut self.record.battle;
        battle.status = BattleStatus::Cancelled;
        battle.ended_at = Some(now);
        info!(battle_id = battle.id, refunded, "battle cancelled");
        Ok(refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lottery::FixedRolls;
    use crate::mocks::{fund, two_card_box};
    use crate::state::{Memory, Pending};

    fn settings(max_participants: u32) -> BattleSettings {
        BattleSettings {
            mode: BattleMode::HighestWins,
            rounds: 2,
            max_participants,
            share_rewards: false,
        }
    }

    #[test]
    fn test_create_seats_creator_and_charges_fee() {
        let mut memory = Memory::default();
        fund(&mut memory, "alice", 100);
        let card_box = two_card_box(1, 10);
        let record =
            BattleSession::create(&mut memory, &Actor::user("alice"), &card_box, settings(2), 5)
                .unwrap()
                .save()
                .unwrap();
        assert_eq!(record.battle.entry_fee, 20);
        assert_eq!(record.participants.len(), 1);
        assert_eq!(record.participants[0].seat, 0);
        assert_eq!(
            CoinLedger::new(&mut memory).balance("alice").unwrap().held,
            20
        );
    }

    #[test]
    fn test_create_rejects_bad_settings() {
        let mut memory = Memory::default();
        let card_box = two_card_box(1, 10);
        for bad in [
            BattleSettings { rounds: 0, ..settings(2) },
            BattleSettings { rounds: MAX_BATTLE_ROUNDS + 1, ..settings(2) },
            settings(1),
            settings(MAX_BATTLE_PARTICIPANTS + 1),
        ] {
            let err = BattleSession::create(&mut memory, &Actor::user("a"), &card_box, bad, 0)
                .err()
                .unwrap();
            assert_eq!(err.code(), "InvalidBattle");
        }
    }

    #[test]
    fn test_start_guards_in_order() {
        let mut memory = Memory::default();
        fund(&mut memory, "alice", 100);
        fund(&mut memory, "bob", 100);
        let card_box = two_card_box(1, 10);
        let table = PullRateTable::from_box(&card_box).unwrap();
        let mut rolls = FixedRolls::new(vec![0]);
        let mut session =
            BattleSession::create(&mut memory, &Actor::user("alice"), &card_box, settings(2), 0)
                .unwrap();

        assert_eq!(
            session.start(&Actor::user("bob"), &table, &mut rolls, 0, 1).unwrap_err(),
            EngineError::NotAuthorized
        );
        assert!(matches!(
            session.start(&Actor::user("alice"), &table, &mut rolls, 0, 1),
            Err(EngineError::NotFull { joined: 1, max: 2, .. })
        ));
        session.join(&Actor::user("bob"), 1).unwrap();
        assert!(matches!(
            session.start(&Actor::user("alice"), &table, &mut rolls, 0, 1),
            Err(EngineError::NotReady { waiting: 2, .. })
        ));
        session.set_ready(&Actor::user("alice"), true).unwrap();
        session.set_ready(&Actor::user("bob"), true).unwrap();
        session
            .start(&Actor::admin("root"), &table, &mut rolls, 0, 1)
            .unwrap();
        assert_eq!(session.battle().status, BattleStatus::Finished);
        assert!(matches!(
            session.start(&Actor::user("alice"), &table, &mut rolls, 0, 1),
            Err(EngineError::BattleNotWaiting { status: BattleStatus::Finished, .. })
        ));
    }

    #[test]
    fn test_start_logs_round_major() {
        let mut memory = Memory::default();
        fund(&mut memory, "alice", 100);
        fund(&mut memory, "bob", 100);
        let card_box = two_card_box(1, 10);
        let table = PullRateTable::from_box(&card_box).unwrap();
        let mut session =
            BattleSession::create(&mut memory, &Actor::user("alice"), &card_box, settings(2), 0)
                .unwrap();
        session.join(&Actor::user("bob"), 0).unwrap();
        session.set_ready(&Actor::user("alice"), true).unwrap();
        session.set_ready(&Actor::user("bob"), true).unwrap();

        // 55 -> common (value 1), 75 -> rare (value 5)
        let mut rolls = FixedRolls::percents(&[75.0, 55.0, 55.0, 75.0]);
        let (outcome, settlement) = session
            .start(&Actor::user("alice"), &table, &mut rolls, 0, 9)
            .unwrap();
        let record = session.save().unwrap();
        let order: Vec<_> = record
            .pulls
            .iter()
            .map(|pull| (pull.round_number, pull.participant_id, pull.coin_value))
            .collect();
        let (a, b) = (record.participants[0].id, record.participants[1].id);
        assert_eq!(order, vec![(1, a, 5), (1, b, 1), (2, a, 1), (2, b, 5)]);
        // Equal totals: lowest seat wins.
        assert_eq!(outcome.winner_id, "alice");
        assert_eq!(settlement.pot, 40);
        assert_eq!(record.battle.ended_at, Some(9));

        let ledger = CoinLedger::new(&mut memory);
        assert_eq!(ledger.balance("alice").unwrap().available, 120);
        assert_eq!(ledger.balance("bob").unwrap().available, 80);
        assert_eq!(ledger.balance("bob").unwrap().held, 0);
    }

    #[test]
    fn test_cancel_refunds_everyone() {
        let mut memory = Memory::default();
        fund(&mut memory, "alice", 100);
        fund(&mut memory, "bob", 100);
        let card_box = two_card_box(1, 10);
        let mut session =
            BattleSession::create(&mut memory, &Actor::user("alice"), &card_box, settings(3), 0)
                .unwrap();
        session.join(&Actor::user("bob"), 0).unwrap();
        assert_eq!(
            session.cancel(&Actor::user("bob"), 1),
            Err(EngineError::NotAuthorized)
        );
        assert_eq!(session.cancel(&Actor::user("alice"), 1), Ok(40));
        assert_eq!(session.battle().status, BattleStatus::Cancelled);
        session.save().unwrap();
        let ledger = CoinLedger::new(&mut memory);
        assert_eq!(ledger.balance("alice").unwrap().available, 100);
        assert_eq!(ledger.balance("bob").unwrap().available, 100);
    }

    #[test]
    fn test_start_rejects_foreign_box() {
        let mut memory = Memory::default();
        fund(&mut memory, "alice", 100);
        fund(&mut memory, "bob", 100);
        let card_box = two_card_box(1, 10);
        let mut session =
            BattleSession::create(&mut memory, &Actor::user("alice"), &card_box, settings(2), 0)
                .unwrap();
        session.join(&Actor::user("bob"), 0).unwrap();
        session.set_ready(&Actor::user("alice"), true).unwrap();
        session.set_ready(&Actor::user("bob"), true).unwrap();
        let battle_id = session.save().unwrap().battle.id;

        let other = PullRateTable::from_box(&two_card_box(2, 10)).unwrap();
        let mut rolls = FixedRolls::new(vec![0]);
        {
            let mut pending = Pending::new(&memory);
            let mut session = BattleSession::load(&mut pending, battle_id).unwrap();
            assert!(session
                .start(&Actor::user("alice"), &other, &mut rolls, 0, 1)
                .is_err());
        }
        let record = BattleSession::load(&mut memory, battle_id).unwrap().record().clone();
        assert_eq!(record.battle.status, BattleStatus::Waiting);
        assert!(record.pulls.is_empty());
        assert_eq!(
            CoinLedger::new(&mut memory).balance("bob").unwrap().held,
            20
        );
    }
}
