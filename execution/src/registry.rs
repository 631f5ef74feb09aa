//! Participant registry and slot accounting.
//!
//! A seat is claimed in the same unit of work that reserves its entry fee, so
//! `maxParticipants` is never exceeded and a failed reservation leaves no
//! participant behind. Seats are handed out from a per-battle counter and are
//! never reused, which keeps them usable as the tie-break key.

use packbattle_types::pack::{
    bot_user_id, BattleStatus, Participant, Reason, ReservationToken, BOT_USER_PREFIX,
};
use packbattle_types::{Actor, EngineError};
use tracing::info;

use crate::ledger::CoinLedger;
use crate::session::BattleRecord;
use crate::state::{next_id, Counter, State};

pub struct ParticipantRegistry<'a, S: State + ?Sized> {
    state: &'a mut S,
}

impl<'a, S: State + ?Sized> ParticipantRegistry<'a, S> {
    pub fn new(state: &'a mut S) -> Self {
        Self { state }
    }

    fn ensure_waiting(record: &BattleRecord) -> Result<(), EngineError> {
        if record.battle.status != BattleStatus::Waiting {
            return Err(EngineError::BattleNotWaiting {
                battle_id: record.battle.id,
                status: record.battle.status,
            });
        }
        Ok(())
    }

    fn seat(
        &mut self,
        record: &mut BattleRecord,
        user_id: String,
        is_bot: bool,
        now: u64,
    ) -> Result<Participant, EngineError> {
        let participant = Participant {
            id: next_id(self.state, Counter::Participant)?,
            battle_id: record.battle.id,
            user_id,
            seat: record.next_seat,
            is_ready: is_bot,
            is_bot,
            joined_at: now,
        };
        record.next_seat += 1;
        record.participants.push(participant.clone());
        Ok(participant)
    }

    /// Claims a seat and reserves the entry fee.
    pub fn join(
        &mut self,
        record: &mut BattleRecord,
        user_id: &str,
        now: u64,
    ) -> Result<Participant, EngineError> {
        let battle_id = record.battle.id;
        if user_id.starts_with(BOT_USER_PREFIX) {
            return Err(EngineError::ReservedUserId(user_id.to_string()));
        }
        Self::ensure_waiting(record)?;
        if record.participant(user_id).is_some() {
            return Err(EngineError::AlreadyJoined { battle_id });
        }
        if record.spots_left() == 0 {
            return Err(EngineError::BattleFull { battle_id });
        }

        let fee = record.battle.entry_fee;
        let key = format!("battle:{battle_id}:{user_id}:join:{}", record.next_seat);
        let token = if fee > 0 {
            Some(CoinLedger::new(self.state).reserve(user_id, fee, Reason::EntryFee, &key)?)
        } else {
            None
        };
        let participant = self.seat(record, user_id.to_string(), false, now)?;
        if let Some(token) = token {
            record.reservations.insert(participant.id, token);
        }
        info!(battle_id, user_id, seat = participant.seat, fee, "participant joined");
        Ok(participant)
    }

    /// Gives up a seat and refunds the entry fee. Returns the refunded amount.
    pub fn leave(&mut self, record: &mut BattleRecord, user_id: &str) -> Result<u64, EngineError> {
        let battle_id = record.battle.id;
        Self::ensure_waiting(record)?;
        if record.battle.creator_id == user_id {
            return Err(EngineError::CreatorCannotLeave { battle_id });
        }
        let participant_id = record
            .participant(user_id)
            .map(|participant| participant.id)
            .ok_or(EngineError::NotParticipant { battle_id })?;

        let refunded = match record.reservations.remove(&participant_id) {
            Some(token) => self.release(token)?,
            None => 0,
        };
        record
            .participants
            .retain(|participant| participant.id != participant_id);
        info!(battle_id, user_id, refunded, "participant left");
        Ok(refunded)
    }

    fn release(&mut self, token: ReservationToken) -> Result<u64, EngineError> {
        Ok(CoinLedger::new(self.state).release(token)?.amount)
    }

    pub fn set_ready(
        &mut self,
        record: &mut BattleRecord,
        user_id: &str,
        ready: bool,
    ) -> Result<bool, EngineError> {
        let battle_id = record.battle.id;
        Self::ensure_waiting(record)?;
        let participant = record
            .participants
            .iter_mut()
            .find(|participant| participant.user_id == user_id)
            .ok_or(EngineError::NotParticipant { battle_id })?;
        if participant.is_bot {
            return Ok(true);
        }
        participant.is_ready = ready;
        Ok(ready)
    }

    /// Fills `count` seats with bots. Bots pay no fee and are always ready.
    pub fn add_bots(
        &mut self,
        record: &mut BattleRecord,
        actor: &Actor,
        count: u32,
        now: u64,
    ) -> Result<Vec<Participant>, EngineError> {
        if !actor.is_admin {
            return Err(EngineError::NotAdmin);
        }
        Self::ensure_waiting(record)?;
        if count == 0 {
            return Err(EngineError::InvalidBattle("bot count must be at least 1".into()));
        }
        let spots_left = record.spots_left();
        if count > spots_left {
            return Err(EngineError::ExceedsCapacity {
                requested: count,
                spots_left,
            });
        }
        let mut bots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let user_id = bot_user_id(record.battle.id, record.next_seat);
            if record.participant(&user_id).is_some() {
                return Err(EngineError::AlreadyJoined {
                    battle_id: record.battle.id,
                });
            }
            bots.push(self.seat(record, user_id, true, now)?);
        }
        info!(battle_id = record.battle.id, count, "bots added");
        Ok(bots)
    }

    /// Refunds every outstanding entry fee.
    pub fn release_all(&mut self, record: &mut BattleRecord) -> Result<u64, EngineError> {
        let mut refunded = 0u64;
        for token in std::mem::take(&mut record.reservations).into_values() {
            refunded += self.release(token)?;
        }
        Ok(refunded)
    }

    /// Moves every held entry fee into the pot.
    pub fn commit_all(&mut self, record: &BattleRecord) -> Result<u64, EngineError> {
        let mut ledger = CoinLedger::new(self.state);
        let mut pot = 0u64;
        for token in record.reservations.values() {
            pot = pot
                .checked_add(ledger.commit(*token)?.amount)
                .ok_or(EngineError::BalanceOverflow)?;
        }
        Ok(pot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::battle_record;
    use crate::state::Memory;
    use packbattle_types::pack::CoinBalance;

    fn funded(users: &[(&str, u64)]) -> Memory {
        let mut memory = Memory::default();
        let mut ledger = CoinLedger::new(&mut memory);
        for (user, amount) in users {
            ledger
                .credit(user, *amount, Reason::Grant, &format!("seed:{user}"))
                .unwrap();
        }
        memory
    }

    #[test]
    fn test_insufficient_funds_creates_no_participant() {
        let mut memory = funded(&[("alice", 40)]);
        let mut record = battle_record(1, "creator", 50, 2);
        let err = ParticipantRegistry::new(&mut memory)
            .join(&mut record, "alice", 0)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                needed: 50,
                available: 40
            }
        );
        assert!(record.participants.is_empty());
        assert_eq!(record.next_seat, 0);
    }

    #[test]
    fn test_join_guards() {
        let mut memory = funded(&[("a", 100), ("b", 100), ("c", 100)]);
        let mut record = battle_record(1, "a", 10, 2);
        let mut registry = ParticipantRegistry::new(&mut memory);
        registry.join(&mut record, "a", 0).unwrap();
        assert_eq!(
            registry.join(&mut record, "a", 0),
            Err(EngineError::AlreadyJoined { battle_id: 1 })
        );
        registry.join(&mut record, "b", 0).unwrap();
        assert_eq!(
            registry.join(&mut record, "c", 0),
            Err(EngineError::BattleFull { battle_id: 1 })
        );
        drop(registry);
        assert_eq!(
            CoinLedger::new(&mut memory).balance("c").unwrap().available,
            100
        );
    }

    #[test]
    fn test_leave_refunds_and_seats_are_not_reused() {
        let mut memory = funded(&[("a", 100), ("b", 100), ("c", 100)]);
        let mut record = battle_record(1, "a", 10, 3);
        let mut registry = ParticipantRegistry::new(&mut memory);
        registry.join(&mut record, "a", 0).unwrap();
        registry.join(&mut record, "b", 0).unwrap();
        assert_eq!(
            registry.leave(&mut record, "a"),
            Err(EngineError::CreatorCannotLeave { battle_id: 1 })
        );
        assert_eq!(registry.leave(&mut record, "b"), Ok(10));
        let rejoined = registry.join(&mut record, "b", 0).unwrap();
        assert_eq!(rejoined.seat, 2);
        drop(registry);
        assert_eq!(
            CoinLedger::new(&mut memory).balance("b").unwrap(),
            CoinBalance {
                available: 90,
                held: 10
            }
        );
    }

    #[test]
    fn test_bots_require_admin_and_capacity() {
        let mut memory = funded(&[("a", 100)]);
        let mut record = battle_record(3, "a", 10, 3);
        let mut registry = ParticipantRegistry::new(&mut memory);
        registry.join(&mut record, "a", 0).unwrap();
        assert_eq!(
            registry.add_bots(&mut record, &Actor::user("a"), 1, 0),
            Err(EngineError::NotAdmin)
        );
        assert_eq!(
            registry.add_bots(&mut record, &Actor::admin("root"), 3, 0),
            Err(EngineError::ExceedsCapacity {
                requested: 3,
                spots_left: 2
            })
        );
        let bots = registry
            .add_bots(&mut record, &Actor::admin("root"), 2, 0)
            .unwrap();
        assert_eq!(bots[0].user_id, "bot-3-1");
        assert!(bots.iter().all(|bot| bot.is_bot && bot.counts_as_ready()));
        assert_eq!(record.reservations.len(), 1);
    }

    #[test]
    fn test_bot_ids_are_reserved() {
        let mut memory = funded(&[("creator", 100), ("bot-1-2", 100)]);
        let mut record = battle_record(1, "creator", 10, 3);
        let mut registry = ParticipantRegistry::new(&mut memory);
        registry.join(&mut record, "creator", 0).unwrap();
        assert_eq!(
            registry.join(&mut record, "bot-1-2", 0),
            Err(EngineError::ReservedUserId("bot-1-2".into()))
        );
        assert_eq!(record.participants.len(), 1);

        // A record that already seats a human under the next bot id.
        registry
            .seat(&mut record, "bot-1-2".into(), false, 0)
            .unwrap();
        record.next_seat = 2;
        assert_eq!(
            registry.add_bots(&mut record, &Actor::admin("root"), 1, 0),
            Err(EngineError::AlreadyJoined { battle_id: 1 })
        );
        drop(registry);
        assert_eq!(
            CoinLedger::new(&mut memory)
                .balance("bot-1-2")
                .unwrap()
                .available,
            100
        );
    }

    #[test]
    fn test_set_ready_requires_participant() {
        let mut memory = funded(&[("a", 100)]);
        let mut record = battle_record(1, "a", 10, 2);
        let mut registry = ParticipantRegistry::new(&mut memory);
        registry.join(&mut record, "a", 0).unwrap();
        assert_eq!(registry.set_ready(&mut record, "a", true), Ok(true));
        assert_eq!(
            registry.set_ready(&mut record, "z", true),
            Err(EngineError::NotParticipant { battle_id: 1 })
        );
    }
}
