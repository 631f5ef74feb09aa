//! Coin ledger.
//!
//! The single point of truth for coin movement. Every mutation is a
//! read-modify-write on the caller's unit of work, so two debits against one
//! account can never both observe the pre-deduction balance. Mutations carry
//! an idempotency key: replaying a key with the same parameters returns the
//! stored receipt, reusing it for anything else is rejected.

use packbattle_types::pack::{
    CoinBalance, LedgerOp, LedgerReceipt, Reason, Reservation, ReservationStatus,
    ReservationToken,
};
use packbattle_types::EngineError;
use tracing::debug;

use crate::state::{
    load_account, load_receipt, load_reservation, next_id, store_account, store_receipt,
    store_reservation, Counter, Key, State,
};

pub struct CoinLedger<'a, S: State + ?Sized> {
    state: &'a mut S,
}

impl<'a, S: State + ?Sized> CoinLedger<'a, S> {
    pub fn new(state: &'a mut S) -> Self {
        Self { state }
    }

    pub fn balance(&self, user_id: &str) -> Result<CoinBalance, EngineError> {
        Ok(load_account(&*self.state, &Key::Account(user_id.to_string()))?.unwrap_or_default())
    }

    fn store_balance(&mut self, user_id: &str, balance: CoinBalance) -> Result<(), EngineError> {
        store_account(self.state, Key::Account(user_id.to_string()), balance)
    }

    /// Returns the stored receipt when `key` was already applied with identical parameters.
    fn replayed(
        &self,
        key: &str,
        user_id: &str,
        op: LedgerOp,
        amount: u64,
        reason: Reason,
    ) -> Result<Option<LedgerReceipt>, EngineError> {
        match load_receipt(&*self.state, &Key::Receipt(key.to_string()))? {
            Some(receipt)
                if receipt.user_id == user_id
                    && receipt.op == op
                    && receipt.amount == amount
                    && receipt.reason == reason =>
            {
                debug!(key, user_id, "ledger replay");
                Ok(Some(receipt))
            }
            Some(_) => Err(EngineError::IdempotencyConflict {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn record(&mut self, key: &str, receipt: LedgerReceipt) -> Result<(), EngineError> {
        store_receipt(self.state, Key::Receipt(key.to_string()), receipt)
    }

    /// Removes `amount` from the available balance. Returns the new available balance.
    pub fn debit(
        &mut self,
        user_id: &str,
        amount: u64,
        reason: Reason,
        key: &str,
    ) -> Result<u64, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if let Some(receipt) = self.replayed(key, user_id, LedgerOp::Debit, amount, reason)? {
            return Ok(receipt.balance_after);
        }
        let mut balance = self.balance(user_id)?;
        balance.available =
            balance
                .available
                .checked_sub(amount)
                .ok_or(EngineError::InsufficientFunds {
                    needed: amount,
                    available: balance.available,
                })?;
        self.store_balance(user_id, balance)?;
        self.record(
            key,
            LedgerReceipt {
                user_id: user_id.to_string(),
                op: LedgerOp::Debit,
                amount,
                reason,
                balance_after: balance.available,
                reservation: None,
            },
        )?;
        debug!(user_id, amount, %reason, balance = balance.available, "ledger debit");
        Ok(balance.available)
    }

    /// Adds `amount` to the available balance. Returns the new available balance.
    pub fn credit(
        &mut self,
        user_id: &str,
        amount: u64,
        reason: Reason,
        key: &str,
    ) -> Result<u64, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if let Some(receipt) = self.replayed(key, user_id, LedgerOp::Credit, amount, reason)? {
            return Ok(receipt.balance_after);
        }
        let mut balance = self.balance(user_id)?;
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or(EngineError::BalanceOverflow)?;
        self.store_balance(user_id, balance)?;
        self.record(
            key,
            LedgerReceipt {
                user_id: user_id.to_string(),
                op: LedgerOp::Credit,
                amount,
                reason,
                balance_after: balance.available,
                reservation: None,
            },
        )?;
        debug!(user_id, amount, %reason, balance = balance.available, "ledger credit");
        Ok(balance.available)
    }

    /// Moves `amount` from available to held and returns the hold's token.
    pub fn reserve(
        &mut self,
        user_id: &str,
        amount: u64,
        reason: Reason,
        key: &str,
    ) -> Result<ReservationToken, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if let Some(receipt) = self.replayed(key, user_id, LedgerOp::Reserve, amount, reason)? {
            if let Some(token) = receipt.reservation {
                return Ok(token);
            }
        }
        let mut balance = self.balance(user_id)?;
        balance.available =
            balance
                .available
                .checked_sub(amount)
                .ok_or(EngineError::InsufficientFunds {
                    needed: amount,
                    available: balance.available,
                })?;
        balance.held = balance
            .held
            .checked_add(amount)
            .ok_or(EngineError::BalanceOverflow)?;
        let token = ReservationToken(next_id(self.state, Counter::Reservation)?);
        self.store_balance(user_id, balance)?;
        store_reservation(
            self.state,
            Key::Reservation(token.0),
            Reservation {
                token,
                user_id: user_id.to_string(),
                amount,
                reason,
                status: ReservationStatus::Held,
            },
        )?;
        self.record(
            key,
            LedgerReceipt {
                user_id: user_id.to_string(),
                op: LedgerOp::Reserve,
                amount,
                reason,
                balance_after: balance.available,
                reservation: Some(token),
            },
        )?;
        debug!(user_id, amount, %reason, token = token.0, "ledger reserve");
        Ok(token)
    }

    fn load_reservation(&self, token: ReservationToken) -> Result<Reservation, EngineError> {
        load_reservation(&*self.state, &Key::Reservation(token.0))?
            .ok_or(EngineError::ReservationNotFound(token.0))
    }

    /// Finalizes a hold: the coins leave the user for good. Committing twice is a no-op.
    pub fn commit(&mut self, token: ReservationToken) -> Result<Reservation, EngineError> {
        let mut reservation = self.load_reservation(token)?;
        match reservation.status {
            ReservationStatus::Committed => return Ok(reservation),
            ReservationStatus::Released => {
                return Err(EngineError::ReservationClosed {
                    token: token.0,
                    status: "released",
                })
            }
            ReservationStatus::Held => {}
        }
        let mut balance = self.balance(&reservation.user_id)?;
        balance.held = balance
            .held
            .checked_sub(reservation.amount)
            .ok_or_else(|| EngineError::storage("held balance below reservation"))?;
        self.store_balance(&reservation.user_id, balance)?;
        reservation.status = ReservationStatus::Committed;
        store_reservation(self.state, Key::Reservation(token.0), reservation.clone())?;
        debug!(user_id = %reservation.user_id, amount = reservation.amount, token = token.0, "ledger commit");
        Ok(reservation)
    }

    /// Returns a hold to the available balance. Releasing twice is a no-op.
    pub fn release(&mut self, token: ReservationToken) -> Result<Reservation, EngineError> {
        let mut reservation = self.load_reservation(token)?;
        match reservation.status {
            ReservationStatus::Released => return Ok(reservation),
            ReservationStatus::Committed => {
                return Err(EngineError::ReservationClosed {
                    token: token.0,
                    status: "committed",
                })
            }
            ReservationStatus::Held => {}
        }
        let mut balance = self.balance(&reservation.user_id)?;
        balance.held = balance
            .held
            .checked_sub(reservation.amount)
            .ok_or_else(|| EngineError::storage("held balance below reservation"))?;
        balance.available = balance
            .available
            .checked_add(reservation.amount)
            .ok_or(EngineError::BalanceOverflow)?;
        self.store_balance(&reservation.user_id, balance)?;
        reservation.status = ReservationStatus::Released;
        store_reservation(self.state, Key::Reservation(token.0), reservation.clone())?;
        debug!(
            user_id = %reservation.user_id,
            amount = reservation.amount,
            token = token.0,
            reason = %Reason::Refund,
            "ledger release"
        );
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Memory;
    use proptest::prelude::*;

    fn funded(user: &str, amount: u64) -> Memory {
        let mut memory = Memory::default();
        CoinLedger::new(&mut memory)
            .credit(user, amount, Reason::Grant, "seed")
            .unwrap();
        memory
    }

    #[test]
    fn test_debit_insufficient_leaves_balance() {
        let mut memory = funded("alice", 40);
        let mut ledger = CoinLedger::new(&mut memory);
        assert_eq!(
            ledger.debit("alice", 50, Reason::Purchase, "k1"),
            Err(EngineError::InsufficientFunds {
                needed: 50,
                available: 40
            })
        );
        assert_eq!(ledger.balance("alice").unwrap().available, 40);
    }

    #[test]
    fn test_idempotent_replay() {
        let mut memory = funded("alice", 100);
        let mut ledger = CoinLedger::new(&mut memory);
        assert_eq!(ledger.debit("alice", 30, Reason::Purchase, "open:1"), Ok(70));
        assert_eq!(ledger.debit("alice", 30, Reason::Purchase, "open:1"), Ok(70));
        assert_eq!(ledger.balance("alice").unwrap().available, 70);
        assert_eq!(
            ledger.debit("alice", 31, Reason::Purchase, "open:1"),
            Err(EngineError::IdempotencyConflict {
                key: "open:1".into()
            })
        );
        assert_eq!(
            ledger.credit("alice", 30, Reason::Sale, "open:1"),
            Err(EngineError::IdempotencyConflict {
                key: "open:1".into()
            })
        );
    }

    #[test]
    fn test_reserve_commit_release() {
        let mut memory = funded("alice", 100);
        let mut ledger = CoinLedger::new(&mut memory);

        let first = ledger.reserve("alice", 30, Reason::EntryFee, "b1").unwrap();
        let second = ledger.reserve("alice", 50, Reason::EntryFee, "b2").unwrap();
        assert_eq!(
            ledger.balance("alice").unwrap(),
            CoinBalance {
                available: 20,
                held: 80
            }
        );
        assert_eq!(
            ledger.reserve("alice", 30, Reason::EntryFee, "b1").unwrap(),
            first
        );

        ledger.commit(first).unwrap();
        ledger.commit(first).unwrap();
        assert_eq!(ledger.release(second).unwrap().amount, 50);
        assert_eq!(
            ledger.release(second).unwrap().status,
            ReservationStatus::Released
        );
        assert_eq!(
            ledger.balance("alice").unwrap(),
            CoinBalance {
                available: 70,
                held: 0
            }
        );
        assert!(matches!(
            ledger.release(first),
            Err(EngineError::ReservationClosed { .. })
        ));
        assert!(matches!(
            ledger.commit(second),
            Err(EngineError::ReservationClosed { .. })
        ));
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let mut memory = Memory::default();
        let mut ledger = CoinLedger::new(&mut memory);
        assert_eq!(
            ledger.credit("bob", 0, Reason::Prize, "z"),
            Err(EngineError::InvalidAmount(0))
        );
    }

    #[derive(Clone, Debug)]
    enum Op {
        Debit(u64),
        Credit(u64),
        Reserve(u64),
        Commit(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..200).prop_map(Op::Debit),
            (1u64..200).prop_map(Op::Credit),
            (1u64..200).prop_map(Op::Reserve),
            (0usize..8).prop_map(Op::Commit),
            (0usize..8).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn balance_is_sum_of_applied_deltas(ops in proptest::collection::vec(op(), 1..64)) {
            let mut memory = Memory::default();
            let mut ledger = CoinLedger::new(&mut memory);
            let mut expected_available: i128 = 0;
            let mut expected_held: i128 = 0;
            let mut tokens = Vec::new();

            for (idx, op) in ops.into_iter().enumerate() {
                let key = format!("op:{idx}");
                match op {
                    Op::Debit(amount) => {
                        if ledger.debit("u", amount, Reason::Purchase, &key).is_ok() {
                            expected_available -= amount as i128;
                        }
                    }
                    Op::Credit(amount) => {
                        ledger.credit("u", amount, Reason::Grant, &key).unwrap();
                        expected_available += amount as i128;
                    }
                    Op::Reserve(amount) => {
                        if let Ok(token) = ledger.reserve("u", amount, Reason::EntryFee, &key) {
                            expected_available -= amount as i128;
                            expected_held += amount as i128;
                            tokens.push((token, amount, false));
                        }
                    }
                    Op::Commit(slot) => {
                        if let Some((token, amount, closed)) = tokens.get_mut(slot) {
                            if !*closed && ledger.commit(*token).is_ok() {
                                expected_held -= *amount as i128;
                                *closed = true;
                            }
                        }
                    }
                    Op::Release(slot) => {
                        if let Some((token, amount, closed)) = tokens.get_mut(slot) {
                            if !*closed && ledger.release(*token).is_ok() {
                                expected_held -= *amount as i128;
                                expected_available += *amount as i128;
                                *closed = true;
                            }
                        }
                    }
                }
                let balance = ledger.balance("u").unwrap();
                prop_assert!(expected_available >= 0);
                prop_assert_eq!(balance.available as i128, expected_available);
                prop_assert_eq!(balance.held as i128, expected_held);
            }
        }
    }
}
