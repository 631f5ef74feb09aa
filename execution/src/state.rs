use anyhow::{anyhow, Result};
use packbattle_types::api::PulledCard;
use packbattle_types::pack::{CoinBalance, LedgerReceipt, Pull, Reservation};
use packbattle_types::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::BattleRecord;

/// Storage keys. Their JSON encoding is the primary key of the SQLite backend.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Counters,
    Account(String),
    Receipt(String),
    Reservation(u64),
    Pull(u64),
    Inventory(String),
    Sale(u64),
    OpenReceipt(String),
    Battle(u64),
    BattleIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Counters(Counters),
    Account(CoinBalance),
    Receipt(LedgerReceipt),
    Reservation(Reservation),
    Pull(Pull),
    Inventory(Vec<u64>),
    Sale(SaleReceipt),
    OpenReceipt(OpenReceipt),
    Battle(BattleRecord),
    BattleIndex(Vec<u64>),
}

/// Monotonic id allocators. Every id starts at 1.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub pull: u64,
    pub battle: u64,
    pub participant: u64,
    pub battle_pull: u64,
    pub reservation: u64,
}

#[derive(Clone, Copy, Debug)]
pub enum Counter {
    Pull,
    Battle,
    Participant,
    BattlePull,
    Reservation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub user_id: String,
    pub coins_received: u64,
    pub new_balance: u64,
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReceipt {
    pub user_id: String,
    pub box_id: u64,
    pub quantity: u32,
    pub pulls: Vec<PulledCard>,
    pub remaining_coins: u64,
}

pub trait State {
    fn get(&self, key: &Key) -> Result<Option<Value>>;
    fn insert(&mut self, key: Key, value: Value) -> Result<()>;
    fn delete(&mut self, key: &Key) -> Result<()>;

    fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        for (key, status) in changes {
            match status {
                Status::Update(value) => self.insert(key, value)?,
                Status::Delete => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    Delete,
}

#[derive(Default)]
pub struct Memory {
    state: BTreeMap<Key, Value>,
}

impl State for Memory {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state.get(key).cloned())
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.state.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.state.remove(key);
        Ok(())
    }
}

/// Write overlay for one unit of work.
///
/// Reads fall through to the underlying state; writes stay pending until
/// [`Pending::commit`] hands them back as a single change set. Dropping the
/// overlay discards every write.
pub struct Pending<'a, S: State + ?Sized> {
    state: &'a S,
    pending: BTreeMap<Key, Status>,
}

impl<'a, S: State + ?Sized> Pending<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),
        }
    }

    pub fn commit(self) -> Vec<(Key, Status)> {
        self.pending.into_iter().collect()
    }
}

impl<'a, S: State + ?Sized> State for Pending<'a, S> {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(match self.pending.get(key) {
            Some(Status::Update(value)) => Some(value.clone()),
            Some(Status::Delete) => None,
            None => self.state.get(key)?,
        })
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.pending.insert(key, Status::Update(value));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.pending.insert(key.clone(), Status::Delete);
        Ok(())
    }
}

/// Maps infrastructure failures into the engine's error type.
pub trait StorageResultExt<T> {
    fn storage(self) -> Result<T, EngineError>;
}

impl<T> StorageResultExt<T> for Result<T> {
    fn storage(self) -> Result<T, EngineError> {
        self.map_err(|err| EngineError::storage(format!("{err:#}")))
    }
}

fn unexpected(key: &Key, value: &Value) -> anyhow::Error {
    anyhow!("unexpected value under {key:?}: {value:?}")
}

macro_rules! typed_accessors {
    ($load:ident, $store:ident, $variant:ident, $ty:ty) => {
        pub(crate) fn $load<S: State + ?Sized>(
            state: &S,
            key: &Key,
        ) -> Result<Option<$ty>, EngineError> {
            match state.get(key).storage()? {
                Some(Value::$variant(value)) => Ok(Some(value)),
                Some(other) => Err(EngineError::storage(unexpected(key, &other))),
                None => Ok(None),
            }
        }

        pub(crate) fn $store<S: State + ?Sized>(
            state: &mut S,
            key: Key,
            value: $ty,
        ) -> Result<(), EngineError> {
            state.insert(key, Value::$variant(value)).storage()
        }
    };
}

typed_accessors!(load_account, store_account, Account, CoinBalance);
typed_accessors!(load_receipt, store_receipt, Receipt, LedgerReceipt);
typed_accessors!(load_reservation, store_reservation, Reservation, Reservation);
typed_accessors!(load_pull, store_pull, Pull, Pull);
typed_accessors!(load_inventory, store_inventory, Inventory, Vec<u64>);
typed_accessors!(load_sale, store_sale, Sale, SaleReceipt);
typed_accessors!(load_open_receipt, store_open_receipt, OpenReceipt, OpenReceipt);
typed_accessors!(load_battle, store_battle, Battle, BattleRecord);
typed_accessors!(load_battle_index, store_battle_index, BattleIndex, Vec<u64>);
typed_accessors!(load_counters, store_counters, Counters, Counters);

pub(crate) fn next_id<S: State + ?Sized>(state: &mut S, counter: Counter) -> Result<u64, EngineError> {
    let mut counters = load_counters(state, &Key::Counters)?.unwrap_or_default();
    let slot = match counter {
        Counter::Pull => &mut counters.pull,
        Counter::Battle => &mut counters.battle,
        Counter::Participant => &mut counters.participant,
        Counter::BattlePull => &mut counters.battle_pull,
        Counter::Reservation => &mut counters.reservation,
    };
    *slot += 1;
    let id = *slot;
    store_counters(state, Key::Counters, counters)?;
    Ok(id)
}

pub(crate) fn push_inventory<S: State + ?Sized>(
    state: &mut S,
    user_id: &str,
    pull_id: u64,
) -> Result<(), EngineError> {
    let key = Key::Inventory(user_id.to_string());
    let mut inventory = load_inventory(state, &key)?.unwrap_or_default();
    inventory.push(pull_id);
    store_inventory(state, key, inventory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_reads_through_and_discards_on_drop() {
        let mut memory = Memory::default();
        memory
            .insert(Key::Account("alice".into()), Value::Account(CoinBalance { available: 5, held: 0 }))
            .unwrap();

        {
            let mut pending = Pending::new(&memory);
            store_account(
                &mut pending,
                Key::Account("alice".into()),
                CoinBalance { available: 1, held: 4 },
            )
            .unwrap();
            assert_eq!(
                load_account(&pending, &Key::Account("alice".into())).unwrap(),
                Some(CoinBalance { available: 1, held: 4 })
            );
        }

        assert_eq!(
            load_account(&memory, &Key::Account("alice".into())).unwrap(),
            Some(CoinBalance { available: 5, held: 0 })
        );
    }

    #[test]
    fn test_pending_commit_applies_deletes() {
        let mut memory = Memory::default();
        memory
            .insert(Key::Inventory("bob".into()), Value::Inventory(vec![1, 2]))
            .unwrap();
        let mut pending = Pending::new(&memory);
        pending.delete(&Key::Inventory("bob".into())).unwrap();
        assert!(pending.get(&Key::Inventory("bob".into())).unwrap().is_none());
        let changes = pending.commit();
        memory.apply(changes).unwrap();
        assert!(memory.get(&Key::Inventory("bob".into())).unwrap().is_none());
    }

    #[test]
    fn test_counters_are_independent() {
        let mut memory = Memory::default();
        assert_eq!(next_id(&mut memory, Counter::Pull).unwrap(), 1);
        assert_eq!(next_id(&mut memory, Counter::Pull).unwrap(), 2);
        assert_eq!(next_id(&mut memory, Counter::Battle).unwrap(), 1);
    }

    #[test]
    fn test_type_mismatch_is_storage_error() {
        let mut memory = Memory::default();
        memory
            .insert(Key::Account("carol".into()), Value::Inventory(vec![]))
            .unwrap();
        let err = load_account(&memory, &Key::Account("carol".into())).unwrap_err();
        assert_eq!(err.code(), "Internal");
    }
}
