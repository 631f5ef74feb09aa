use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a balance moved. Recorded on every ledger receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    Purchase,
    EntryFee,
    Prize,
    Refund,
    Sale,
    Grant,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Reason::Purchase => "purchase",
            Reason::EntryFee => "entry-fee",
            Reason::Prize => "prize",
            Reason::Refund => "refund",
            Reason::Sale => "sale",
            Reason::Grant => "grant",
        };
        f.write_str(label)
    }
}

/// Coins owned by a user. `held` coins are reserved and not spendable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub available: u64,
    pub held: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Committed,
    Released,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub token: ReservationToken,
    pub user_id: String,
    pub amount: u64,
    pub reason: Reason,
    pub status: ReservationStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    Debit,
    Credit,
    Reserve,
}

/// Stored result of an applied mutation, keyed by its idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub user_id: String,
    pub op: LedgerOp,
    pub amount: u64,
    pub reason: Reason,
    pub balance_after: u64,
    pub reservation: Option<ReservationToken>,
}
