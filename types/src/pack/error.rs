use serde::Serialize;
use thiserror::Error as ThisError;

use super::{BattleStatus, PULL_RATE_SCALE};

/// Error families. Every [`EngineError`] belongs to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Economic,
    State,
    Authorization,
    NotFound,
    Internal,
}

#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum EngineError {
    // Validation
    #[error("pull rates sum to {}.{:03}%, expected 100%", .sum_thousandths / PULL_RATE_SCALE as u64, .sum_thousandths % PULL_RATE_SCALE as u64)]
    RateSumInvalid { sum_thousandths: u64 },
    #[error("card {card_id} has pull rate {rate_thousandths} thousandths, outside [0.001%, 100%]")]
    RateOutOfRange { card_id: u64, rate_thousandths: u32 },
    #[error("box {box_id} has no cards")]
    EmptyTable { box_id: u64 },
    #[error("card {card_id} is invalid: {reason}")]
    InvalidCard { card_id: u64, reason: String },
    #[error("invalid quantity {quantity} (max {max})")]
    InvalidQuantity { quantity: u32, max: u32 },
    #[error("invalid amount {0}")]
    InvalidAmount(u64),
    #[error("invalid battle settings: {0}")]
    InvalidBattle(String),
    #[error("user id {0:?} is reserved for bots")]
    ReservedUserId(String),

    // Economic
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("idempotency key {key:?} was already used for a different operation")]
    IdempotencyConflict { key: String },
    #[error("balance overflow")]
    BalanceOverflow,
    #[error("reservation {token} is already {status}")]
    ReservationClosed { token: u64, status: &'static str },

    // State
    #[error("battle {battle_id} is {status}, expected WAITING")]
    BattleNotWaiting { battle_id: u64, status: BattleStatus },
    #[error("battle {battle_id} is full")]
    BattleFull { battle_id: u64 },
    #[error("user already joined battle {battle_id}")]
    AlreadyJoined { battle_id: u64 },
    #[error("user is not a participant of battle {battle_id}")]
    NotParticipant { battle_id: u64 },
    #[error("battle {battle_id} has {joined}/{max} participants")]
    NotFull { battle_id: u64, joined: u32, max: u32 },
    #[error("battle {battle_id} has {waiting} participant(s) not ready")]
    NotReady { battle_id: u64, waiting: u32 },
    #[error("requested {requested} bot(s) but only {spots_left} spot(s) left")]
    ExceedsCapacity { requested: u32, spots_left: u32 },
    #[error("the creator cannot leave battle {battle_id}; cancel it instead")]
    CreatorCannotLeave { battle_id: u64 },
    #[error("pull {pull_id} is already listed")]
    AlreadyListed { pull_id: u64 },

    // Authorization
    #[error("admin privileges required")]
    NotAdmin,
    #[error("only the creator or an admin may do this")]
    NotAuthorized,

    // Not found
    #[error("box {0} not found")]
    BoxNotFound(u64),
    #[error("battle {0} not found")]
    BattleNotFound(u64),
    #[error("pull {0} not found")]
    PullNotFound(u64),
    #[error("reservation {0} not found")]
    ReservationNotFound(u64),

    // Internal
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            RateSumInvalid { .. }
            | RateOutOfRange { .. }
            | EmptyTable { .. }
            | InvalidCard { .. }
            | InvalidQuantity { .. }
            | InvalidAmount(_)
            | InvalidBattle(_)
            | ReservedUserId(_) => ErrorKind::Validation,
            InsufficientFunds { .. }
            | IdempotencyConflict { .. }
            | BalanceOverflow
            | ReservationClosed { .. } => ErrorKind::Economic,
            BattleNotWaiting { .. }
            | BattleFull { .. }
            | AlreadyJoined { .. }
            | NotParticipant { .. }
            | NotFull { .. }
            | NotReady { .. }
            | ExceedsCapacity { .. }
            | CreatorCannotLeave { .. }
            | AlreadyListed { .. } => ErrorKind::State,
            NotAdmin | NotAuthorized => ErrorKind::Authorization,
            BoxNotFound(_) | BattleNotFound(_) | PullNotFound(_) | ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        use EngineError::*;
        match self {
            RateSumInvalid { .. } => "RateSumInvalid",
            RateOutOfRange { .. } => "RateOutOfRange",
            EmptyTable { .. } => "EmptyTable",
            InvalidCard { .. } => "InvalidCard",
            InvalidQuantity { .. } => "InvalidQuantity",
            InvalidAmount(_) => "InvalidAmount",
            InvalidBattle(_) => "InvalidBattle",
            ReservedUserId(_) => "ReservedUserId",
            InsufficientFunds { .. } => "InsufficientFunds",
            IdempotencyConflict { .. } => "IdempotencyConflict",
            BalanceOverflow => "BalanceOverflow",
            ReservationClosed { .. } => "ReservationClosed",
            BattleNotWaiting { .. } => "BattleNotWaiting",
            BattleFull { .. } => "BattleFull",
            AlreadyJoined { .. } => "AlreadyJoined",
            NotParticipant { .. } => "NotParticipant",
            NotFull { .. } => "NotFull",
            NotReady { .. } => "NotReady",
            ExceedsCapacity { .. } => "ExceedsCapacity",
            CreatorCannotLeave { .. } => "CreatorCannotLeave",
            AlreadyListed { .. } => "AlreadyListed",
            NotAdmin => "NotAdmin",
            NotAuthorized => "NotAuthorized",
            BoxNotFound(_) => "BoxNotFound",
            BattleNotFound(_) => "BattleNotFound",
            PullNotFound(_) => "PullNotFound",
            ReservationNotFound(_) => "ReservationNotFound",
            Storage(_) => "Internal",
        }
    }

    /// Battle the error refers to, when a client should resync its state.
    pub fn battle_id(&self) -> Option<u64> {
        use EngineError::*;
        match self {
            BattleNotWaiting { battle_id, .. }
            | BattleFull { battle_id }
            | AlreadyJoined { battle_id }
            | NotParticipant { battle_id }
            | NotFull { battle_id, .. }
            | NotReady { battle_id, .. }
            | CreatorCannotLeave { battle_id } => Some(*battle_id),
            _ => None,
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        EngineError::Storage(err.to_string())
    }
}
