use serde::{Deserialize, Serialize};
use std::fmt;

use super::BOT_USER_PREFIX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleStatus {
    Waiting,
    InProgress,
    Finished,
    Cancelled,
}

impl BattleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattleStatus::Finished | BattleStatus::Cancelled)
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BattleStatus::Waiting => "WAITING",
            BattleStatus::InProgress => "IN_PROGRESS",
            BattleStatus::Finished => "FINISHED",
            BattleStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for BattleStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "waiting" => Ok(Self::Waiting),
            "in_progress" => Ok(Self::InProgress),
            "finished" => Ok(Self::Finished),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err("valid values: waiting, in_progress, finished, cancelled"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleMode {
    HighestWins,
    LowestWins,
    Jackpot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    pub id: u64,
    pub status: BattleStatus,
    pub mode: BattleMode,
    pub share_rewards: bool,
    pub rounds: u32,
    pub max_participants: u32,
    pub entry_fee: u64,
    pub box_id: u64,
    pub creator_id: String,
    pub winner_id: Option<String>,
    pub created_at: u64,
    pub ended_at: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: u64,
    pub battle_id: u64,
    pub user_id: String,
    /// Join order within the battle. Never reused, so it doubles as the tie-break key.
    pub seat: u32,
    pub is_ready: bool,
    pub is_bot: bool,
    pub joined_at: u64,
}

impl Participant {
    /// Bots never block the readiness gate.
    pub fn counts_as_ready(&self) -> bool {
        self.is_bot || self.is_ready
    }
}

pub fn bot_user_id(battle_id: u64, seat: u32) -> String {
    format!("{BOT_USER_PREFIX}{battle_id}-{seat}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlePull {
    pub id: u64,
    pub battle_id: u64,
    pub participant_id: u64,
    pub round_number: u32,
    pub pull_id: u64,
    pub coin_value: u64,
}

/// Outcome of a single round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round: u32,
    /// `None` in jackpot mode, where rounds only feed the pool.
    pub winner_id: Option<String>,
    pub winner_participant_id: Option<u64>,
    pub winning_value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantTotal {
    pub participant_id: u64,
    pub user_id: String,
    pub seat: u32,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleOutcome {
    pub rounds: Vec<RoundResult>,
    pub totals: Vec<ParticipantTotal>,
    pub winner_participant_id: u64,
    pub winner_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub participant_id: u64,
    pub user_id: String,
    pub amount: u64,
    /// False for bot seats: their share stays with the house.
    pub credited: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub pot: u64,
    pub house_cut: u64,
    pub payouts: Vec<Payout>,
    /// House cut plus every uncredited payout.
    pub house_retained: u64,
}

impl Settlement {
    pub fn credited_total(&self) -> u64 {
        self.payouts
            .iter()
            .filter(|payout| payout.credited)
            .map(|payout| payout.amount)
            .sum()
    }
}

/// One card reveal in the client-side replay script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealStep {
    pub step: u32,
    pub round: u32,
    pub participant_id: u64,
    pub user_id: String,
    pub seat: u32,
    pub pull_id: u64,
    pub card_id: u64,
    pub card_name: String,
    pub rarity: super::Rarity,
    pub coin_value: u64,
    /// Set on the last reveal of a round.
    pub round_winner_id: Option<String>,
}
