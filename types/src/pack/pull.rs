use serde::{Deserialize, Serialize};

use super::{BoxCard, Rarity};

/// One drawn card. The card fields are a snapshot taken at draw time, so later
/// catalog edits never rewrite history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pull {
    pub id: u64,
    pub user_id: String,
    pub box_id: u64,
    pub card_id: Option<u64>,
    pub card_name: String,
    pub card_value: u64,
    pub rarity: Rarity,
    /// Set when the pull belongs to a battle log; such pulls cannot be sold.
    pub battle_id: Option<u64>,
    pub timestamp: u64,
}

impl Pull {
    pub fn snapshot(
        id: u64,
        user_id: &str,
        box_id: u64,
        card: &BoxCard,
        battle_id: Option<u64>,
        timestamp: u64,
    ) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            box_id,
            card_id: Some(card.id),
            card_name: card.name.clone(),
            card_value: card.coin_value,
            rarity: card.rarity,
            battle_id,
            timestamp,
        }
    }
}
