use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::{EngineError, COINS_PER_CENT, PULL_RATE_SCALE};

/// Probability weight of a card, in thousandths of a percent (`100_000 == 100%`).
///
/// JSON carries the value as a decimal percent (`33.333`). Keeping the integer
/// representation internally makes the rate-sum check exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PullRate(u32);

impl PullRate {
    pub const fn from_thousandths(value: u32) -> Self {
        Self(value)
    }

    /// Parses a decimal percent, rounding to the nearest thousandth.
    ///
    /// Returns `None` for negative, non-finite or unrepresentably large inputs.
    pub fn from_percent(percent: f64) -> Option<Self> {
        if !percent.is_finite() || percent < 0.0 {
            return None;
        }
        let scaled = (percent * PULL_RATE_SCALE as f64).round();
        if scaled > u32::MAX as f64 {
            return None;
        }
        Some(Self(scaled as u32))
    }

    pub const fn thousandths(self) -> u32 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / PULL_RATE_SCALE as f64
    }
}

impl fmt::Display for PullRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:03}%",
            self.0 / PULL_RATE_SCALE,
            self.0 % PULL_RATE_SCALE
        )
    }
}

impl Serialize for PullRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_percent())
    }
}

impl<'de> Deserialize<'de> for PullRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let percent = f64::deserialize(deserializer)?;
        PullRate::from_percent(percent).ok_or_else(|| {
            de::Error::custom(format!(
                "pull rate must be a finite non-negative percent (got {percent})"
            ))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Maps a provider's free-form rarity label onto the engine's tiers.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("secret") || label.contains("mythic") || label.contains("legend") {
            Rarity::Legendary
        } else if label.contains("ultra") || label.contains("epic") || label.contains("holo") {
            Rarity::Epic
        } else if label.contains("uncommon") {
            Rarity::Uncommon
        } else if label.contains("rare") {
            Rarity::Rare
        } else {
            Rarity::Common
        }
    }
}

/// A card slot inside a box: the unit the lottery draws.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxCard {
    pub id: u64,
    pub name: String,
    pub pull_rate: PullRate,
    pub coin_value: u64,
    pub rarity: Rarity,
}

/// A purchasable box of cards. Owned by the catalog; read-only to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardBox {
    pub id: u64,
    pub name: String,
    pub price: u64,
    pub cards_per_pack: u32,
    pub cards: Vec<BoxCard>,
}

/// Card payloads as delivered by the upstream card-data providers.
///
/// Each provider quotes identity, rarity and value differently; everything is
/// normalized into [`BoxCard`] before it reaches the draw engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderCard {
    Manual {
        id: u64,
        name: String,
        #[serde(rename = "pullRate")]
        pull_rate: PullRate,
        #[serde(rename = "coinValue")]
        coin_value: u64,
        rarity: Rarity,
    },
    PokemonTcg {
        id: u64,
        name: String,
        #[serde(rename = "pullRate")]
        pull_rate: PullRate,
        rarity: String,
        /// TCGplayer market price in cents.
        market_price_cents: u64,
    },
    Scryfall {
        id: u64,
        name: String,
        #[serde(rename = "pullRate")]
        pull_rate: PullRate,
        rarity: String,
        /// Decimal USD price string, e.g. `"12.34"`.
        usd: String,
    },
}

impl ProviderCard {
    pub fn normalize(self) -> Result<BoxCard, EngineError> {
        match self {
            ProviderCard::Manual {
                id,
                name,
                pull_rate,
                coin_value,
                rarity,
            } => Ok(BoxCard {
                id,
                name,
                pull_rate,
                coin_value,
                rarity,
            }),
            ProviderCard::PokemonTcg {
                id,
                name,
                pull_rate,
                rarity,
                market_price_cents,
            } => Ok(BoxCard {
                id,
                name,
                pull_rate,
                coin_value: market_price_cents.saturating_mul(COINS_PER_CENT),
                rarity: Rarity::from_label(&rarity),
            }),
            ProviderCard::Scryfall {
                id,
                name,
                pull_rate,
                rarity,
                usd,
            } => {
                let cents = parse_usd_cents(&usd).ok_or_else(|| EngineError::InvalidCard {
                    card_id: id,
                    reason: format!("unparseable usd price {usd:?}"),
                })?;
                Ok(BoxCard {
                    id,
                    name,
                    pull_rate,
                    coin_value: cents.saturating_mul(COINS_PER_CENT),
                    rarity: Rarity::from_label(&rarity),
                })
            }
        }
    }
}

fn parse_usd_cents(value: &str) -> Option<u64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let frac: u64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

/// A box as published by the catalog, before provider normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogBox {
    pub id: u64,
    pub name: String,
    pub price: u64,
    #[serde(default = "default_cards_per_pack")]
    pub cards_per_pack: u32,
    pub cards: Vec<ProviderCard>,
}

fn default_cards_per_pack() -> u32 {
    1
}

impl CatalogBox {
    pub fn normalize(self) -> Result<CardBox, EngineError> {
        let cards = self
            .cards
            .into_iter()
            .map(ProviderCard::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CardBox {
            id: self.id,
            name: self.name,
            price: self.price,
            cards_per_pack: self.cards_per_pack,
            cards,
        })
    }
}
