//! Pull-rate validation.
//!
//! A [`PullRateTable`] can only be built from a card list that passes
//! [`validate`], so holding one is proof the odds were checked. Box contents
//! are edited by an uncoordinated admin path, so callers rebuild the table
//! from the current catalog snapshot on every open and every battle start.

use packbattle_types::pack::{
    BoxCard, CardBox, MAX_CARDS_PER_PACK, MIN_PULL_RATE, PULL_RATE_TOLERANCE, PULL_RATE_TOTAL,
};
use packbattle_types::EngineError;

/// Checks every card's rate range, then the table sum.
pub fn validate(cards: &[BoxCard]) -> Result<(), EngineError> {
    let mut sum: u64 = 0;
    for card in cards {
        let rate = card.pull_rate.thousandths();
        if !(MIN_PULL_RATE..=PULL_RATE_TOTAL).contains(&rate) {
            return Err(EngineError::RateOutOfRange {
                card_id: card.id,
                rate_thousandths: rate,
            });
        }
        sum += rate as u64;
    }
    if sum.abs_diff(PULL_RATE_TOTAL as u64) > PULL_RATE_TOLERANCE as u64 {
        return Err(EngineError::RateSumInvalid {
            sum_thousandths: sum,
        });
    }
    Ok(())
}

/// A validated, draw-ready card table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRateTable {
    box_id: u64,
    cards: Vec<BoxCard>,
    /// Running sum of rates in insertion order; strictly increasing.
    cumulative: Vec<u32>,
}

impl PullRateTable {
    pub fn new(box_id: u64, cards: Vec<BoxCard>) -> Result<Self, EngineError> {
        if cards.is_empty() {
            return Err(EngineError::EmptyTable { box_id });
        }
        validate(&cards)?;
        let cumulative = cards
            .iter()
            .scan(0u32, |acc, card| {
                *acc += card.pull_rate.thousandths();
                Some(*acc)
            })
            .collect();
        Ok(Self {
            box_id,
            cards,
            cumulative,
        })
    }

    /// Validates the whole box, pack size included, not just its odds.
    pub fn from_box(card_box: &CardBox) -> Result<Self, EngineError> {
        if !(1..=MAX_CARDS_PER_PACK).contains(&card_box.cards_per_pack) {
            return Err(EngineError::InvalidQuantity {
                quantity: card_box.cards_per_pack,
                max: MAX_CARDS_PER_PACK,
            });
        }
        Self::new(card_box.id, card_box.cards.clone())
    }

    pub fn box_id(&self) -> u64 {
        self.box_id
    }

    pub fn cards(&self) -> &[BoxCard] {
        &self.cards
    }

    pub fn cumulative(&self) -> &[u32] {
        &self.cumulative
    }

    /// Final cumulative boundary. Within tolerance of 100% but not always exact.
    pub fn total(&self) -> u32 {
        self.cumulative.last().copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbattle_types::pack::{PullRate, Rarity};

    fn card(id: u64, thousandths: u32) -> BoxCard {
        BoxCard {
            id,
            name: format!("card-{id}"),
            pull_rate: PullRate::from_thousandths(thousandths),
            coin_value: id,
            rarity: Rarity::Common,
        }
    }

    #[test]
    fn test_accepts_exact_table() {
        let table = PullRateTable::new(1, vec![card(1, 60_000), card(2, 40_000)]).unwrap();
        assert_eq!(table.cumulative(), &[60_000, 100_000]);
        assert_eq!(table.total(), 100_000);
    }

    #[test]
    fn test_accepts_within_tolerance() {
        // 33.333 * 3 = 99.999
        let table =
            PullRateTable::new(1, vec![card(1, 33_333), card(2, 33_333), card(3, 33_333)])
                .unwrap();
        assert_eq!(table.total(), 99_999);
        validate(&[card(1, 50_001), card(2, 50_000)]).unwrap();
    }

    #[test]
    fn test_rejects_bad_sum() {
        assert_eq!(
            validate(&[card(1, 60_000), card(2, 39_998)]),
            Err(EngineError::RateSumInvalid {
                sum_thousandths: 99_998
            })
        );
        assert_eq!(
            validate(&[card(1, 60_000), card(2, 40_002)]),
            Err(EngineError::RateSumInvalid {
                sum_thousandths: 100_002
            })
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(
            validate(&[card(1, 0), card(2, 100_000)]),
            Err(EngineError::RateOutOfRange {
                card_id: 1,
                rate_thousandths: 0
            })
        );
        assert!(matches!(
            validate(&[card(7, 100_001)]),
            Err(EngineError::RateOutOfRange { card_id: 7, .. })
        ));
    }

    #[test]
    fn test_rejects_pack_size_out_of_range() {
        let mut card_box = CardBox {
            id: 4,
            name: "box".into(),
            price: 10,
            cards_per_pack: 0,
            cards: vec![card(1, 100_000)],
        };
        assert_eq!(
            PullRateTable::from_box(&card_box),
            Err(EngineError::InvalidQuantity {
                quantity: 0,
                max: MAX_CARDS_PER_PACK
            })
        );
        card_box.cards_per_pack = u32::MAX;
        assert!(matches!(
            PullRateTable::from_box(&card_box),
            Err(EngineError::InvalidQuantity { .. })
        ));
        card_box.cards_per_pack = MAX_CARDS_PER_PACK;
        PullRateTable::from_box(&card_box).unwrap();
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            PullRateTable::new(9, vec![]),
            Err(EngineError::EmptyTable { box_id: 9 })
        );
    }
}
