//! Weighted card draws.
//!
//! A draw rolls `r` uniformly in `[0, 100%)` (thousandths of a percent) and
//! returns the first card whose cumulative weight exceeds `r`. Card order is
//! the table's insertion order, so a seeded source reproduces a draw sequence.

use packbattle_types::pack::{BoxCard, PULL_RATE_TOTAL};
use rand::{rngs::StdRng, Rng};

use crate::pull_rate::PullRateTable;

/// Source of uniform rolls.
pub trait RandomSource {
    /// Uniform value in `[0, bound)`.
    fn roll(&mut self, bound: u32) -> u32;
}

impl RandomSource for StdRng {
    fn roll(&mut self, bound: u32) -> u32 {
        self.gen_range(0..bound)
    }
}

impl<R: RandomSource + ?Sized> RandomSource for &mut R {
    fn roll(&mut self, bound: u32) -> u32 {
        (**self).roll(bound)
    }
}

/// Replays a fixed sequence of rolls, cycling when exhausted.
#[derive(Clone, Debug)]
pub struct FixedRolls {
    rolls: Vec<u32>,
    next: usize,
}

impl FixedRolls {
    pub fn new(rolls: Vec<u32>) -> Self {
        assert!(!rolls.is_empty(), "at least one roll is required");
        Self { rolls, next: 0 }
    }

    /// Rolls expressed as percents, e.g. `55.0`.
    pub fn percents(percents: &[f64]) -> Self {
        Self::new(
            percents
                .iter()
                .map(|percent| (percent * 1_000.0).round() as u32)
                .collect(),
        )
    }
}

impl RandomSource for FixedRolls {
    fn roll(&mut self, bound: u32) -> u32 {
        let value = self.rolls[self.next % self.rolls.len()];
        self.next += 1;
        value.min(bound.saturating_sub(1))
    }
}

/// Draws one card. Never fails: if rounding leaves the final cumulative
/// boundary short of 100%, rolls past it land on the last card.
pub fn draw<'t, R: RandomSource + ?Sized>(table: &'t PullRateTable, rng: &mut R) -> &'t BoxCard {
    let r = rng.roll(PULL_RATE_TOTAL);
    card_at(table, r)
}

pub(crate) fn card_at(table: &PullRateTable, r: u32) -> &BoxCard {
    let cards = table.cards();
    let idx = table.cumulative().partition_point(|&boundary| boundary <= r);
    &cards[idx.min(cards.len() - 1)]
}
