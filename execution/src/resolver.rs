//! Round and battle resolution.
//!
//! Everything here is a pure function of the participant list and the
//! BattlePull log, so a status poll or a replay recomputes exactly what
//! `start` settled. Ties always go to the lowest seat.

use packbattle_types::pack::{
    BattleMode, BattleOutcome, BattlePull, Participant, ParticipantTotal, Payout, Pull,
    RevealStep, RoundResult, Settlement, BASIS_POINTS,
};
use packbattle_types::EngineError;
use std::collections::BTreeMap;

/// Picks the winning participant of one round. `entries` pairs each
/// participant with the value it drew this round.
pub fn resolve_round(mode: BattleMode, round: u32, entries: &[(&Participant, u64)]) -> RoundResult {
    let pool: u64 = entries.iter().map(|(_, value)| value).sum();
    let best = match mode {
        BattleMode::HighestWins => pick(entries, |candidate, current| candidate > current),
        BattleMode::LowestWins => pick(entries, |candidate, current| candidate < current),
        BattleMode::Jackpot => None,
    };
    match best {
        Some((participant, value)) => RoundResult {
            round,
            winner_id: Some(participant.user_id.clone()),
            winner_participant_id: Some(participant.id),
            winning_value: value,
        },
        None => RoundResult {
            round,
            winner_id: None,
            winner_participant_id: None,
            winning_value: pool,
        },
    }
}

/// Strictly-better comparison keeps the first (lowest-seat) candidate on ties.
fn pick<'p>(
    entries: &[(&'p Participant, u64)],
    better: impl Fn(u64, u64) -> bool,
) -> Option<(&'p Participant, u64)> {
    let mut sorted: Vec<_> = entries.to_vec();
    sorted.sort_by_key(|(participant, _)| participant.seat);
    let mut best: Option<(&Participant, u64)> = None;
    for (participant, value) in sorted {
        match best {
            Some((_, current)) if !better(value, current) => {}
            _ => best = Some((participant, value)),
        }
    }
    best
}

/// Resolves every round and the overall winner from a complete pull log.
pub fn resolve_battle(
    mode: BattleMode,
    rounds: u32,
    participants: &[Participant],
    pulls: &[BattlePull],
) -> Result<BattleOutcome, EngineError> {
    let mut seated: Vec<&Participant> = participants.iter().collect();
    seated.sort_by_key(|participant| participant.seat);
    if seated.is_empty() {
        return Err(EngineError::InvalidBattle("battle has no participants".into()));
    }

    let mut round_results = Vec::with_capacity(rounds as usize);
    let mut totals: BTreeMap<u64, u64> = BTreeMap::new();
    for round in 1..=rounds {
        let mut entries = Vec::with_capacity(seated.len());
        for participant in &seated {
            let value = pulls
                .iter()
                .find(|pull| pull.round_number == round && pull.participant_id == participant.id)
                .map(|pull| pull.coin_value)
                .ok_or_else(|| {
                    EngineError::storage(format!(
                        "battle pull log missing round {round} for participant {}",
                        participant.id
                    ))
                })?;
            *totals.entry(participant.id).or_default() += value;
            entries.push((*participant, value));
        }
        round_results.push(resolve_round(mode, round, &entries));
    }

    let participant_totals: Vec<ParticipantTotal> = seated
        .iter()
        .map(|participant| ParticipantTotal {
            participant_id: participant.id,
            user_id: participant.user_id.clone(),
            seat: participant.seat,
            total: totals.get(&participant.id).copied().unwrap_or_default(),
        })
        .collect();

    let entries: Vec<(&Participant, u64)> = seated
        .iter()
        .zip(&participant_totals)
        .map(|(participant, total)| (*participant, total.total))
        .collect();
    let winner = match mode {
        BattleMode::LowestWins => pick(&entries, |candidate, current| candidate < current),
        BattleMode::HighestWins | BattleMode::Jackpot => {
            pick(&entries, |candidate, current| candidate > current)
        }
    };
    let (winner, _) = winner.ok_or_else(|| EngineError::storage("no battle winner"))?;

    Ok(BattleOutcome {
        rounds: round_results,
        totals: participant_totals,
        winner_participant_id: winner.id,
        winner_id: winner.user_id.clone(),
    })
}

/// Splits the pot. Bot seats never receive coins: their shares are
/// reported with `credited == false` and stay with the house.
pub fn settle(
    outcome: &BattleOutcome,
    participants: &[Participant],
    entry_fee: u64,
    share_rewards: bool,
    house_edge_bps: u16,
) -> Result<Settlement, EngineError> {
    let paying = participants.iter().filter(|participant| !participant.is_bot).count() as u64;
    let pot = entry_fee
        .checked_mul(paying)
        .ok_or(EngineError::BalanceOverflow)?;
    let house_cut =
        ((pot as u128 * house_edge_bps as u128 / BASIS_POINTS as u128) as u64).min(pot);
    let distributable = pot - house_cut;

    let mut seated: Vec<&Participant> = participants.iter().collect();
    seated.sort_by_key(|participant| participant.seat);

    let payouts: Vec<Payout> = if share_rewards {
        let share = distributable / seated.len() as u64;
        let remainder = distributable % seated.len() as u64;
        seated
            .iter()
            .map(|participant| {
                let bonus = if participant.id == outcome.winner_participant_id {
                    remainder
                } else {
                    0
                };
                Payout {
                    participant_id: participant.id,
                    user_id: participant.user_id.clone(),
                    amount: share + bonus,
                    credited: !participant.is_bot,
                }
            })
            .collect()
    } else {
        seated
            .iter()
            .filter(|participant| participant.id == outcome.winner_participant_id)
            .map(|participant| Payout {
                participant_id: participant.id,
                user_id: participant.user_id.clone(),
                amount: distributable,
                credited: !participant.is_bot,
            })
            .collect()
    };

    let uncredited: u64 = payouts
        .iter()
        .filter(|payout| !payout.credited)
        .map(|payout| payout.amount)
        .sum();
    Ok(Settlement {
        pot,
        house_cut,
        payouts,
        house_retained: house_cut + uncredited,
    })
}

/// Orders the log for reveal: round-major, seat order within a round.
/// The last reveal of each round carries that round's winner.
pub fn reveal_steps(
    outcome: &BattleOutcome,
    participants: &[Participant],
    battle_pulls: &[BattlePull],
    pulls: &BTreeMap<u64, Pull>,
) -> Result<Vec<RevealStep>, EngineError> {
    let by_id: BTreeMap<u64, &Participant> = participants
        .iter()
        .map(|participant| (participant.id, participant))
        .collect();
    let mut ordered: Vec<(&BattlePull, &Participant)> = battle_pulls
        .iter()
        .map(|battle_pull| {
            by_id
                .get(&battle_pull.participant_id)
                .map(|participant| (battle_pull, *participant))
                .ok_or_else(|| {
                    EngineError::storage(format!(
                        "battle pull {} references unknown participant",
                        battle_pull.id
                    ))
                })
        })
        .collect::<Result<_, _>>()?;
    ordered.sort_by_key(|(battle_pull, participant)| (battle_pull.round_number, participant.seat));

    let mut steps = Vec::with_capacity(ordered.len());
    for (idx, (battle_pull, participant)) in ordered.iter().enumerate() {
        let pull = pulls
            .get(&battle_pull.pull_id)
            .ok_or(EngineError::PullNotFound(battle_pull.pull_id))?;
        let last_in_round = ordered
            .get(idx + 1)
            .map_or(true, |(next, _)| next.round_number != battle_pull.round_number);
        let round_winner_id = if last_in_round {
            outcome
                .rounds
                .iter()
                .find(|round| round.round == battle_pull.round_number)
                .and_then(|round| round.winner_id.clone())
        } else {
            None
        };
        steps.push(RevealStep {
            step: idx as u32 + 1,
            round: battle_pull.round_number,
            participant_id: participant.id,
            user_id: participant.user_id.clone(),
            seat: participant.seat,
            pull_id: pull.id,
            card_id: pull.card_id.unwrap_or_default(),
            card_name: pull.card_name.clone(),
            rarity: pull.rarity,
            coin_value: battle_pull.coin_value,
            round_winner_id,
        });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn participant(id: u64, seat: u32, user: &str, is_bot: bool) -> Participant {
        Participant {
            id,
            battle_id: 1,
            user_id: user.to_string(),
            seat,
            is_ready: true,
            is_bot,
            joined_at: 0,
        }
    }

    fn log(values: &[(u64, u32, u64)]) -> Vec<BattlePull> {
        values
            .iter()
            .enumerate()
            .map(|(idx, &(participant_id, round_number, coin_value))| BattlePull {
                id: idx as u64 + 1,
                battle_id: 1,
                participant_id,
                round_number,
                pull_id: idx as u64 + 1,
                coin_value,
            })
            .collect()
    }

    #[test]
    fn test_highest_wins_two_by_two() {
        let participants = vec![participant(1, 0, "p1", false), participant(2, 1, "p2", false)];
        let pulls = log(&[(1, 1, 10), (2, 1, 5), (1, 2, 2), (2, 2, 6)]);
        let outcome = resolve_battle(BattleMode::HighestWins, 2, &participants, &pulls).unwrap();
        assert_eq!(outcome.rounds[0].winner_id.as_deref(), Some("p1"));
        assert_eq!(outcome.rounds[0].winning_value, 10);
        assert_eq!(outcome.rounds[1].winner_id.as_deref(), Some("p2"));
        assert_eq!(outcome.totals[0].total, 12);
        assert_eq!(outcome.totals[1].total, 11);
        assert_eq!(outcome.winner_id, "p1");
    }

    #[test]
    fn test_split_rounds_decided_by_aggregate() {
        let participants = vec![participant(1, 0, "p1", false), participant(2, 1, "p2", false)];
        let pulls = log(&[(1, 1, 3), (2, 1, 7), (1, 2, 9), (2, 2, 4)]);
        let outcome = resolve_battle(BattleMode::HighestWins, 2, &participants, &pulls).unwrap();
        assert_eq!(outcome.rounds[0].winner_id.as_deref(), Some("p2"));
        assert_eq!(outcome.rounds[0].winning_value, 7);
        assert_eq!(outcome.rounds[1].winner_id.as_deref(), Some("p1"));
        assert_eq!(outcome.rounds[1].winning_value, 9);
        assert_eq!(outcome.totals[0].total, 12);
        assert_eq!(outcome.totals[1].total, 11);
        assert_eq!(outcome.winner_id, "p1");
    }

    #[test]
    fn test_ties_go_to_lowest_seat() {
        // Listed out of seat order on purpose.
        let participants = vec![participant(7, 2, "late", false), participant(3, 0, "early", false)];
        let pulls = log(&[(7, 1, 9), (3, 1, 9)]);
        for mode in [BattleMode::HighestWins, BattleMode::LowestWins, BattleMode::Jackpot] {
            let outcome = resolve_battle(mode, 1, &participants, &pulls).unwrap();
            assert_eq!(outcome.winner_id, "early", "{mode:?}");
        }
    }

    #[test]
    fn test_lowest_wins_and_jackpot() {
        let participants = vec![participant(1, 0, "a", false), participant(2, 1, "b", false)];
        let pulls = log(&[(1, 1, 3), (2, 1, 8), (1, 2, 4), (2, 2, 1)]);

        let lowest = resolve_battle(BattleMode::LowestWins, 2, &participants, &pulls).unwrap();
        assert_eq!(lowest.rounds[0].winner_id.as_deref(), Some("a"));
        assert_eq!(lowest.rounds[1].winner_id.as_deref(), Some("b"));
        assert_eq!(lowest.winner_id, "a");

        let jackpot = resolve_battle(BattleMode::Jackpot, 2, &participants, &pulls).unwrap();
        assert!(jackpot.rounds.iter().all(|round| round.winner_id.is_none()));
        assert_eq!(jackpot.rounds[0].winning_value, 11);
        assert_eq!(jackpot.winner_id, "b");
    }

    #[test]
    fn test_missing_log_entry_is_internal() {
        let participants = vec![participant(1, 0, "a", false), participant(2, 1, "b", false)];
        let pulls = log(&[(1, 1, 3)]);
        let err = resolve_battle(BattleMode::HighestWins, 1, &participants, &pulls).unwrap_err();
        assert_eq!(err.code(), "Internal");
    }

    #[test]
    fn test_settle_winner_takes_all_minus_house() {
        let participants = vec![participant(1, 0, "a", false), participant(2, 1, "b", false)];
        let outcome = resolve_battle(
            BattleMode::HighestWins,
            1,
            &participants,
            &log(&[(1, 1, 1), (2, 1, 2)]),
        )
        .unwrap();
        let settlement = settle(&outcome, &participants, 50, false, 500).unwrap();
        assert_eq!(settlement.pot, 100);
        assert_eq!(settlement.house_cut, 5);
        assert_eq!(settlement.payouts.len(), 1);
        assert_eq!(settlement.payouts[0].user_id, "b");
        assert_eq!(settlement.payouts[0].amount, 95);
        assert_eq!(settlement.house_retained, 5);
    }

    #[test]
    fn test_settle_shared_with_bot() {
        let participants = vec![
            participant(1, 0, "a", false),
            participant(2, 1, "b", false),
            participant(3, 2, "bot-1-2", true),
        ];
        let outcome = resolve_battle(
            BattleMode::HighestWins,
            1,
            &participants,
            &log(&[(1, 1, 9), (2, 1, 2), (3, 1, 3)]),
        )
        .unwrap();
        let settlement = settle(&outcome, &participants, 50, true, 0).unwrap();
        assert_eq!(settlement.pot, 100);
        let amounts: Vec<_> = settlement.payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![34, 33, 33]);
        assert!(!settlement.payouts[2].credited);
        assert_eq!(settlement.credited_total(), 67);
        assert_eq!(settlement.house_retained, 33);
    }

    #[test]
    fn test_bot_winner_keeps_pot_with_house() {
        let participants = vec![participant(1, 0, "a", false), participant(2, 1, "bot-1-1", true)];
        let outcome = resolve_battle(
            BattleMode::HighestWins,
            1,
            &participants,
            &log(&[(1, 1, 1), (2, 1, 2)]),
        )
        .unwrap();
        let settlement = settle(&outcome, &participants, 40, false, 0).unwrap();
        assert_eq!(settlement.pot, 40);
        assert_eq!(settlement.credited_total(), 0);
        assert_eq!(settlement.house_retained, 40);
    }

    proptest! {
        #[test]
        fn settlement_conserves_pot(
            values in proptest::collection::vec(0u64..1_000, 2..8),
            bots in proptest::collection::vec(any::<bool>(), 8),
            fee in 0u64..10_000,
            share in any::<bool>(),
            edge in 0u16..=10_000,
        ) {
            let participants: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(idx, _)| participant(idx as u64 + 1, idx as u32, &format!("u{idx}"), bots[idx]))
                .collect();
            let entries: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(idx, value)| (idx as u64 + 1, 1, *value))
                .collect();
            let outcome =
                resolve_battle(BattleMode::HighestWins, 1, &participants, &log(&entries)).unwrap();
            let settlement = settle(&outcome, &participants, fee, share, edge).unwrap();
            prop_assert_eq!(
                settlement.credited_total() + settlement.house_retained,
                settlement.pot
            );
        }
    }
}
