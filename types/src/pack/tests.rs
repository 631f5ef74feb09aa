use super::*;

#[test]
fn test_status_wire_names() {
    for (status, wire) in [
        (BattleStatus::Waiting, "\"WAITING\""),
        (BattleStatus::InProgress, "\"IN_PROGRESS\""),
        (BattleStatus::Finished, "\"FINISHED\""),
        (BattleStatus::Cancelled, "\"CANCELLED\""),
    ] {
        assert_eq!(serde_json::to_string(&status).unwrap(), wire);
        assert_eq!(wire.trim_matches('"'), status.to_string());
    }
}

#[test]
fn test_status_from_query() {
    assert_eq!("waiting".parse::<BattleStatus>(), Ok(BattleStatus::Waiting));
    assert_eq!(
        "IN_PROGRESS".parse::<BattleStatus>(),
        Ok(BattleStatus::InProgress)
    );
    assert!("open".parse::<BattleStatus>().is_err());
}

#[test]
fn test_mode_wire_names() {
    let mode: BattleMode = serde_json::from_str("\"LOWEST_WINS\"").unwrap();
    assert_eq!(mode, BattleMode::LowestWins);
    assert_eq!(
        serde_json::to_string(&BattleMode::Jackpot).unwrap(),
        "\"JACKPOT\""
    );
}

#[test]
fn test_reason_codes() {
    assert_eq!(
        serde_json::to_string(&Reason::EntryFee).unwrap(),
        "\"entry-fee\""
    );
    assert_eq!(Reason::Sale.to_string(), "sale");
}

#[test]
fn test_bots_count_as_ready() {
    let mut participant = Participant {
        id: 1,
        battle_id: 1,
        user_id: bot_user_id(1, 2),
        seat: 2,
        is_ready: false,
        is_bot: true,
        joined_at: 0,
    };
    assert!(participant.counts_as_ready());
    assert_eq!(participant.user_id, "bot-1-2");
    participant.is_bot = false;
    assert!(!participant.counts_as_ready());
}

#[test]
fn test_settlement_credited_total() {
    let settlement = Settlement {
        pot: 100,
        house_cut: 0,
        payouts: vec![
            Payout {
                participant_id: 1,
                user_id: "alice".into(),
                amount: 50,
                credited: true,
            },
            Payout {
                participant_id: 2,
                user_id: "bot-1-1".into(),
                amount: 50,
                credited: false,
            },
        ],
        house_retained: 50,
    };
    assert_eq!(settlement.credited_total(), 50);
}

#[test]
fn test_pull_snapshot_copies_card() {
    let card = BoxCard {
        id: 3,
        name: "Holo".into(),
        pull_rate: PullRate::from_thousandths(100_000),
        coin_value: 42,
        rarity: Rarity::Epic,
    };
    let pull = Pull::snapshot(9, "alice", 1, &card, None, 1_000);
    assert_eq!(pull.card_id, Some(3));
    assert_eq!(pull.card_value, 42);
    assert_eq!(pull.rarity, Rarity::Epic);
}
