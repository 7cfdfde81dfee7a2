//! # Property-Based Tests
//!
//! Invariants of the replay algorithm over random histories.

use chrono::{Duration, TimeZone, Utc};
use doubles_rating::{
    apply_game, expected_outcome, k_factor, ledger_digest, replay, Game, LedgerWriter,
    MemoryLedger, Team, User, UserId,
};
use proptest::collection::vec;
use proptest::prelude::*;

const PLAYERS: i64 = 8;

fn user(id: i64) -> User {
    User {
        id: UserId(id),
        handle: format!("p{}", id),
        first: "Prop".to_string(),
        last: id.to_string(),
    }
}

fn game(id: i64, players: &[i64], score: [u32; 2]) -> Game {
    Game {
        id,
        teams: [
            Team {
                front: user(players[0]),
                back: user(players[1]),
            },
            Team {
                front: user(players[2]),
                back: user(players[3]),
            },
        ],
        score,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(id),
    }
}

/// Every player id, in random order
fn arb_lineup() -> impl Strategy<Value = Vec<i64>> {
    Just((1..=PLAYERS).collect::<Vec<i64>>()).prop_shuffle()
}

/// Four distinct players out of `PLAYERS`, and a score line
fn arb_game() -> impl Strategy<Value = (Vec<i64>, [u32; 2])> {
    (arb_lineup(), 0u32..=10, 0u32..=10)
        .prop_map(|(players, a, b)| (players[..4].to_vec(), [a, b]))
}

fn history(raw: &[(Vec<i64>, [u32; 2])]) -> Vec<Game> {
    raw.iter()
        .enumerate()
        .map(|(i, (players, score))| game(i as i64 + 1, players, *score))
        .collect()
}

fn fresh_ledger() -> MemoryLedger {
    MemoryLedger::new((1..=PLAYERS).map(UserId))
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Same history, same ledger, bit for bit.
    #[test]
    fn replay_is_deterministic(raw in vec(arb_game(), 0..60)) {
        let games = history(&raw);

        let mut first = fresh_ledger();
        let mut second = fresh_ledger();
        replay(&mut first, games.iter().cloned().map(Ok)).unwrap();
        replay(&mut second, games.iter().cloned().map(Ok)).unwrap();

        prop_assert_eq!(first.entries(), second.entries());
        prop_assert_eq!(
            ledger_digest(first.entries().values()),
            ledger_digest(second.entries().values())
        );
    }

    /// Every game adds exactly one to each of its four players.
    #[test]
    fn games_played_adds_up(raw in vec(arb_game(), 0..60)) {
        let games = history(&raw);
        let mut ledger = fresh_ledger();
        let summary = replay(&mut ledger, games.iter().cloned().map(Ok)).unwrap();

        let total: u32 = ledger.entries().values().map(|e| e.games).sum();
        prop_assert_eq!(total as usize, 4 * summary.games);

        let wins: u32 = ledger.entries().values().map(|e| e.wins).sum();
        let losses: u32 = ledger.entries().values().map(|e| e.losses).sum();
        prop_assert_eq!(wins, losses);
    }

    /// K never grows with experience and settles at 25.
    #[test]
    fn k_factor_is_monotonic(games in 0u32..10_000) {
        prop_assert!(k_factor(games + 1) <= k_factor(games));
        prop_assert!(k_factor(games) <= 35.0);
        if games > 10 {
            prop_assert_eq!(k_factor(games), 25.0);
        }
    }

    /// Two fresh teams: whatever one side gains, the other side loses.
    #[test]
    fn fresh_game_is_symmetric((players, score) in arb_game()) {
        let mut ledger = fresh_ledger();
        ledger.reset_to_baseline().unwrap();

        let delta = apply_game(&mut ledger, &game(1, &players, score)).unwrap();
        prop_assert_eq!(delta.changes[0].1, delta.changes[1].1);
        prop_assert_eq!(delta.changes[2].1, delta.changes[3].1);
        prop_assert_eq!(delta.changes[0].1, -delta.changes[2].1);
    }

    /// Expectations of the two sides always sum to one.
    #[test]
    fn expectations_are_complementary(a in 0.0f64..2000.0, b in 0.0f64..2000.0) {
        let sum = expected_outcome(a, b) + expected_outcome(b, a);
        prop_assert!((sum - 1.0).abs() < 1e-9);
    }

    /// A draw between equally rated sides changes no rating.
    #[test]
    fn level_draw_is_neutral(players in arb_lineup(), goals in 0u32..=10) {
        let mut ledger = fresh_ledger();
        ledger.reset_to_baseline().unwrap();

        let delta = apply_game(&mut ledger, &game(1, &players[..4], [goals, goals])).unwrap();
        prop_assert_eq!(delta.raw_delta, 0.0);
        for (_, change) in delta.changes {
            prop_assert_eq!(change, 0.0);
        }
    }
}
