// Rating Recompute Algorithm - fold the ordered game history into a ledger
//
// Per game:
//   team strength   = mean rating of the two members
//   expected (A)    = 1 / (10^((B - A) / 400) + 1)
//   raw delta       = goal_factor(|sA - sB|) * (actual - expected)
//   player change   = ±k_factor(player games so far) * raw delta
//
// The K-factor depends on how many games a player has had *in this replay*,
// so games must be folded strictly in chronological order.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::ledger::{LedgerUpdate, LedgerWriter, Outcome};
use crate::model::{Game, UserId};

/// K-factor once a player has more than `K_SETTLE_GAMES` games
pub const K_FLOOR: f64 = 25.0;
/// Extra weight a player with zero games gets on top of `K_FLOOR`
pub const K_NEWCOMER_BONUS: f64 = 10.0;
pub const K_SETTLE_GAMES: u32 = 10;

// ============================================================================
// FORMULA
// ============================================================================

pub fn team_strength(front: f64, back: f64) -> f64 {
    (front + back) * 0.5
}

/// Logistic expectation that the team rated `team` beats the one rated `opponent`
pub fn expected_outcome(team: f64, opponent: f64) -> f64 {
    1.0 / (10f64.powf((opponent - team) / 400.0) + 1.0)
}

/// Result from team 0's point of view: 1 win, 0 loss, 0.5 draw
pub fn actual_outcome(score: [u32; 2]) -> f64 {
    if score[0] > score[1] {
        1.0
    } else if score[0] < score[1] {
        0.0
    } else {
        0.5
    }
}

/// Multiplier for the margin of victory
pub fn goal_factor(score_difference: u32) -> f64 {
    match score_difference {
        0..=2 => 1.0,
        3 => 1.33,
        4 => 1.66,
        _ => 2.0,
    }
}

/// Confidence weight for a player with `games` games behind them.
///
/// Linear from 35.0 at zero games down to 25.0 at ten, flat afterwards.
pub fn k_factor(games: u32) -> f64 {
    if games > K_SETTLE_GAMES {
        return K_FLOOR;
    }
    (1.0 - games as f64 / K_SETTLE_GAMES as f64) * K_NEWCOMER_BONUS + K_FLOOR
}

fn team_outcomes(score: [u32; 2]) -> [Outcome; 2] {
    if score[0] > score[1] {
        [Outcome::Win, Outcome::Loss]
    } else if score[0] < score[1] {
        [Outcome::Loss, Outcome::Win]
    } else {
        [Outcome::Draw, Outcome::Draw]
    }
}

// ============================================================================
// SINGLE GAME
// ============================================================================

/// What one game did to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct GameDelta {
    pub game: i64,
    pub expected: f64,
    /// goal factor * (actual - expected), before any K-factor
    pub raw_delta: f64,
    /// Signed rating change per participant, team 0 first
    pub changes: [(UserId, f64); 4],
}

/// Apply one game to the in-progress ledger.
///
/// All four entries are read before anything is written, so each player's
/// K-factor reflects their games before this one.
pub fn apply_game<L: LedgerWriter + ?Sized>(ledger: &mut L, game: &Game) -> Result<GameDelta> {
    if !game.has_distinct_participants() {
        return Err(EngineError::DataIntegrity(format!(
            "game {} does not have four distinct players",
            game.id
        )));
    }

    let participants = game.participants();
    let mut entries = Vec::with_capacity(participants.len());
    for user in participants {
        entries.push(ledger.entry(user)?);
    }

    let team_a = team_strength(entries[0].rating, entries[1].rating);
    let team_b = team_strength(entries[2].rating, entries[3].rating);
    let expected = expected_outcome(team_a, team_b);
    let raw_delta = goal_factor(game.score_difference()) * (actual_outcome(game.score) - expected);
    let outcomes = team_outcomes(game.score);

    let mut changes = [(UserId(0), 0.0); 4];
    for (slot, entry) in entries.iter().enumerate() {
        let team = slot / 2;
        let sign = if team == 0 { 1.0 } else { -1.0 };
        let change = sign * k_factor(entry.games) * raw_delta;

        ledger.apply(
            entry.user,
            &LedgerUpdate {
                rating_delta: change,
                increment_games: true,
                outcome: outcomes[team],
            },
        )?;
        changes[slot] = (entry.user, change);
    }

    Ok(GameDelta {
        game: game.id,
        expected,
        raw_delta,
        changes,
    })
}

// ============================================================================
// REPLAY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub users: usize,
    pub games: usize,
    pub elapsed: Duration,
}

/// Reset `ledger` to baseline and fold every game into it.
///
/// Stops at the first error, whether it comes from the stream, the ledger or
/// the history itself (repeated player, out-of-order timestamps). The caller
/// owns the transaction and decides what to do with a partial ledger.
pub fn replay<L, I>(ledger: &mut L, games: I) -> Result<ReplaySummary>
where
    L: LedgerWriter + ?Sized,
    I: IntoIterator<Item = Result<Game>>,
{
    let started = Instant::now();
    let users = ledger.reset_to_baseline()?;

    let mut count = 0;
    let mut last_seen: Option<DateTime<Utc>> = None;
    for game in games {
        let game = game?;

        if let Some(previous) = last_seen {
            if game.created_at < previous {
                return Err(EngineError::DataIntegrity(format!(
                    "game {} is older than the game before it",
                    game.id
                )));
            }
        }
        last_seen = Some(game.created_at);

        let delta = apply_game(ledger, &game)?;
        tracing::trace!(game = delta.game, raw_delta = delta.raw_delta, "applied game");
        count += 1;
    }

    Ok(ReplaySummary {
        users,
        games: count,
        elapsed: started.elapsed(),
    })
}
