// Data Model - users, teams, games and ledger entries
//
// Games are immutable once stored. The engine only ever reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rating every player starts a replay with
pub const BASELINE_RATING: f64 = 500.0;

// ============================================================================
// USERS & TEAMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: String,
    pub first: String,
    pub last: String,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first, self.last)
    }
}

/// Two players; front/back only matter for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub front: User,
    pub back: User,
}

impl Team {
    pub fn members(&self) -> [UserId; 2] {
        [self.front.id, self.back.id]
    }
}

// ============================================================================
// GAMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub teams: [Team; 2],
    pub score: [u32; 2],
    /// Only used for ordering the history
    pub created_at: DateTime<Utc>,
}

impl Game {
    /// Team 0 members first, then team 1
    pub fn participants(&self) -> [UserId; 4] {
        let [a1, a2] = self.teams[0].members();
        let [b1, b2] = self.teams[1].members();
        [a1, a2, b1, b2]
    }

    pub fn has_distinct_participants(&self) -> bool {
        distinct(&self.participants())
    }

    pub fn is_draw(&self) -> bool {
        self.score[0] == self.score[1]
    }

    pub fn score_difference(&self) -> u32 {
        self.score[0].abs_diff(self.score[1])
    }
}

pub(crate) fn distinct(ids: &[UserId; 4]) -> bool {
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            if ids[i] == ids[j] {
                return false;
            }
        }
    }
    true
}

/// A game as submitted, before the store assigns identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGame {
    pub teams: [[UserId; 2]; 2],
    pub score: [u32; 2],
    /// Back-dated games are allowed; `None` means now
    pub created_at: Option<DateTime<Utc>>,
    /// Player who reported the game; recorded as its first sign-off
    #[serde(default)]
    pub submitted_by: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user: UserId,
    pub rating: f64,
    pub games: u32,
    /// Informational only, never read by the rating formula
    pub wins: u32,
    pub losses: u32,
}

impl LedgerEntry {
    pub fn baseline(user: UserId) -> Self {
        Self {
            user,
            rating: BASELINE_RATING,
            games: 0,
            wins: 0,
            losses: 0,
        }
    }
}

/// One leaderboard row: who the player is and where they stand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStanding {
    pub user: User,
    pub rating: f64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
}
