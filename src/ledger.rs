// Rating Ledger - derived per-user rating, games, wins and losses
//
// The ledger is rebuilt from baseline on every recompute, never patched
// incrementally. Writers go through `LedgerWriter`; the SQLite writer is only
// ever handed a connection that is inside an open transaction.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::model::{LedgerEntry, UserId, BASELINE_RATING};

// ============================================================================
// UPDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

/// Delta applied to a single ledger entry for one game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerUpdate {
    pub rating_delta: f64,
    pub increment_games: bool,
    pub outcome: Outcome,
}

impl LedgerEntry {
    fn absorb(&mut self, update: &LedgerUpdate) {
        self.rating += update.rating_delta;
        if update.increment_games {
            self.games += 1;
        }
        match update.outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Draw => {}
        }
    }
}

/// Write side of the ledger, scoped to one recompute
pub trait LedgerWriter {
    /// Drop every entry and give each known user a fresh baseline entry.
    /// Returns the number of users initialized.
    fn reset_to_baseline(&mut self) -> Result<usize>;

    /// Current in-replay entry. A missing entry is a data-integrity failure.
    fn entry(&self, user: UserId) -> Result<LedgerEntry>;

    fn apply(&mut self, user: UserId, update: &LedgerUpdate) -> Result<()>;
}

// ============================================================================
// SQLITE LEDGER (transaction-scoped)
// ============================================================================

/// Ledger writer over the `elo` table.
///
/// Construct it from a `rusqlite::Transaction` (which derefs to
/// `Connection`); dropping the transaction without commit discards
/// everything written through this writer.
pub struct SqliteLedger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl LedgerWriter for SqliteLedger<'_> {
    fn reset_to_baseline(&mut self) -> Result<usize> {
        self.conn.execute("DELETE FROM elo", [])?;
        let initialized = self.conn.execute(
            "INSERT INTO elo (user, elo, games, won, lost)
             SELECT id, ?1, 0, 0, 0 FROM user",
            params![BASELINE_RATING],
        )?;
        Ok(initialized)
    }

    fn entry(&self, user: UserId) -> Result<LedgerEntry> {
        self.conn
            .query_row(
                "SELECT user, elo, games, won, lost FROM elo WHERE user = ?1",
                params![user.0],
                row_to_entry,
            )
            .optional()?
            .ok_or_else(|| EngineError::missing_entry(user))
    }

    fn apply(&mut self, user: UserId, update: &LedgerUpdate) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE elo
             SET elo = elo + ?1, games = games + ?2, won = won + ?3, lost = lost + ?4
             WHERE user = ?5",
            params![
                update.rating_delta,
                update.increment_games as i64,
                (update.outcome == Outcome::Win) as i64,
                (update.outcome == Outcome::Loss) as i64,
                user.0,
            ],
        )?;

        if updated == 0 {
            return Err(EngineError::missing_entry(user));
        }
        Ok(())
    }
}

pub(crate) fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        user: UserId(row.get(0)?),
        rating: row.get(1)?,
        games: row.get(2)?,
        wins: row.get(3)?,
        losses: row.get(4)?,
    })
}

// ============================================================================
// MEMORY LEDGER
// ============================================================================

/// In-memory ledger for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    users: Vec<UserId>,
    entries: BTreeMap<UserId, LedgerEntry>,
}

impl MemoryLedger {
    /// Ledger that knows `users`; call `reset_to_baseline` before replaying
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        let mut users: Vec<UserId> = users.into_iter().collect();
        users.sort();
        users.dedup();
        Self {
            users,
            entries: BTreeMap::new(),
        }
    }

    pub fn entries(&self) -> &BTreeMap<UserId, LedgerEntry> {
        &self.entries
    }
}

impl LedgerWriter for MemoryLedger {
    fn reset_to_baseline(&mut self) -> Result<usize> {
        self.entries = self
            .users
            .iter()
            .map(|&user| (user, LedgerEntry::baseline(user)))
            .collect();
        Ok(self.entries.len())
    }

    fn entry(&self, user: UserId) -> Result<LedgerEntry> {
        self.entries
            .get(&user)
            .cloned()
            .ok_or_else(|| EngineError::missing_entry(user))
    }

    fn apply(&mut self, user: UserId, update: &LedgerUpdate) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&user)
            .ok_or_else(|| EngineError::missing_entry(user))?;
        entry.absorb(update);
        Ok(())
    }
}

// ============================================================================
// DIGEST
// ============================================================================

/// SHA-256 over the entries ordered by user id.
///
/// Ratings are hashed by their bit pattern, so two digests only match when
/// the ledgers are bit-for-bit equal.
pub fn ledger_digest<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> String {
    let mut ordered: Vec<&LedgerEntry> = entries.into_iter().collect();
    ordered.sort_by_key(|entry| entry.user);

    let mut hasher = Sha256::new();
    for entry in ordered {
        hasher.update(format!(
            "{}:{:016x}:{}:{}:{}\n",
            entry.user,
            entry.rating.to_bits(),
            entry.games,
            entry.wins,
            entry.losses
        ));
    }
    format!("{:x}", hasher.finalize())
}
