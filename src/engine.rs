// Rating Engine - owns the recompute transaction
//
// recompute = BEGIN IMMEDIATE
//           -> reset ledger to baseline
//           -> stream games ascending and fold them in
//           -> record audit event
//           -> COMMIT
//
// Any failure drops the transaction, which rolls it back: readers keep
// seeing the previously committed ledger.

use rusqlite::TransactionBehavior;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::{get_ledger, get_user_ids, insert_event, scan_games, Event, Store};
use crate::error::Result;
use crate::ledger::{ledger_digest, MemoryLedger, SqliteLedger};
use crate::model::{Game, LedgerEntry, PlayerStanding, SortOrder, UserId};
use crate::rating::replay;
use crate::stream::{recent_games, GameSource};

/// Outcome of one committed recompute
#[derive(Debug, Clone, Serialize)]
pub struct RecomputeReport {
    pub run_id: Uuid,
    pub users: usize,
    pub games: usize,
    /// SHA-256 of the committed ledger
    pub digest: String,
    pub elapsed: Duration,
}

/// How the committed ledger compares to a fresh replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub committed_digest: String,
    pub replayed_digest: String,
    pub games: usize,
}

impl VerifyReport {
    pub fn is_current(&self) -> bool {
        self.committed_digest == self.replayed_digest
    }
}

#[derive(Clone)]
pub struct RatingEngine {
    store: Store,
}

impl RatingEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Rebuild the ledger from the full game history in the store
    pub fn recompute(&self) -> Result<RecomputeReport> {
        self.recompute_from(&self.store)
    }

    /// Rebuild the ledger from `source`, atomically.
    ///
    /// The writer connection stays locked for the whole reset + replay +
    /// commit, so recomputes triggered from several places run one after
    /// another, never interleaved.
    pub fn recompute_from<S: GameSource + ?Sized>(&self, source: &S) -> Result<RecomputeReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(%run_id, "rating recompute started");

        match self.run_transaction(run_id, source, started) {
            Ok(report) => {
                tracing::info!(
                    %run_id,
                    users = report.users,
                    games = report.games,
                    digest = %report.digest,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "rating recompute committed"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "rating recompute rolled back");
                Err(err)
            }
        }
    }

    fn run_transaction<S: GameSource + ?Sized>(
        &self,
        run_id: Uuid,
        source: &S,
        started: Instant,
    ) -> Result<RecomputeReport> {
        let mut conn = self.store.lock_writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let summary = {
            let mut ledger = SqliteLedger::new(&tx);
            let games = source.stream_games(SortOrder::Ascending)?;
            replay(&mut ledger, games)?
        };

        let digest = ledger_digest(get_ledger(&tx)?.values());
        let elapsed = started.elapsed();
        insert_event(
            &tx,
            &Event::new(
                "ledger_recomputed",
                "ledger",
                &run_id.to_string(),
                serde_json::json!({
                    "users": summary.users,
                    "games": summary.games,
                    "digest": digest,
                    "elapsed_ms": elapsed.as_millis() as u64,
                }),
                "recompute",
            ),
        )?;
        tx.commit()?;

        Ok(RecomputeReport {
            run_id,
            users: summary.users,
            games: summary.games,
            digest,
            elapsed,
        })
    }

    /// Replay the history into memory and compare with the committed ledger.
    /// Touches nothing; a mismatch means games arrived since the last run.
    ///
    /// Users, games and the ledger are all read inside one read transaction,
    /// so a concurrent insert or recompute cannot skew the comparison.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut conn = self.store.open_reader()?;
        let tx = conn.transaction()?;

        let mut ledger = MemoryLedger::new(get_user_ids(&tx)?);
        let committed = get_ledger(&tx)?;
        let mut history = Vec::new();
        scan_games(&tx, SortOrder::Ascending, |game| {
            history.push(Ok(game));
            true
        })?;
        tx.finish()?;

        let summary = replay(&mut ledger, history)?;
        Ok(VerifyReport {
            committed_digest: ledger_digest(committed.values()),
            replayed_digest: ledger_digest(ledger.entries().values()),
            games: summary.games,
        })
    }

    // ========================================================================
    // READ SIDE (committed snapshots only)
    // ========================================================================

    pub fn snapshot(&self) -> Result<BTreeMap<UserId, LedgerEntry>> {
        self.store.ledger_snapshot()
    }

    pub fn entry(&self, user: UserId) -> Result<Option<LedgerEntry>> {
        self.store.ledger_entry(user)
    }

    pub fn standings(&self) -> Result<Vec<PlayerStanding>> {
        self.store.standings()
    }

    /// Newest games first; the scan is cancelled once `limit` is reached
    pub fn recent_games(&self, limit: usize) -> Result<Vec<Game>> {
        recent_games(&self.store, limit)
    }
}
