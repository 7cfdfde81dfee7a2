// Game Store - SQLite persistence for users, games, the rating ledger and
// the audit trail.
//
// One writer connection is shared behind a mutex. Reads and game streams
// open their own connections so they never wait on a recompute: in WAL mode
// they see the last committed ledger until the recompute commits.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::ledger::row_to_entry;
use crate::model::{
    distinct, Game, LedgerEntry, NewGame, PlayerStanding, SortOrder, Team, User, UserId,
    BASELINE_RATING,
};
use crate::stream::{GameSource, GameStream, DEFAULT_STREAM_BUFFER};

pub const MIN_HANDLE_LEN: usize = 2;

/// Event for the audit trail: who changed what, and when
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL keeps readers on the previous snapshot while a recompute writes
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user TEXT UNIQUE NOT NULL,
            first TEXT NOT NULL,
            last TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // created_at is RFC 3339 in UTC with nine fractional digits, so text
    // order is chronological order
    conn.execute(
        "CREATE TABLE IF NOT EXISTS game (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            front1 INTEGER NOT NULL REFERENCES user(id),
            back1 INTEGER NOT NULL REFERENCES user(id),
            score1 INTEGER NOT NULL CHECK (score1 >= 0),
            front2 INTEGER NOT NULL REFERENCES user(id),
            back2 INTEGER NOT NULL REFERENCES user(id),
            score2 INTEGER NOT NULL CHECK (score2 >= 0),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Derived; rebuilt from scratch by every recompute
    conn.execute(
        "CREATE TABLE IF NOT EXISTS elo (
            user INTEGER PRIMARY KEY REFERENCES user(id),
            elo REAL NOT NULL,
            games INTEGER NOT NULL DEFAULT 0,
            won INTEGER NOT NULL DEFAULT 0,
            lost INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // A player confirming a game result; the submitter signs off on insert
    conn.execute(
        "CREATE TABLE IF NOT EXISTS signoff (
            user INTEGER NOT NULL REFERENCES user(id),
            game INTEGER NOT NULL REFERENCES game(id),
            created_at TEXT NOT NULL,
            PRIMARY KEY (user, game)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_game_created_at ON game(created_at, id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Fixed-width RFC 3339, full nanosecond precision
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// USERS
// ============================================================================

/// Register a user and give them a baseline ledger row so leaderboards show
/// them before the next recompute.
pub fn insert_user(conn: &Connection, handle: &str, first: &str, last: &str) -> Result<UserId> {
    let handle = handle.trim();
    if handle.chars().count() < MIN_HANDLE_LEN {
        return Err(EngineError::Validation(format!(
            "handle must be at least {} characters",
            MIN_HANDLE_LEN
        )));
    }
    if first.trim().is_empty() || last.trim().is_empty() {
        return Err(EngineError::Validation("first and last name are required".to_string()));
    }

    let tx = conn.unchecked_transaction()?;
    let result = tx.execute(
        "INSERT INTO user (user, first, last) VALUES (?1, ?2, ?3)",
        params![handle, first.trim(), last.trim()],
    );
    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(EngineError::Validation(format!("handle '{}' is taken", handle)));
        }
        Err(e) => return Err(e.into()),
    }

    let id = UserId(tx.last_insert_rowid());
    tx.execute(
        "INSERT INTO elo (user, elo, games, won, lost) VALUES (?1, ?2, 0, 0, 0)",
        params![id.0, BASELINE_RATING],
    )?;
    insert_event(
        &tx,
        &Event::new(
            "user_added",
            "user",
            &id.to_string(),
            serde_json::json!({ "handle": handle }),
            "store",
        ),
    )?;
    tx.commit()?;

    Ok(id)
}

fn row_to_user(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(offset)?),
        handle: row.get(offset + 1)?,
        first: row.get(offset + 2)?,
        last: row.get(offset + 3)?,
    })
}

pub fn get_user(conn: &Connection, handle: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, user, first, last FROM user WHERE user = ?1",
            params![handle],
            |row| row_to_user(row, 0),
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_ids(conn: &Connection) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare("SELECT id FROM user ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| Ok(UserId(row.get(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Leaderboard rows, best rating first
pub fn get_standings(conn: &Connection) -> Result<Vec<PlayerStanding>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.user, u.first, u.last, e.elo, e.games, e.won, e.lost
         FROM user u
         INNER JOIN elo e ON e.user = u.id
         ORDER BY e.elo DESC, u.user ASC",
    )?;

    let standings = stmt
        .query_map([], |row| {
            Ok(PlayerStanding {
                user: row_to_user(row, 0)?,
                rating: row.get(4)?,
                games: row.get(5)?,
                wins: row.get(6)?,
                losses: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(standings)
}

// ============================================================================
// LEDGER READS
// ============================================================================

pub fn get_ledger(conn: &Connection) -> Result<BTreeMap<UserId, LedgerEntry>> {
    let mut stmt = conn.prepare("SELECT user, elo, games, won, lost FROM elo")?;
    let entries = stmt
        .query_map([], row_to_entry)?
        .map(|entry| entry.map(|e| (e.user, e)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(entries)
}

pub fn get_ledger_entry(conn: &Connection, user: UserId) -> Result<Option<LedgerEntry>> {
    let entry = conn
        .query_row(
            "SELECT user, elo, games, won, lost FROM elo WHERE user = ?1",
            params![user.0],
            row_to_entry,
        )
        .optional()?;
    Ok(entry)
}

// ============================================================================
// GAMES
// ============================================================================

const GAME_SELECT: &str = "
    SELECT
        g.id, g.score1, g.score2, g.created_at,
        f1.id, f1.user, f1.first, f1.last,
        b1.id, b1.user, b1.first, b1.last,
        f2.id, f2.user, f2.first, f2.last,
        b2.id, b2.user, b2.first, b2.last
    FROM game g
    INNER JOIN user f1 ON f1.id = g.front1
    INNER JOIN user b1 ON b1.id = g.back1
    INNER JOIN user f2 ON f2.id = g.front2
    INNER JOIN user b2 ON b2.id = g.back2";

fn row_to_game(row: &rusqlite::Row<'_>) -> rusqlite::Result<Game> {
    let created_at: String = row.get(3)?;
    Ok(Game {
        id: row.get(0)?,
        score: [row.get(1)?, row.get(2)?],
        created_at: parse_timestamp(3, &created_at)?,
        teams: [
            Team {
                front: row_to_user(row, 4)?,
                back: row_to_user(row, 8)?,
            },
            Team {
                front: row_to_user(row, 12)?,
                back: row_to_user(row, 16)?,
            },
        ],
    })
}

/// Persist a game. Rejects games without four distinct, known players.
/// A submitter, when given, signs the game off in the same transaction.
pub fn insert_game(conn: &Connection, game: &NewGame) -> Result<i64> {
    let [[front1, back1], [front2, back2]] = game.teams;
    if !distinct(&[front1, back1, front2, back2]) {
        return Err(EngineError::Validation(
            "a game needs four different players".to_string(),
        ));
    }

    let created_at = game.created_at.unwrap_or_else(Utc::now);
    let tx = conn.unchecked_transaction()?;
    let result = tx.execute(
        "INSERT INTO game (front1, back1, score1, front2, back2, score2, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            front1.0,
            back1.0,
            game.score[0],
            front2.0,
            back2.0,
            game.score[1],
            format_timestamp(&created_at),
        ],
    );
    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(EngineError::Validation("game references an unknown player".to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    let id = tx.last_insert_rowid();
    insert_event(
        &tx,
        &Event::new(
            "game_added",
            "game",
            &id.to_string(),
            serde_json::json!({
                "teams": [[front1, back1], [front2, back2]],
                "score": game.score,
                "created_at": format_timestamp(&created_at),
                "submitted_by": game.submitted_by,
            }),
            "store",
        ),
    )?;
    if let Some(submitter) = game.submitted_by {
        record_signoff(&tx, submitter, id)?;
    }
    tx.commit()?;

    Ok(id)
}

// ============================================================================
// SIGN-OFFS
// ============================================================================

/// Returns `false` when `user` had already signed off on `game`.
fn record_signoff(conn: &Connection, user: UserId, game: i64) -> Result<bool> {
    let result = conn.execute(
        "INSERT OR IGNORE INTO signoff (user, game, created_at) VALUES (?1, ?2, ?3)",
        params![user.0, game, format_timestamp(&Utc::now())],
    );
    let inserted = match result {
        Ok(rows) => rows > 0,
        Err(e) if is_constraint_violation(&e) => {
            return Err(EngineError::Validation(format!(
                "cannot sign off game {} as user {}: unknown game or player",
                game, user
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if inserted {
        insert_event(
            conn,
            &Event::new(
                "game_signed_off",
                "game",
                &game.to_string(),
                serde_json::json!({ "user": user }),
                "store",
            ),
        )?;
    }
    Ok(inserted)
}

/// A player confirms a recorded game. Signing twice is a no-op.
pub fn insert_signoff(conn: &Connection, user: UserId, game: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let inserted = record_signoff(&tx, user, game)?;
    tx.commit()?;
    Ok(inserted)
}

/// Players who signed off on `game`, in signing order
pub fn get_signoffs(conn: &Connection, game: i64) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user FROM signoff WHERE game = ?1 ORDER BY created_at, rowid",
    )?;
    let users = stmt
        .query_map(params![game], |row| Ok(UserId(row.get(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn count_games(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM game", [], |row| row.get(0))?;
    Ok(count)
}

/// Scan the game history on `conn`, pushing each game to `emit` until it
/// returns `false`.
pub fn scan_games(
    conn: &Connection,
    order: SortOrder,
    mut emit: impl FnMut(Game) -> bool,
) -> Result<usize> {
    let sql = format!(
        "{GAME_SELECT}\n    ORDER BY g.created_at {dir}, g.id {dir}",
        dir = order.as_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut scanned = 0;
    while let Some(row) = rows.next()? {
        scanned += 1;
        if !emit(row_to_game(row)?) {
            break;
        }
    }
    Ok(scanned)
}

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: parse_timestamp(1, &timestamp)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
        })?,
        actor: row.get(6)?,
    })
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn get_recent_events(conn: &Connection, event_type: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![event_type, limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    /// Games buffered ahead of a stream consumer
    pub stream_buffer: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(15),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

/// Handle to the game store; cheap to clone, all clones share one writer
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    options: StoreOptions,
    writer: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open (creating if needed) a file-backed store.
    ///
    /// In-memory databases are not supported: streams read on their own
    /// connections and would not see the data.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(options.busy_timeout)?;
        setup_database(&conn)?;

        tracing::debug!(path = %path.display(), "game store opened");
        Ok(Self {
            path,
            options,
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive access to the writer connection. Holding the guard is what
    /// keeps two recomputes (or a recompute and an insert) from interleaving.
    pub fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Fresh connection for read-only work
    pub fn open_reader(&self) -> Result<Connection> {
        open_reader(&self.path, self.options.busy_timeout)
    }

    pub fn add_user(&self, handle: &str, first: &str, last: &str) -> Result<UserId> {
        let conn = self.lock_writer()?;
        insert_user(&conn, handle, first, last)
    }

    pub fn add_game(&self, game: &NewGame) -> Result<i64> {
        let conn = self.lock_writer()?;
        insert_game(&conn, game)
    }

    pub fn add_signoff(&self, user: UserId, game: i64) -> Result<bool> {
        let conn = self.lock_writer()?;
        insert_signoff(&conn, user, game)
    }

    pub fn signoffs(&self, game: i64) -> Result<Vec<UserId>> {
        get_signoffs(&self.open_reader()?, game)
    }

    pub fn user(&self, handle: &str) -> Result<Option<User>> {
        get_user(&self.open_reader()?, handle)
    }

    pub fn standings(&self) -> Result<Vec<PlayerStanding>> {
        get_standings(&self.open_reader()?)
    }

    /// Committed ledger, as of the last successful recompute
    pub fn ledger_snapshot(&self) -> Result<BTreeMap<UserId, LedgerEntry>> {
        get_ledger(&self.open_reader()?)
    }

    pub fn ledger_entry(&self, user: UserId) -> Result<Option<LedgerEntry>> {
        get_ledger_entry(&self.open_reader()?, user)
    }

    pub fn game_count(&self) -> Result<i64> {
        count_games(&self.open_reader()?)
    }

    pub fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.open_reader()?, entity_type, entity_id)
    }

    pub fn recent_events(&self, event_type: &str, limit: usize) -> Result<Vec<Event>> {
        get_recent_events(&self.open_reader()?, event_type, limit)
    }
}

fn open_reader(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

impl GameSource for Store {
    /// Each call scans on its own connection, opened on the producer thread
    fn stream_games(&self, order: SortOrder) -> Result<GameStream> {
        let path = self.path.clone();
        let busy_timeout = self.options.busy_timeout;

        GameStream::spawn(self.options.stream_buffer, move |sink| {
            let conn = open_reader(&path, busy_timeout)?;
            let scanned = scan_games(&conn, order, |game| sink.send(game))?;
            if sink.is_cancelled() {
                tracing::debug!(scanned, "game scan cancelled by consumer");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn four_users(conn: &Connection) -> [UserId; 4] {
        [
            insert_user(conn, "alice", "Alice", "Anders").unwrap(),
            insert_user(conn, "bob", "Bob", "Berg").unwrap(),
            insert_user(conn, "carol", "Carol", "Claes").unwrap(),
            insert_user(conn, "dave", "Dave", "Dahl").unwrap(),
        ]
    }

    fn new_game(ids: [UserId; 4], score: [u32; 2], minute: u32) -> NewGame {
        NewGame {
            teams: [[ids[0], ids[1]], [ids[2], ids[3]]],
            score,
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 18, minute, 0).unwrap()),
            submitted_by: None,
        }
    }

    #[test]
    fn test_new_user_gets_baseline_entry() {
        let conn = setup();
        let id = insert_user(&conn, "alice", "Alice", "Anders").unwrap();

        let entry = get_ledger_entry(&conn, id).unwrap().unwrap();
        assert_eq!(entry, LedgerEntry::baseline(id));
        assert_eq!(get_user(&conn, "alice").unwrap().unwrap().id, id);
        assert!(get_user(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_user_validation() {
        let conn = setup();
        insert_user(&conn, "alice", "Alice", "Anders").unwrap();

        let rejected = [("a", "A", "B"), ("bob", "", "B"), ("alice", "Alice", "Again")];
        for (handle, first, last) in rejected {
            let err = insert_user(&conn, handle, first, last).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{handle}: {err}");
        }
        assert_eq!(get_user_ids(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_game_validation() {
        let conn = setup();
        let [a, b, c, _] = four_users(&conn);

        let repeated = insert_game(&conn, &new_game([a, b, c, a], [10, 4], 0)).unwrap_err();
        assert!(matches!(repeated, EngineError::Validation(_)));

        let unknown = insert_game(&conn, &new_game([a, b, c, UserId(99)], [10, 4], 0)).unwrap_err();
        assert!(matches!(unknown, EngineError::Validation(_)));

        assert_eq!(count_games(&conn).unwrap(), 0);
    }

    #[test]
    fn test_scan_orders_by_creation_time_not_insertion() {
        let conn = setup();
        let ids = four_users(&conn);

        let late = insert_game(&conn, &new_game(ids, [10, 4], 30)).unwrap();
        let early = insert_game(&conn, &new_game(ids, [3, 10], 5)).unwrap();

        let mut ascending = Vec::new();
        scan_games(&conn, SortOrder::Ascending, |g| {
            ascending.push(g.id);
            true
        })
        .unwrap();
        assert_eq!(ascending, vec![early, late]);

        let mut descending = Vec::new();
        scan_games(&conn, SortOrder::Descending, |g| {
            descending.push(g);
            true
        })
        .unwrap();
        assert_eq!(descending[0].id, late);
        assert_eq!(descending[0].teams[0].front.handle, "alice");
        assert_eq!(descending[0].teams[1].back.handle, "dave");
        assert_eq!(descending[1].score, [3, 10]);
    }

    #[test]
    fn test_scan_stops_when_told() {
        let conn = setup();
        let ids = four_users(&conn);
        for minute in 0..5 {
            insert_game(&conn, &new_game(ids, [10, minute], minute)).unwrap();
        }

        let scanned = scan_games(&conn, SortOrder::Ascending, |_| false).unwrap();
        assert_eq!(scanned, 1);
    }

    #[test]
    fn test_sub_millisecond_order_survives_storage() {
        let conn = setup();
        let players = four_users(&conn);
        let noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(&noon), "2024-01-01T12:00:00.000000000Z");

        // recorded first, played second
        let mut later = new_game(players, [10, 4], 0);
        later.created_at = Some(noon + chrono::Duration::microseconds(700));
        let mut earlier = new_game(players, [4, 10], 0);
        earlier.created_at = Some(noon + chrono::Duration::microseconds(300));
        let later_id = insert_game(&conn, &later).unwrap();
        let earlier_id = insert_game(&conn, &earlier).unwrap();

        let mut ascending = Vec::new();
        scan_games(&conn, SortOrder::Ascending, |g| {
            ascending.push(g);
            true
        })
        .unwrap();

        let order: Vec<i64> = ascending.iter().map(|g| g.id).collect();
        assert_eq!(order, vec![earlier_id, later_id]);
        assert_eq!(Some(ascending[0].created_at), earlier.created_at);
        assert_eq!(Some(ascending[1].created_at), later.created_at);
    }

    #[test]
    fn test_submitter_signs_off_and_others_confirm() {
        let conn = setup();
        let [a, b, c, d] = four_users(&conn);

        let mut game = new_game([a, b, c, d], [10, 7], 0);
        game.submitted_by = Some(a);
        let id = insert_game(&conn, &game).unwrap();
        assert_eq!(get_signoffs(&conn, id).unwrap(), vec![a]);

        assert!(insert_signoff(&conn, c, id).unwrap());
        assert!(!insert_signoff(&conn, c, id).unwrap());
        assert_eq!(get_signoffs(&conn, id).unwrap(), vec![a, c]);

        let unknown_game = insert_signoff(&conn, d, 999).unwrap_err();
        assert!(matches!(unknown_game, EngineError::Validation(_)));
        let unknown_user = insert_signoff(&conn, UserId(99), id).unwrap_err();
        assert!(matches!(unknown_user, EngineError::Validation(_)));

        // game_added plus one event per new sign-off
        let events = get_events_for_entity(&conn, "game", &id.to_string()).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_unknown_submitter_rejects_the_whole_game() {
        let conn = setup();
        let players = four_users(&conn);

        let mut game = new_game(players, [1, 10], 0);
        game.submitted_by = Some(UserId(42));
        let err = insert_game(&conn, &game).unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(count_games(&conn).unwrap(), 0);
    }

    #[test]
    fn test_standings_order_by_rating() {
        let conn = setup();
        let [a, b, ..] = four_users(&conn);
        conn.execute(
            "UPDATE elo SET elo = 540.0, games = 3, won = 2, lost = 1 WHERE user = ?1",
            params![b.0],
        )
        .unwrap();
        conn.execute("UPDATE elo SET elo = 470.0 WHERE user = ?1", params![a.0]).unwrap();

        let standings = get_standings(&conn).unwrap();
        assert_eq!(standings.len(), 4);
        assert_eq!(standings[0].user.handle, "bob");
        assert_eq!((standings[0].games, standings[0].wins, standings[0].losses), (3, 2, 1));
        assert_eq!(standings[3].user.handle, "alice");
    }

    #[test]
    fn test_event_log() {
        let conn = setup();

        let event = Event::new(
            "ledger_recomputed",
            "ledger",
            "run-1",
            serde_json::json!({"games": 3}),
            "test_actor",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "ledger", "run-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ledger_recomputed");
        assert_eq!(events[0].data["games"], 3);
        assert_eq!(events[0].actor, "test_actor");

        let recent = get_recent_events(&conn, "ledger_recomputed", 10).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_store_streams_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("games.db")).unwrap();
        let a = store.add_user("alice", "Alice", "Anders").unwrap();
        let b = store.add_user("bob", "Bob", "Berg").unwrap();
        let c = store.add_user("carol", "Carol", "Claes").unwrap();
        let d = store.add_user("dave", "Dave", "Dahl").unwrap();
        for minute in 0..3 {
            store.add_game(&new_game([a, b, c, d], [10, minute], minute)).unwrap();
        }

        let scores: Vec<u32> = store
            .stream_games(SortOrder::Ascending)
            .unwrap()
            .map(|g| g.unwrap().score[1])
            .collect();
        assert_eq!(scores, vec![0, 1, 2]);
        assert_eq!(store.game_count().unwrap(), 3);
        assert_eq!(store.events_for("game", "1").unwrap().len(), 1);

        assert!(store.add_signoff(b, 1).unwrap());
        assert_eq!(store.signoffs(1).unwrap(), vec![b]);
    }
}
