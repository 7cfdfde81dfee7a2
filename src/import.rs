// CSV Import - seed users and game history from spreadsheets
//
// users.csv:  handle,first,last
// games.csv:  front1,back1,front2,back2,score1,score2[,created_at]
//
// Games refer to players by handle. created_at is RFC 3339; rows without
// it are stamped with the import time, in file order.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::db::Store;
use crate::error::{EngineError, Result};
use crate::model::{NewGame, UserId};

#[derive(Debug, Deserialize)]
pub struct UserRecord {
    pub handle: String,
    pub first: String,
    pub last: String,
}

#[derive(Debug, Deserialize)]
pub struct GameRecord {
    pub front1: String,
    pub back1: String,
    pub front2: String,
    pub back2: String,
    pub score1: u32,
    pub score2: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    /// Rows the store rejected (duplicate handle, unknown player, ...)
    pub skipped: usize,
}

pub fn load_user_records(csv_path: &Path) -> Result<Vec<UserRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;
    let records = rdr.deserialize().collect::<Result<Vec<UserRecord>, _>>()?;
    Ok(records)
}

pub fn load_game_records(csv_path: &Path) -> Result<Vec<GameRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;
    let records = rdr.deserialize().collect::<Result<Vec<GameRecord>, _>>()?;
    Ok(records)
}

pub fn import_users(store: &Store, records: &[UserRecord]) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for record in records {
        match store.add_user(&record.handle, &record.first, &record.last) {
            Ok(_) => report.inserted += 1,
            Err(EngineError::Validation(reason)) => {
                tracing::warn!(handle = %record.handle, %reason, "skipping user");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

pub fn import_games(store: &Store, records: &[GameRecord]) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut handles: HashMap<String, Option<UserId>> = HashMap::new();

    for (line, record) in records.iter().enumerate() {
        let mut resolve = |handle: &str| -> Result<Option<UserId>> {
            if let Some(id) = handles.get(handle) {
                return Ok(*id);
            }
            let id = store.user(handle)?.map(|user| user.id);
            handles.insert(handle.to_string(), id);
            Ok(id)
        };

        let players = [
            resolve(&record.front1)?,
            resolve(&record.back1)?,
            resolve(&record.front2)?,
            resolve(&record.back2)?,
        ];
        let [Some(front1), Some(back1), Some(front2), Some(back2)] = players else {
            tracing::warn!(line = line + 1, "skipping game with unknown player");
            report.skipped += 1;
            continue;
        };

        let game = NewGame {
            teams: [[front1, back1], [front2, back2]],
            score: [record.score1, record.score2],
            created_at: record.created_at,
            submitted_by: None,
        };
        match store.add_game(&game) {
            Ok(_) => report.inserted += 1,
            Err(EngineError::Validation(reason)) => {
                tracing::warn!(line = line + 1, %reason, "skipping game");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

pub fn import_users_csv(store: &Store, csv_path: &Path) -> Result<ImportReport> {
    import_users(store, &load_user_records(csv_path)?)
}

pub fn import_games_csv(store: &Store, csv_path: &Path) -> Result<ImportReport> {
    import_games(store, &load_game_records(csv_path)?)
}
