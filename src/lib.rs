// Doubles Rating - Core Library
// Rating engine for two-vs-two games: store, game stream, ledger, replay
// algorithm and the periodic recompute scheduler.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod import;
pub mod ledger;
pub mod model;
pub mod rating;
pub mod scheduler;
pub mod stream;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    get_events_for_entity, get_signoffs, insert_event, insert_signoff, setup_database, Event,
    Store, StoreOptions,
};
pub use engine::{RatingEngine, RecomputeReport, VerifyReport};
pub use error::{EngineError, Result};
pub use import::{import_games_csv, import_users_csv, ImportReport};
pub use ledger::{
    ledger_digest, LedgerUpdate, LedgerWriter, MemoryLedger, Outcome, SqliteLedger,
};
pub use model::{
    Game, LedgerEntry, NewGame, PlayerStanding, SortOrder, Team, User, UserId,
    BASELINE_RATING,
};
pub use rating::{
    actual_outcome, apply_game, expected_outcome, goal_factor, k_factor, replay,
    team_strength, GameDelta, ReplaySummary,
};
pub use scheduler::{FailurePolicy, Scheduler, SchedulerSettings, SchedulerStats};
pub use stream::{recent_games, CancelToken, GameSink, GameSource, GameStream};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
