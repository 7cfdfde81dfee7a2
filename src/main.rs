use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doubles_rating::{
    import_games_csv, import_users_csv, Config, NewGame, RatingEngine, Scheduler, Store, UserId,
};

#[derive(Parser)]
#[command(name = "doubles-rating", version, about = "Ratings for two-vs-two games")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(short, long, default_value = "rating.toml")]
    config: PathBuf,

    /// Database path, overrides the config file
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Register a player
    AddUser {
        handle: String,
        first: String,
        last: String,
    },
    /// Record a game: team one (front, back) against team two (front, back)
    AddGame {
        front1: String,
        back1: String,
        front2: String,
        back2: String,
        score1: u32,
        score2: u32,
        /// RFC 3339 timestamp for back-dated games
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Handle of the reporting player, recorded as the first sign-off
        #[arg(long)]
        by: Option<String>,
    },
    /// Confirm a recorded game on behalf of a player
    AddSignoff { handle: String, game: i64 },
    /// Import players from CSV (handle,first,last)
    ImportUsers { csv: PathBuf },
    /// Import games from CSV (front1,back1,front2,back2,score1,score2[,created_at])
    ImportGames { csv: PathBuf },
    /// Rebuild the rating ledger once
    Recompute,
    /// Compare the committed ledger with a fresh in-memory replay
    Verify,
    /// Recompute periodically until Ctrl-C
    Run,
    /// Show the current standings
    Leaderboard {
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent games
    Games {
        #[arg(short, long, default_value_t = 25)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show the latest recompute runs from the audit trail
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing() {
    // DOUBLES_RATING_LOG_FORMAT=json switches to machine-readable output
    let log_format =
        std::env::var("DOUBLES_RATING_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "doubles_rating=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.database = db;
    }

    let store = Store::open_with(&config.database, config.store_options())
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let engine = RatingEngine::new(store.clone());

    match cli.command {
        Command::Init => {
            println!("✓ Database ready at {}", config.database.display());
        }
        Command::AddUser { handle, first, last } => {
            let id = store.add_user(&handle, &first, &last)?;
            println!("✓ Registered {} as user {}", handle, id);
        }
        Command::AddGame {
            front1,
            back1,
            front2,
            back2,
            score1,
            score2,
            at,
            by,
        } => {
            let mut ids = Vec::with_capacity(4);
            for handle in [&front1, &back1, &front2, &back2] {
                ids.push(lookup(&store, handle)?);
            }
            let submitted_by = match by {
                Some(handle) => Some(lookup(&store, &handle)?),
                None => None,
            };
            let game = NewGame {
                teams: [[ids[0], ids[1]], [ids[2], ids[3]]],
                score: [score1, score2],
                created_at: at,
                submitted_by,
            };
            let id = store.add_game(&game)?;
            println!("✓ Recorded game {} ({}-{})", id, score1, score2);
        }
        Command::AddSignoff { handle, game } => {
            let user = lookup(&store, &handle)?;
            if store.add_signoff(user, game)? {
                println!("✓ {} signed off game {}", handle, game);
            } else {
                println!("✓ {} had already signed off game {}", handle, game);
            }
            let signed = store.signoffs(game)?;
            println!("  {} sign-offs", signed.len());
        }
        Command::ImportUsers { csv } => {
            let report = import_users_csv(&store, &csv).context("Failed to import users")?;
            println!("✓ Inserted: {} users", report.inserted);
            println!("✓ Skipped: {}", report.skipped);
        }
        Command::ImportGames { csv } => {
            let report = import_games_csv(&store, &csv).context("Failed to import games")?;
            println!("✓ Inserted: {} games", report.inserted);
            println!("✓ Skipped: {}", report.skipped);
        }
        Command::Recompute => {
            let report = engine.recompute().context("Recompute failed")?;
            println!(
                "✓ Rebuilt ledger for {} players from {} games in {:?}",
                report.users, report.games, report.elapsed
            );
            println!("  digest {}", report.digest);
        }
        Command::Verify => {
            let report = engine.verify()?;
            if report.is_current() {
                println!("✓ Ledger matches a fresh replay of {} games", report.games);
            } else {
                println!(
                    "✗ Ledger is stale: committed {} vs replayed {}",
                    report.committed_digest, report.replayed_digest
                );
            }
        }
        Command::Run => run_scheduler(engine, &config)?,
        Command::Leaderboard { json } => {
            let standings = engine.standings()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&standings)?);
            } else {
                println!(
                    "{:>4}  {:<16} {:<24} {:>8} {:>5} {:>4} {:>4}",
                    "#", "handle", "name", "rating", "games", "won", "lost"
                );
                for (rank, row) in standings.iter().enumerate() {
                    println!(
                        "{:>4}  {:<16} {:<24} {:>8.1} {:>5} {:>4} {:>4}",
                        rank + 1,
                        row.user.handle,
                        row.user.display_name(),
                        row.rating,
                        row.games,
                        row.wins,
                        row.losses
                    );
                }
            }
        }
        Command::Games { limit, json } => {
            let games = engine.recent_games(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&games)?);
            } else {
                for game in &games {
                    println!(
                        "{:>6}  {}  {}/{} {:>2} - {:<2} {}/{}",
                        game.id,
                        game.created_at.format("%Y-%m-%d %H:%M"),
                        game.teams[0].front.handle,
                        game.teams[0].back.handle,
                        game.score[0],
                        game.score[1],
                        game.teams[1].front.handle,
                        game.teams[1].back.handle
                    );
                }
            }
        }
        Command::Runs { limit } => {
            for event in store.recent_events("ledger_recomputed", limit)? {
                println!("{}  {}  {}", event.timestamp.to_rfc3339(), event.entity_id, event.data);
            }
        }
    }

    Ok(())
}

fn lookup(store: &Store, handle: &str) -> Result<UserId> {
    let user = store
        .user(handle)?
        .with_context(|| format!("Unknown player '{}'", handle))?;
    Ok(user.id)
}

fn run_scheduler(engine: RatingEngine, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        let scheduler = Scheduler::new(engine, config.scheduler_settings());
        // a fatal recompute failure ends the process with a non-zero exit
        let stats = scheduler.run(shutdown_rx).await.context("Recompute scheduler halted")?;
        println!("✓ Scheduler stopped after {} runs ({} failures)", stats.runs, stats.failures);
        Ok::<(), anyhow::Error>(())
    })
}
