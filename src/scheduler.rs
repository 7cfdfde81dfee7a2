// Recompute Scheduler - periodic, single-flight ledger rebuilds
//
// Waits an interval, runs one recompute to completion, waits again. Runs
// never overlap: the next wait only starts after the previous run returned.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

use crate::engine::{RatingEngine, RecomputeReport};
use crate::error::{EngineError, Result};

/// What to do when a recompute fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the scheduler and hand the error to the caller
    #[default]
    Fatal,
    /// Log it, back off, try again
    Retry,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub policy: FailurePolicy,
    /// Upper bound for the retry delay under `FailurePolicy::Retry`
    pub max_backoff: Duration,
    /// Recompute immediately instead of waiting one interval first
    pub run_on_start: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            policy: FailurePolicy::Fatal,
            max_backoff: Duration::from_secs(15 * 60),
            run_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failures: u64,
    pub last_report: Option<RecomputeReport>,
}

/// Delay before the next attempt after `consecutive_failures` failed runs.
///
/// Doubles from `interval` per failure, capped at `max_backoff` but never
/// shorter than `interval`.
pub fn backoff_delay(
    interval: Duration,
    max_backoff: Duration,
    consecutive_failures: u32,
) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let factor = 2u32.saturating_pow(consecutive_failures - 1);
    interval
        .checked_mul(factor)
        .unwrap_or(Duration::MAX)
        .min(max_backoff)
        .max(interval)
}

pub struct Scheduler {
    engine: RatingEngine,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(engine: RatingEngine, settings: SchedulerSettings) -> Self {
        Self { engine, settings }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Under `FailurePolicy::Fatal` the first failed recompute ends the loop
    /// with that error; the caller is expected to exit the process.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<SchedulerStats> {
        let settings = self.settings;
        let mut stats = SchedulerStats::default();
        let mut consecutive_failures = 0u32;
        let mut delay = if settings.run_on_start {
            Duration::ZERO
        } else {
            settings.interval
        };

        tracing::info!(
            interval_secs = settings.interval.as_secs_f64(),
            policy = ?settings.policy,
            "recompute scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_once().await {
                Ok(report) => {
                    stats.runs += 1;
                    stats.last_report = Some(report);
                    consecutive_failures = 0;
                    delay = settings.interval;
                }
                Err(err) => {
                    stats.failures += 1;
                    match settings.policy {
                        FailurePolicy::Fatal => {
                            tracing::error!(error = %err, "recompute failed, stopping scheduler");
                            return Err(err);
                        }
                        FailurePolicy::Retry => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            delay = backoff_delay(
                                settings.interval,
                                settings.max_backoff,
                                consecutive_failures,
                            );
                            tracing::error!(
                                error = %err,
                                consecutive_failures,
                                retry_in_secs = delay.as_secs_f64(),
                                "recompute failed, will retry"
                            );
                        }
                    }
                }
            }
        }

        tracing::info!(runs = stats.runs, failures = stats.failures, "recompute scheduler stopped");
        Ok(stats)
    }

    /// One recompute on the blocking pool; SQLite calls never run on the
    /// async workers.
    async fn run_once(&self) -> Result<RecomputeReport> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.recompute())
            .await
            .map_err(|err| EngineError::Task(err.to_string()))?
    }
}
