//! Background rotation: one sweep over all pools every tick.
//!
//! A pool is due in `interval` mode once `interval_minutes` have passed since its last
//! rotation (never rotated counts as due, a non-positive interval disables it), and in
//! `scheduled` mode once any `HH:MM` UTC entry has an occurrence after its last rotation.
//! Pools not due but with health checks on get a health re-selection instead.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::enums::{RotationMode, RotationTrigger};
use crate::db::services::{list_all_pools, parse_scheduled_time};
use crate::rotation::{PoolSnapshot, RotationError};
use crate::services::pool_manager::PoolManager;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub rotated: usize,
    pub health_rotated: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Most recent occurrence of `HH:MM` at or before `now`.
fn last_occurrence(time: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let t = parse_scheduled_time(time)?;
    let today = now.date_naive().and_time(t).and_utc();
    if today <= now {
        Some(today)
    } else {
        Some(today - ChronoDuration::days(1))
    }
}

pub fn is_due(pool: &PoolSnapshot, now: DateTime<Utc>) -> bool {
    if pool.is_paused {
        return false;
    }
    match pool.rotation_mode {
        RotationMode::Interval => {
            if pool.interval_minutes <= 0 {
                return false;
            }
            match pool.last_rotated_at {
                None => true,
                Some(last) => last + ChronoDuration::minutes(pool.interval_minutes as i64) <= now,
            }
        }
        RotationMode::Scheduled => {
            let since = pool.last_rotated_at.unwrap_or(pool.created_at);
            pool.scheduled_times
                .iter()
                .filter_map(|t| last_occurrence(t, now))
                .any(|occurrence| occurrence > since)
        }
    }
}

pub struct RotationScheduler {
    db: DatabaseConnection,
    manager: Arc<PoolManager>,
    interval: Duration,
}

impl RotationScheduler {
    pub fn new(db: DatabaseConnection, manager: Arc<PoolManager>, interval: Duration) -> Self {
        Self {
            db,
            manager,
            interval,
        }
    }

    /// Runs until `cancel` fires. A sweep in progress is finished first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.interval, "Rotation scheduler started.");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if report.rotated + report.health_rotated + report.failed > 0 {
                        info!(?report, "Rotation sweep finished.");
                    }
                }
            }
        }
        info!("Rotation scheduler stopped.");
    }

    /// Evaluates every pool once. Pools are independent and run concurrently; a failure
    /// is logged and left for the next tick.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let pools = match list_all_pools(&self.db).await {
            Ok(pools) => pools,
            Err(e) => {
                error!(error = %e, "Failed to load pools for rotation sweep.");
                return SweepReport::default();
            }
        };

        let results = join_all(pools.iter().map(|pool| self.process(pool, now))).await;

        let mut report = SweepReport::default();
        for outcome in results {
            match outcome {
                PoolTick::Rotated => report.rotated += 1,
                PoolTick::HealthRotated => report.health_rotated += 1,
                PoolTick::Failed => report.failed += 1,
                PoolTick::Skipped => report.skipped += 1,
            }
        }
        report
    }

    async fn process(&self, pool: &PoolSnapshot, now: DateTime<Utc>) -> PoolTick {
        if pool.is_paused {
            return PoolTick::Skipped;
        }

        if is_due(pool, now) {
            return match self
                .manager
                .rotate(pool.pool, None, RotationTrigger::Scheduled)
                .await
            {
                Ok(_) => PoolTick::Rotated,
                Err(RotationError::NoCandidates(_)) => {
                    debug!(pool = %pool.pool, "Due pool has no candidates.");
                    PoolTick::Skipped
                }
                Err(e) => {
                    warn!(pool = %pool.pool, error = %e, "Scheduled rotation failed.");
                    PoolTick::Failed
                }
            };
        }

        if pool.health_check {
            return match self.manager.check_health(pool.pool).await {
                Ok(Some(_)) => PoolTick::HealthRotated,
                Ok(None) => PoolTick::Skipped,
                Err(e) => {
                    warn!(pool = %pool.pool, error = %e, "Health re-selection failed.");
                    PoolTick::Failed
                }
            };
        }
        PoolTick::Skipped
    }
}

enum PoolTick {
    Rotated,
    HealthRotated,
    Failed,
    Skipped,
}
