//! Rotation transaction and the selection entry points around it.
//!
//! Every entry point takes the pool's in-process lock for the whole read-decide-write
//! sequence, and the final state write additionally locks the pool row, so two rotations
//! of one pool never interleave. Different pools rotate in parallel.
//!
//! DNS goes first. If the reconciler fails, nothing else is written: no pool state change
//! and no history row.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, IntoActiveModel,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::entities::{prelude::*, rotation_history};
use crate::db::enums::{PoolKind, RotationTrigger};
use crate::db::services::{pool_service, GroupResolver, MachineDirectory};
use crate::dns::{DnsReconciler, ReconcileOutcome};
use crate::rotation::error::RotationError;
use crate::rotation::membership::{self, Candidate, Selection};
use crate::rotation::pool::{PoolRef, PoolSnapshot, PoolTarget};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    pub pool: PoolRef,
    pub trigger: RotationTrigger,
    pub from_vps_id: Option<i32>,
    pub from_ip: Option<String>,
    pub to_vps_id: i32,
    pub to_ip: String,
    pub current_index: i32,
    pub history_id: i32,
    pub rotated_at: DateTime<Utc>,
    pub dns: Vec<ReconcileOutcome>,
}

type Heartbeats = HashMap<i32, Option<DateTime<Utc>>>;

pub struct RotationEngine {
    db: DatabaseConnection,
    directory: Arc<dyn MachineDirectory>,
    groups: Arc<dyn GroupResolver>,
    reconciler: Arc<DnsReconciler>,
    locks: DashMap<PoolRef, Arc<Mutex<()>>>,
    health_window: chrono::Duration,
}

impl RotationEngine {
    pub fn new(
        db: DatabaseConnection,
        directory: Arc<dyn MachineDirectory>,
        groups: Arc<dyn GroupResolver>,
        reconciler: Arc<DnsReconciler>,
        health_window: std::time::Duration,
    ) -> Self {
        Self {
            db,
            directory,
            groups,
            reconciler,
            locks: DashMap::new(),
            health_window: chrono::Duration::from_std(health_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    pub fn health_window(&self) -> chrono::Duration {
        self.health_window
    }

    fn lock_for(&self, pool: PoolRef) -> Arc<Mutex<()>> {
        self.locks
            .entry(pool)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn load(&self, pool: PoolRef) -> Result<PoolSnapshot, RotationError> {
        pool_service::load_pool(&self.db, pool)
            .await?
            .ok_or(RotationError::PoolNotFound(pool))
    }

    /// Direct members plus group expansion, resolved fresh on every call.
    pub async fn effective_members(
        &self,
        snapshot: &PoolSnapshot,
    ) -> Result<Vec<Candidate>, RotationError> {
        let group_members = self.groups.resolve_members(&snapshot.tag_ids).await?;
        Ok(membership::effective_members(&snapshot.members, &group_members))
    }

    async fn heartbeats_for(&self, ordered: &[Candidate]) -> Result<Heartbeats, RotationError> {
        let ids: Vec<i32> = ordered.iter().map(|c| c.vps_id).collect();
        Ok(self.directory.get_last_heartbeats(&ids).await?)
    }

    fn choose(
        &self,
        snapshot: &PoolSnapshot,
        ordered: &[Candidate],
        heartbeats: Option<&Heartbeats>,
    ) -> Option<Selection> {
        let eligible = match heartbeats {
            Some(heartbeats) => {
                membership::filter_healthy(ordered, heartbeats, Utc::now(), self.health_window)
            }
            None => ordered.to_vec(),
        };
        let anchor = membership::anchor_index(ordered, snapshot.current_vps_id, snapshot.current_index);
        let current_index = membership::rebase_index(ordered, &eligible, anchor);
        membership::pick(snapshot.strategy, &eligible, current_index, &mut rand::rng())
    }

    /// Next machine for the pool under its strategy, after health filtering when enabled.
    pub async fn select_next(&self, snapshot: &PoolSnapshot) -> Result<Selection, RotationError> {
        let ordered = self.effective_members(snapshot).await?;
        if ordered.is_empty() {
            return Err(RotationError::NoCandidates(snapshot.pool));
        }
        let heartbeats = if snapshot.health_check {
            Some(self.heartbeats_for(&ordered).await?)
        } else {
            None
        };
        self.choose(snapshot, &ordered, heartbeats.as_ref())
            .ok_or(RotationError::NoCandidates(snapshot.pool))
    }

    /// Rotates to an already chosen candidate. The candidate is checked against the
    /// effective membership again under the pool lock, since it may have left the pool
    /// since it was selected.
    pub async fn rotate(
        &self,
        pool: PoolRef,
        candidate: &Candidate,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        self.rotate_to_member_locked(&snapshot, candidate.vps_id, trigger)
            .await
    }

    /// Selects and rotates in one serialized step.
    pub async fn rotate_now(
        &self,
        pool: PoolRef,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        let selection = self.select_next(&snapshot).await?;
        debug!(pool = %pool, vps_id = selection.candidate.vps_id, index = selection.index, "Selected next machine.");
        self.rotate_locked(&snapshot, selection.candidate.vps_id, trigger)
            .await
    }

    /// Rotates to a specific machine, which must currently be an effective member.
    pub async fn rotate_to(
        &self,
        pool: PoolRef,
        vps_id: i32,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        self.rotate_to_member_locked(&snapshot, vps_id, trigger)
            .await
    }

    /// Re-points DNS at the active machine without rotating: no index change and no
    /// history row. `Ok(None)` when no machine is active yet.
    pub async fn resync(&self, pool: PoolRef) -> Result<Option<Vec<ReconcileOutcome>>, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        let Some(vps_id) = snapshot.current_vps_id else {
            return Ok(None);
        };
        let ip = self
            .directory
            .get_machine_ip(vps_id)
            .await?
            .ok_or(RotationError::MachineWithoutIp(vps_id))?;
        let dns = self.point_dns(&snapshot.target, &ip).await?;
        info!(pool = %pool, vps_id, "DNS re-pointed at active machine.");
        Ok(Some(dns))
    }

    /// Drops the in-process lock of a deleted pool.
    pub fn forget(&self, pool: PoolRef) {
        self.locks.remove(&pool);
    }

    /// Pools that currently hold an in-process lock entry.
    pub fn tracked_pools(&self) -> usize {
        self.locks.len()
    }

    /// Activates the first member of a pool that has none selected yet. `Ok(None)` when a
    /// machine is already active or the pool has no members.
    pub async fn ensure_initial(
        &self,
        pool: PoolRef,
    ) -> Result<Option<RotationOutcome>, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        if snapshot.current_vps_id.is_some() {
            return Ok(None);
        }
        let ordered = self.effective_members(&snapshot).await?;
        if ordered.is_empty() {
            return Ok(None);
        }
        let eligible = if snapshot.health_check {
            let heartbeats = self.heartbeats_for(&ordered).await?;
            membership::filter_healthy(&ordered, &heartbeats, Utc::now(), self.health_window)
        } else {
            ordered
        };
        let Some(first) = eligible.first() else {
            return Ok(None);
        };
        self.rotate_locked(&snapshot, first.vps_id, RotationTrigger::Initial)
            .await
            .map(Some)
    }

    /// Re-selects when the active machine has dropped out of the health-filtered set and
    /// some other member is fresh. `Ok(None)` when nothing needs to change.
    pub async fn check_health(
        &self,
        pool: PoolRef,
    ) -> Result<Option<RotationOutcome>, RotationError> {
        let lock = self.lock_for(pool);
        let _guard = lock.lock().await;
        let snapshot = self.load(pool).await?;
        if !snapshot.health_check || snapshot.is_paused {
            return Ok(None);
        }
        let Some(current) = snapshot.current_vps_id else {
            return Ok(None);
        };
        let ordered = self.effective_members(&snapshot).await?;
        if ordered.is_empty() {
            return Ok(None);
        }

        let heartbeats = self.heartbeats_for(&ordered).await?;
        let now = Utc::now();
        let fresh = |vps_id: i32| {
            membership::is_fresh(
                heartbeats.get(&vps_id).copied().flatten(),
                now,
                self.health_window,
            )
        };
        let current_is_member = membership::position_of(&ordered, current).is_some();
        if current_is_member && fresh(current) {
            return Ok(None);
        }
        if !ordered.iter().any(|c| c.vps_id != current && fresh(c.vps_id)) {
            return Ok(None);
        }

        let Some(selection) = self.choose(&snapshot, &ordered, Some(&heartbeats)) else {
            return Ok(None);
        };
        info!(pool = %snapshot.pool, stale_vps_id = current, "Active machine failed health check.");
        self.rotate_locked(&snapshot, selection.candidate.vps_id, RotationTrigger::Health)
            .await
            .map(Some)
    }

    async fn rotate_to_member_locked(
        &self,
        snapshot: &PoolSnapshot,
        vps_id: i32,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let ordered = self.effective_members(snapshot).await?;
        if ordered.is_empty() {
            return Err(RotationError::NoCandidates(snapshot.pool));
        }
        if membership::position_of(&ordered, vps_id).is_none() {
            return Err(RotationError::NotAMember(vps_id, snapshot.pool));
        }
        self.rotate_locked(snapshot, vps_id, trigger).await
    }

    async fn point_dns(
        &self,
        target: &PoolTarget,
        ip: &str,
    ) -> Result<Vec<ReconcileOutcome>, RotationError> {
        let dns = match *target {
            PoolTarget::Record { dns_record_id } => {
                vec![self.reconciler.point_record_at(dns_record_id, ip).await?]
            }
            PoolTarget::Wildcard {
                domain_id,
                include_root,
            } => {
                self.reconciler
                    .point_wildcard_at(domain_id, include_root, ip)
                    .await?
            }
        };
        Ok(dns)
    }

    async fn rotate_locked(
        &self,
        snapshot: &PoolSnapshot,
        vps_id: i32,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let pool = snapshot.pool;

        let from_vps_id = snapshot.current_vps_id;
        let from_ip = match from_vps_id {
            Some(id) => match self.directory.get_machine_ip(id).await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(pool = %pool, vps_id = id, error = %e, "Could not snapshot outgoing machine IP.");
                    None
                }
            },
            None => None,
        };
        let to_ip = self
            .directory
            .get_machine_ip(vps_id)
            .await?
            .ok_or(RotationError::MachineWithoutIp(vps_id))?;

        let dns = self.point_dns(&snapshot.target, &to_ip).await?;

        // Membership may have changed while DNS was being updated.
        let refreshed = self.load(pool).await?;
        let ordered = self.effective_members(&refreshed).await?;
        let current_index = membership::position_of(&ordered, vps_id).unwrap_or(0);

        let rotated_at = Utc::now();
        let txn = self.db.begin().await?;
        persist_selection(&txn, pool, vps_id, current_index, rotated_at).await?;
        let history = rotation_history::ActiveModel {
            pool_kind: Set(pool.kind),
            pool_id: Set(pool.id),
            domain_id: Set(snapshot.domain_id()),
            from_vps_id: Set(from_vps_id),
            from_ip: Set(from_ip.clone()),
            to_vps_id: Set(vps_id),
            to_ip: Set(to_ip.clone()),
            trigger: Set(trigger),
            created_at: Set(rotated_at),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(
            pool = %pool,
            from_vps_id = ?from_vps_id,
            to_vps_id = vps_id,
            to_ip = %to_ip,
            trigger = %trigger,
            "Pool rotated."
        );

        Ok(RotationOutcome {
            pool,
            trigger,
            from_vps_id,
            from_ip,
            to_vps_id: vps_id,
            to_ip,
            current_index,
            history_id: history.id,
            rotated_at,
            dns,
        })
    }
}

/// Writes the new selection under a row lock.
async fn persist_selection(
    txn: &DatabaseTransaction,
    pool: PoolRef,
    vps_id: i32,
    current_index: i32,
    rotated_at: DateTime<Utc>,
) -> Result<(), RotationError> {
    match pool.kind {
        PoolKind::Record => {
            let row = RecordPool::find_by_id(pool.id)
                .lock_exclusive()
                .one(txn)
                .await?
                .ok_or(RotationError::PoolNotFound(pool))?;
            let mut active = row.into_active_model();
            active.current_vps_id = Set(Some(vps_id));
            active.current_index = Set(current_index);
            active.last_rotated_at = Set(Some(rotated_at));
            active.updated_at = Set(rotated_at);
            active.update(txn).await?;
        }
        PoolKind::Wildcard => {
            let row = WildcardPool::find_by_id(pool.id)
                .lock_exclusive()
                .one(txn)
                .await?
                .ok_or(RotationError::PoolNotFound(pool))?;
            let mut active = row.into_active_model();
            active.current_vps_id = Set(Some(vps_id));
            active.current_index = Set(current_index);
            active.last_rotated_at = Set(Some(rotated_at));
            active.updated_at = Set(rotated_at);
            active.update(txn).await?;
        }
    }
    Ok(())
}
