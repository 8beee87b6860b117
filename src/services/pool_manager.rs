//! Pool edits and manual rotations with their follow-up work.
//!
//! The pool-state write is synchronous. Initial selection happens right after it, and
//! fleet-wide config propagation is spawned and not awaited: a create or update reports
//! success once the rows are saved, whatever happens to DNS or deployment afterwards.

use sea_orm::DatabaseConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::enums::{PoolKind, RotationTrigger};
use crate::db::entities::rotation_history;
use crate::db::services::{pool_service, PoolStoreError};
use crate::rotation::membership::Candidate;
use crate::rotation::{PoolRef, PoolSnapshot, RotationEngine, RotationError, RotationOutcome};
use crate::server::deployment_dispatcher::DeploymentDispatcher;
use crate::web::models::pool_models::{CreateRecordPool, CreateWildcardPool, PoolDetails, UpdatePool};

#[derive(Error, Debug)]
pub enum PoolManagerError {
    #[error(transparent)]
    Store(#[from] PoolStoreError),
    #[error(transparent)]
    Rotation(#[from] RotationError),
}

pub struct PoolManager {
    db: DatabaseConnection,
    engine: Arc<RotationEngine>,
    dispatcher: Arc<DeploymentDispatcher>,
}

impl PoolManager {
    pub fn new(
        db: DatabaseConnection,
        engine: Arc<RotationEngine>,
        dispatcher: Arc<DeploymentDispatcher>,
    ) -> Self {
        Self {
            db,
            engine,
            dispatcher,
        }
    }

    pub fn engine(&self) -> &Arc<RotationEngine> {
        &self.engine
    }

    pub async fn details(&self, pool: PoolRef) -> Result<PoolDetails, PoolManagerError> {
        let snapshot = self.engine.load(pool).await?;
        let effective_members = self.engine.effective_members(&snapshot).await?;
        Ok(PoolDetails {
            pool: snapshot,
            effective_members,
        })
    }

    pub async fn list(&self, kind: PoolKind) -> Result<Vec<PoolSnapshot>, PoolManagerError> {
        Ok(pool_service::list_pools(&self.db, kind)
            .await
            .map_err(PoolStoreError::from)?)
    }

    pub async fn create_record_pool(
        &self,
        input: CreateRecordPool,
    ) -> Result<PoolDetails, PoolManagerError> {
        let snapshot = pool_service::create_record_pool(&self.db, input).await?;
        self.after_membership_change(snapshot.pool, BTreeSet::new()).await
    }

    pub async fn create_wildcard_pool(
        &self,
        input: CreateWildcardPool,
    ) -> Result<PoolDetails, PoolManagerError> {
        let snapshot = pool_service::create_wildcard_pool(&self.db, input).await?;
        self.after_membership_change(snapshot.pool, BTreeSet::new()).await
    }

    pub async fn update_pool(
        &self,
        pool: PoolRef,
        input: UpdatePool,
    ) -> Result<PoolDetails, PoolManagerError> {
        let previous = self.machines_of(pool).await;
        let (before, after) = pool_service::update_pool(&self.db, pool, input).await?;
        if before.target != after.target {
            // The set of names (apex or not) changed under an already active machine.
            match self.engine.resync(pool).await {
                Ok(Some(dns)) => info!(pool = %pool, records = dns.len(), "DNS follows updated pool target."),
                Ok(None) => {}
                Err(e) => warn!(pool = %pool, error = %e, "DNS re-point after update failed; will retry on next rotation."),
            }
        }
        self.after_membership_change(pool, previous).await
    }

    /// Reverts the record or domain to static handling and regenerates config for the
    /// machines that served the pool.
    pub async fn delete_pool(&self, pool: PoolRef) -> Result<PoolSnapshot, PoolManagerError> {
        let previous = self.machines_of(pool).await;
        let snapshot = pool_service::delete_pool(&self.db, pool).await?;
        self.engine.forget(pool);
        self.dispatcher.spawn_fleet_sync(previous);
        Ok(snapshot)
    }

    pub async fn set_paused(
        &self,
        pool: PoolRef,
        paused: bool,
    ) -> Result<PoolSnapshot, PoolManagerError> {
        Ok(pool_service::set_paused(&self.db, pool, paused).await?)
    }

    pub async fn history(
        &self,
        pool: PoolRef,
        limit: Option<u64>,
    ) -> Result<Vec<rotation_history::Model>, PoolManagerError> {
        // 404 for an unknown pool rather than an empty list.
        self.engine.load(pool).await?;
        Ok(pool_service::list_history(&self.db, pool, limit)
            .await
            .map_err(PoolStoreError::from)?)
    }

    /// Manual or scheduled rotation followed by fleet propagation.
    pub async fn rotate(
        &self,
        pool: PoolRef,
        target_vps_id: Option<i32>,
        trigger: RotationTrigger,
    ) -> Result<RotationOutcome, RotationError> {
        let outcome = match target_vps_id {
            Some(vps_id) => self.engine.rotate_to(pool, vps_id, trigger).await?,
            None => self.engine.rotate_now(pool, trigger).await?,
        };
        self.propagate(pool).await;
        Ok(outcome)
    }

    /// Health re-selection followed by fleet propagation when it rotated.
    pub async fn check_health(&self, pool: PoolRef) -> Result<Option<RotationOutcome>, RotationError> {
        let outcome = self.engine.check_health(pool).await?;
        if outcome.is_some() {
            self.propagate(pool).await;
        }
        Ok(outcome)
    }

    async fn propagate(&self, pool: PoolRef) {
        let machines = self.machines_of(pool).await;
        self.dispatcher.spawn_fleet_sync(machines);
    }

    /// Effective members, or empty when they cannot be resolved. Only used to pick
    /// machines for regeneration, so a lookup failure is logged and not fatal.
    async fn machines_of(&self, pool: PoolRef) -> BTreeSet<i32> {
        let members = match self.engine.load(pool).await {
            Ok(snapshot) => self.engine.effective_members(&snapshot).await,
            Err(e) => Err(e),
        };
        match members {
            Ok(members) => members.iter().map(|c: &Candidate| c.vps_id).collect(),
            Err(e) => {
                warn!(pool = %pool, error = %e, "Could not resolve pool machines for propagation.");
                BTreeSet::new()
            }
        }
    }

    async fn after_membership_change(
        &self,
        pool: PoolRef,
        previous: BTreeSet<i32>,
    ) -> Result<PoolDetails, PoolManagerError> {
        match self.engine.ensure_initial(pool).await {
            Ok(Some(outcome)) => {
                info!(pool = %pool, vps_id = outcome.to_vps_id, "Initial machine selected.");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(pool = %pool, error = %e, "Initial selection failed; will retry on next rotation.");
            }
        }

        let details = self.details(pool).await?;
        let mut affected = previous;
        affected.extend(details.effective_members.iter().map(|c| c.vps_id));
        self.dispatcher.spawn_fleet_sync(affected);
        Ok(details)
    }
}
