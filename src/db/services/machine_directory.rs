//! Read-only views of the machine fleet used by the rotation engine.
//!
//! Both lookups are network calls in a distributed deployment, so every call is bounded by
//! a timeout. The database-backed implementation below reads the `vps` and `vps_tags`
//! tables maintained by the agent connection layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;

use crate::db::entities::{prelude::*, vps, vps_tag};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Database error: {0}")]
    DbErr(#[from] DbErr),
    #[error("Directory lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait MachineDirectory: Send + Sync {
    /// `Ok(None)` when the machine is unknown or has no address on file.
    async fn get_machine_ip(&self, vps_id: i32) -> Result<Option<String>, DirectoryError>;

    async fn get_last_heartbeat(&self, vps_id: i32) -> Result<Option<DateTime<Utc>>, DirectoryError>;

    async fn get_last_heartbeats(
        &self,
        vps_ids: &[i32],
    ) -> Result<HashMap<i32, Option<DateTime<Utc>>>, DirectoryError> {
        let mut heartbeats = HashMap::with_capacity(vps_ids.len());
        for &vps_id in vps_ids {
            heartbeats.insert(vps_id, self.get_last_heartbeat(vps_id).await?);
        }
        Ok(heartbeats)
    }
}

#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Machines currently carrying any of the given tags. Always computed fresh.
    async fn resolve_members(&self, tag_ids: &[i32]) -> Result<BTreeSet<i32>, DirectoryError>;
}

#[derive(Clone)]
pub struct DbMachineDirectory {
    db: DatabaseConnection,
    timeout: Duration,
}

impl DbMachineDirectory {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, DirectoryError>
    where
        F: std::future::Future<Output = Result<T, DbErr>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DirectoryError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl MachineDirectory for DbMachineDirectory {
    async fn get_machine_ip(&self, vps_id: i32) -> Result<Option<String>, DirectoryError> {
        let machine = self.bounded(Vps::find_by_id(vps_id).one(&self.db)).await?;
        Ok(machine
            .and_then(|m| m.ip_address)
            .filter(|ip| !ip.trim().is_empty()))
    }

    async fn get_last_heartbeat(&self, vps_id: i32) -> Result<Option<DateTime<Utc>>, DirectoryError> {
        let machine = self.bounded(Vps::find_by_id(vps_id).one(&self.db)).await?;
        Ok(machine.and_then(|m| m.last_heartbeat_at))
    }

    async fn get_last_heartbeats(
        &self,
        vps_ids: &[i32],
    ) -> Result<HashMap<i32, Option<DateTime<Utc>>>, DirectoryError> {
        if vps_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i32, Option<DateTime<Utc>>)> = self
            .bounded(
                Vps::find()
                    .select_only()
                    .column(vps::Column::Id)
                    .column(vps::Column::LastHeartbeatAt)
                    .filter(vps::Column::Id.is_in(vps_ids.to_vec()))
                    .into_tuple()
                    .all(&self.db),
            )
            .await?;

        let mut heartbeats: HashMap<i32, Option<DateTime<Utc>>> =
            vps_ids.iter().map(|id| (*id, None)).collect();
        heartbeats.extend(rows);
        Ok(heartbeats)
    }
}

#[async_trait]
impl GroupResolver for DbMachineDirectory {
    async fn resolve_members(&self, tag_ids: &[i32]) -> Result<BTreeSet<i32>, DirectoryError> {
        if tag_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let vps_ids: Vec<i32> = self
            .bounded(
                VpsTag::find()
                    .select_only()
                    .column(vps_tag::Column::VpsId)
                    .filter(vps_tag::Column::TagId.is_in(tag_ids.to_vec()))
                    .into_tuple()
                    .all(&self.db),
            )
            .await?;
        Ok(vps_ids.into_iter().collect())
    }
}

/// Tags carried by one machine. Used to find the pools a machine joins through groups.
pub async fn get_tag_ids_for_vps(db: &DatabaseConnection, vps_id: i32) -> Result<Vec<i32>, DbErr> {
    VpsTag::find()
        .select_only()
        .column(vps_tag::Column::TagId)
        .filter(vps_tag::Column::VpsId.eq(vps_id))
        .into_tuple::<i32>()
        .all(db)
        .await
}
