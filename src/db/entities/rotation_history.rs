use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{PoolKind, RotationTrigger};

/// Append-only audit row, written once per successful rotation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rotation_history")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub pool_kind: PoolKind,
    #[sea_orm(indexed)]
    pub pool_id: i32,
    pub domain_id: Option<i32>,
    pub from_vps_id: Option<i32>,
    pub from_ip: Option<String>,
    pub to_vps_id: i32,
    pub to_ip: String,
    pub trigger: RotationTrigger,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
