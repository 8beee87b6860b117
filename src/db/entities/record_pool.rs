use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{RotationMode, RotationStrategy};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "record_pools")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub dns_record_id: i32,
    pub target_ip: String,
    pub target_port_tls: i32,
    pub target_port_http: i32,
    pub strategy: RotationStrategy,
    pub rotation_mode: RotationMode,
    pub interval_minutes: i32,
    /// JSON array of `HH:MM` strings (UTC).
    pub scheduled_times: Json,
    pub health_check: bool,
    pub current_vps_id: Option<i32>,
    pub current_index: i32,
    pub is_paused: bool,
    pub last_rotated_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::dns_record::Entity",
        from = "Column::DnsRecordId",
        to = "super::dns_record::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    DnsRecord,
}

impl Related<super::dns_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DnsRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
