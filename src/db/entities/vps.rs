use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vps")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub ip_address: Option<String>,
    pub status: String,
    // Written by the agent heartbeat path; read here for health filtering.
    pub last_heartbeat_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::tag::Entity> for Entity {
    fn to() -> RelationDef {
        super::vps_tag::Relation::Tag.def()
    }
    fn via() -> Option<RelationDef> {
        Some(super::vps_tag::Relation::Vps.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
