use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A machine group. Pools reference tags to pull in every machine carrying them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub color: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::vps::Entity> for Entity {
    fn to() -> RelationDef {
        super::vps_tag::Relation::Vps.def()
    }
    fn via() -> Option<RelationDef> {
        Some(super::vps_tag::Relation::Tag.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
