use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::WildcardMode;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "domains")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    /// Provider-side zone identifier, discovered on first sync.
    pub zone_id: Option<String>,
    /// `None` keeps every record of this domain local-only.
    pub dns_account_id: Option<i32>,
    pub wildcard_mode: WildcardMode,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::dns_account::Entity",
        from = "Column::DnsAccountId",
        to = "super::dns_account::Column::Id",
        on_delete = "SetNull",
        on_update = "Cascade"
    )]
    DnsAccount,
}

impl Related<super::dns_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DnsAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
