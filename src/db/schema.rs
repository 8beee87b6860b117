//! Creates the tables straight from the entity definitions.
//!
//! Used at start-up when `auto_create_schema` is on, and by the test harnesses, which run
//! the same entities against an in-memory SQLite database.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityName, EntityTrait, Schema};
use tracing::debug;

use crate::db::entities::prelude::*;

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait + Copy,
{
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    debug!(table = %entity.table_name(), "Ensured table exists.");
    Ok(())
}

/// Parents first, so foreign keys resolve on backends that check them at creation time.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Vps).await?;
    create_table(db, &schema, Tag).await?;
    create_table(db, &schema, VpsTag).await?;
    create_table(db, &schema, DnsAccount).await?;
    create_table(db, &schema, Domain).await?;
    create_table(db, &schema, DnsRecord).await?;
    create_table(db, &schema, RecordPool).await?;
    create_table(db, &schema, WildcardPool).await?;
    create_table(db, &schema, PoolMember).await?;
    create_table(db, &schema, PoolTag).await?;
    create_table(db, &schema, RotationHistory).await?;
    create_table(db, &schema, AgentJob).await?;
    Ok(())
}
