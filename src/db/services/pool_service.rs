//! Pool Store: persisted definition of record and wildcard pools and their members.
//!
//! Membership edits are replace-all: every prior member and group row of the pool is
//! deleted and the new set inserted in the same transaction. The rotation state columns
//! (`current_vps_id`, `current_index`, `last_rotated_at`) are only initialised here; the
//! rotation engine owns them afterwards.

use chrono::{NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::Expr,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use tracing::info;

use crate::db::entities::{
    dns_record, domain, pool_member, pool_tag, prelude::*, record_pool, rotation_history, tag,
    vps, wildcard_pool,
};
use crate::db::enums::{PoolKind, RecordMode, RotationMode, RotationStrategy, WildcardMode};
use crate::dns::reconciler::APEX_NAME;
use crate::rotation::pool::{DirectMember, PoolRef, PoolSnapshot, PoolTarget};
use crate::web::models::pool_models::{
    CreateRecordPool, CreateWildcardPool, MemberInput, RotationSettings, UpdatePool,
};

pub const DEFAULT_TLS_PORT: i32 = 443;
pub const DEFAULT_HTTP_PORT: i32 = 80;
pub const DEFAULT_INTERVAL_MINUTES: i32 = 60;
pub const DEFAULT_HISTORY_LIMIT: u64 = 50;
pub const MAX_HISTORY_LIMIT: u64 = 500;

#[derive(Error, Debug)]
pub enum PoolStoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

fn validate_port(field: &str, port: i32) -> Result<(), PoolStoreError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(PoolStoreError::InvalidInput(format!(
            "{field} must be between 1 and 65535, got {port}"
        )))
    }
}

fn validate_target_ip(ip: &str) -> Result<(), PoolStoreError> {
    if ip.trim().parse::<std::net::IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(PoolStoreError::InvalidInput(format!(
            "targetIp must be an IP address, got '{ip}'"
        )))
    }
}

/// `HH:MM` in UTC.
pub fn parse_scheduled_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

fn normalize_scheduled_times(times: Vec<String>) -> Result<Vec<String>, PoolStoreError> {
    let mut parsed = BTreeSet::new();
    for time in &times {
        let t = parse_scheduled_time(time).ok_or_else(|| {
            PoolStoreError::InvalidInput(format!("scheduled time '{time}' is not HH:MM"))
        })?;
        parsed.insert(t);
    }
    Ok(parsed.into_iter().map(|t| t.format("%H:%M").to_string()).collect())
}

/// Resolved settings with defaults applied.
struct PoolSettings {
    target_ip: String,
    target_port_tls: i32,
    target_port_http: i32,
    strategy: RotationStrategy,
    rotation_mode: RotationMode,
    interval_minutes: i32,
    scheduled_times: Vec<String>,
    health_check: bool,
}

impl PoolSettings {
    fn from_input(input: RotationSettings) -> Result<Self, PoolStoreError> {
        let settings = Self {
            target_ip: input.target_ip.trim().to_string(),
            target_port_tls: input.target_port_tls.unwrap_or(DEFAULT_TLS_PORT),
            target_port_http: input.target_port_http.unwrap_or(DEFAULT_HTTP_PORT),
            strategy: input.strategy.unwrap_or(RotationStrategy::RoundRobin),
            rotation_mode: input.rotation_mode.unwrap_or(RotationMode::Interval),
            interval_minutes: input.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES),
            scheduled_times: normalize_scheduled_times(input.scheduled_times.unwrap_or_default())?,
            health_check: input.health_check.unwrap_or(false),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), PoolStoreError> {
        validate_target_ip(&self.target_ip)?;
        validate_port("targetPortTls", self.target_port_tls)?;
        validate_port("targetPortHttp", self.target_port_http)?;
        if self.interval_minutes < 0 {
            return Err(PoolStoreError::InvalidInput(
                "intervalMinutes must not be negative".to_string(),
            ));
        }
        if self.rotation_mode == RotationMode::Scheduled && self.scheduled_times.is_empty() {
            return Err(PoolStoreError::InvalidInput(
                "scheduled rotation needs at least one scheduled time".to_string(),
            ));
        }
        Ok(())
    }

    fn scheduled_times_json(&self) -> serde_json::Value {
        serde_json::json!(self.scheduled_times)
    }
}

/// Deduplicates by machine (first entry wins) and checks that every referenced machine
/// and tag exists.
async fn validate_membership<C: ConnectionTrait>(
    conn: &C,
    members: &[MemberInput],
    tag_ids: &[i32],
) -> Result<(Vec<MemberInput>, Vec<i32>), PoolStoreError> {
    let mut seen = HashSet::new();
    let members: Vec<MemberInput> = members
        .iter()
        .filter(|m| seen.insert(m.vps_id))
        .cloned()
        .collect();
    let tag_ids: Vec<i32> = tag_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

    if !members.is_empty() {
        let wanted: Vec<i32> = members.iter().map(|m| m.vps_id).collect();
        let found: HashSet<i32> = Vps::find()
            .select_only()
            .column(vps::Column::Id)
            .filter(vps::Column::Id.is_in(wanted.clone()))
            .into_tuple::<i32>()
            .all(conn)
            .await?
            .into_iter()
            .collect();
        if let Some(missing) = wanted.iter().find(|id| !found.contains(id)) {
            return Err(PoolStoreError::InvalidInput(format!("machine {missing} does not exist")));
        }
    }

    if !tag_ids.is_empty() {
        let found: HashSet<i32> = Tag::find()
            .select_only()
            .column(tag::Column::Id)
            .filter(tag::Column::Id.is_in(tag_ids.clone()))
            .into_tuple::<i32>()
            .all(conn)
            .await?
            .into_iter()
            .collect();
        if let Some(missing) = tag_ids.iter().find(|id| !found.contains(id)) {
            return Err(PoolStoreError::InvalidInput(format!("group {missing} does not exist")));
        }
    }

    Ok((members, tag_ids))
}

async fn replace_members<C: ConnectionTrait>(
    conn: &C,
    pool: PoolRef,
    members: Vec<MemberInput>,
) -> Result<(), DbErr> {
    PoolMember::delete_many()
        .filter(pool_member::Column::PoolKind.eq(pool.kind))
        .filter(pool_member::Column::PoolId.eq(pool.id))
        .exec(conn)
        .await?;

    if members.is_empty() {
        return Ok(());
    }
    let rows = members.into_iter().map(|m| pool_member::ActiveModel {
        pool_kind: Set(pool.kind),
        pool_id: Set(pool.id),
        vps_id: Set(m.vps_id),
        priority: Set(m.priority),
        is_enabled: Set(m.is_enabled),
        config_applied: Set(false),
        ..Default::default()
    });
    PoolMember::insert_many(rows).exec(conn).await?;
    Ok(())
}

async fn replace_tags<C: ConnectionTrait>(
    conn: &C,
    pool: PoolRef,
    tag_ids: Vec<i32>,
) -> Result<(), DbErr> {
    PoolTag::delete_many()
        .filter(pool_tag::Column::PoolKind.eq(pool.kind))
        .filter(pool_tag::Column::PoolId.eq(pool.id))
        .exec(conn)
        .await?;

    if tag_ids.is_empty() {
        return Ok(());
    }
    let rows = tag_ids.into_iter().map(|tag_id| pool_tag::ActiveModel {
        pool_kind: Set(pool.kind),
        pool_id: Set(pool.id),
        tag_id: Set(tag_id),
        ..Default::default()
    });
    PoolTag::insert_many(rows).exec(conn).await?;
    Ok(())
}

async fn members_and_tags<C: ConnectionTrait>(
    conn: &C,
    pool: PoolRef,
) -> Result<(Vec<DirectMember>, Vec<i32>), DbErr> {
    let members = PoolMember::find()
        .filter(pool_member::Column::PoolKind.eq(pool.kind))
        .filter(pool_member::Column::PoolId.eq(pool.id))
        .order_by_asc(pool_member::Column::Priority)
        .order_by_asc(pool_member::Column::VpsId)
        .all(conn)
        .await?
        .into_iter()
        .map(DirectMember::from)
        .collect();
    let tag_ids = PoolTag::find()
        .select_only()
        .column(pool_tag::Column::TagId)
        .filter(pool_tag::Column::PoolKind.eq(pool.kind))
        .filter(pool_tag::Column::PoolId.eq(pool.id))
        .order_by_asc(pool_tag::Column::TagId)
        .into_tuple::<i32>()
        .all(conn)
        .await?;
    Ok((members, tag_ids))
}

pub async fn load_pool<C: ConnectionTrait>(
    conn: &C,
    pool: PoolRef,
) -> Result<Option<PoolSnapshot>, DbErr> {
    match pool.kind {
        PoolKind::Record => {
            let Some(model) = RecordPool::find_by_id(pool.id).one(conn).await? else {
                return Ok(None);
            };
            let (members, tag_ids) = members_and_tags(conn, pool).await?;
            Ok(Some(PoolSnapshot::from_record_pool(model, members, tag_ids)))
        }
        PoolKind::Wildcard => {
            let Some(model) = WildcardPool::find_by_id(pool.id).one(conn).await? else {
                return Ok(None);
            };
            let (members, tag_ids) = members_and_tags(conn, pool).await?;
            Ok(Some(PoolSnapshot::from_wildcard_pool(model, members, tag_ids)))
        }
    }
}

async fn require_pool<C: ConnectionTrait>(
    conn: &C,
    pool: PoolRef,
) -> Result<PoolSnapshot, PoolStoreError> {
    load_pool(conn, pool)
        .await?
        .ok_or_else(|| PoolStoreError::NotFound(format!("pool {pool}")))
}

pub async fn list_pools(db: &DatabaseConnection, kind: PoolKind) -> Result<Vec<PoolSnapshot>, DbErr> {
    let ids: Vec<i32> = match kind {
        PoolKind::Record => {
            RecordPool::find()
                .select_only()
                .column(record_pool::Column::Id)
                .order_by_asc(record_pool::Column::Id)
                .into_tuple()
                .all(db)
                .await?
        }
        PoolKind::Wildcard => {
            WildcardPool::find()
                .select_only()
                .column(wildcard_pool::Column::Id)
                .order_by_asc(wildcard_pool::Column::Id)
                .into_tuple()
                .all(db)
                .await?
        }
    };

    let mut pools = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(pool) = load_pool(db, PoolRef { kind, id }).await? {
            pools.push(pool);
        }
    }
    Ok(pools)
}

pub async fn list_all_pools(db: &DatabaseConnection) -> Result<Vec<PoolSnapshot>, DbErr> {
    let mut pools = list_pools(db, PoolKind::Record).await?;
    pools.extend(list_pools(db, PoolKind::Wildcard).await?);
    Ok(pools)
}

pub async fn create_record_pool(
    db: &DatabaseConnection,
    input: CreateRecordPool,
) -> Result<PoolSnapshot, PoolStoreError> {
    let settings = PoolSettings::from_input(input.settings)?;

    let txn = db.begin().await?;

    let record = DnsRecord::find_by_id(input.dns_record_id)
        .one(&txn)
        .await?
        .ok_or_else(|| PoolStoreError::NotFound(format!("DNS record {}", input.dns_record_id)))?;

    let existing = RecordPool::find()
        .filter(record_pool::Column::DnsRecordId.eq(record.id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(PoolStoreError::Conflict(format!(
            "DNS record {} already has a pool",
            record.id
        )));
    }

    let (members, tag_ids) = validate_membership(&txn, &input.members, &input.tag_ids).await?;

    let now = Utc::now();
    let saved = record_pool::ActiveModel {
        dns_record_id: Set(record.id),
        target_ip: Set(settings.target_ip.clone()),
        target_port_tls: Set(settings.target_port_tls),
        target_port_http: Set(settings.target_port_http),
        strategy: Set(settings.strategy),
        rotation_mode: Set(settings.rotation_mode),
        interval_minutes: Set(settings.interval_minutes),
        scheduled_times: Set(settings.scheduled_times_json()),
        health_check: Set(settings.health_check),
        current_vps_id: Set(None),
        current_index: Set(0),
        is_paused: Set(false),
        last_rotated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let pool = PoolRef::record(saved.id);
    replace_members(&txn, pool, members).await?;
    replace_tags(&txn, pool, tag_ids).await?;

    let mut record = record.into_active_model();
    record.mode = Set(RecordMode::Rotating);
    record.updated_at = Set(now);
    record.update(&txn).await?;

    let snapshot = require_pool(&txn, pool).await?;
    txn.commit().await?;

    info!(pool = %pool, dns_record_id = input.dns_record_id, "Record pool created.");
    Ok(snapshot)
}

pub async fn create_wildcard_pool(
    db: &DatabaseConnection,
    input: CreateWildcardPool,
) -> Result<PoolSnapshot, PoolStoreError> {
    let settings = PoolSettings::from_input(input.settings)?;

    let txn = db.begin().await?;

    let domain = Domain::find_by_id(input.domain_id)
        .one(&txn)
        .await?
        .ok_or_else(|| PoolStoreError::NotFound(format!("domain {}", input.domain_id)))?;

    let existing = WildcardPool::find()
        .filter(wildcard_pool::Column::DomainId.eq(domain.id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(PoolStoreError::Conflict(format!(
            "domain {} already has a wildcard pool",
            domain.name
        )));
    }

    let (members, tag_ids) = validate_membership(&txn, &input.members, &input.tag_ids).await?;

    let now = Utc::now();
    let saved = wildcard_pool::ActiveModel {
        domain_id: Set(domain.id),
        include_root: Set(input.include_root),
        target_ip: Set(settings.target_ip.clone()),
        target_port_tls: Set(settings.target_port_tls),
        target_port_http: Set(settings.target_port_http),
        strategy: Set(settings.strategy),
        rotation_mode: Set(settings.rotation_mode),
        interval_minutes: Set(settings.interval_minutes),
        scheduled_times: Set(settings.scheduled_times_json()),
        health_check: Set(settings.health_check),
        current_vps_id: Set(None),
        current_index: Set(0),
        is_paused: Set(false),
        last_rotated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let pool = PoolRef::wildcard(saved.id);
    replace_members(&txn, pool, members).await?;
    replace_tags(&txn, pool, tag_ids).await?;

    let domain_name = domain.name.clone();
    let mut domain = domain.into_active_model();
    domain.wildcard_mode = Set(WildcardMode::Rotating);
    domain.updated_at = Set(now);
    domain.update(&txn).await?;

    let snapshot = require_pool(&txn, pool).await?;
    txn.commit().await?;

    info!(pool = %pool, domain = %domain_name, "Wildcard pool created.");
    Ok(snapshot)
}

/// Applies a partial update. Returns the pool as it was before and after.
pub async fn update_pool(
    db: &DatabaseConnection,
    pool: PoolRef,
    input: UpdatePool,
) -> Result<(PoolSnapshot, PoolSnapshot), PoolStoreError> {
    if input.include_root.is_some() && pool.kind == PoolKind::Record {
        return Err(PoolStoreError::InvalidInput(
            "includeRoot only applies to wildcard pools".to_string(),
        ));
    }

    let txn = db.begin().await?;
    let before = require_pool(&txn, pool).await?;

    let scheduled_times = match input.scheduled_times {
        Some(times) => normalize_scheduled_times(times)?,
        None => before.scheduled_times.clone(),
    };
    let settings = PoolSettings {
        target_ip: input
            .target_ip
            .map(|ip| ip.trim().to_string())
            .unwrap_or_else(|| before.target_ip.clone()),
        target_port_tls: input.target_port_tls.unwrap_or(before.target_port_tls),
        target_port_http: input.target_port_http.unwrap_or(before.target_port_http),
        strategy: input.strategy.unwrap_or(before.strategy),
        rotation_mode: input.rotation_mode.unwrap_or(before.rotation_mode),
        interval_minutes: input.interval_minutes.unwrap_or(before.interval_minutes),
        scheduled_times,
        health_check: input.health_check.unwrap_or(before.health_check),
    };
    settings.validate()?;

    let membership = match (&input.members, &input.tag_ids) {
        (None, None) => None,
        (members, tag_ids) => {
            let members = members
                .clone()
                .unwrap_or_else(|| before.members.iter().map(member_input).collect());
            let tag_ids = tag_ids.clone().unwrap_or_else(|| before.tag_ids.clone());
            Some(validate_membership(&txn, &members, &tag_ids).await?)
        }
    };

    let now = Utc::now();
    match pool.kind {
        PoolKind::Record => {
            let active = record_pool::ActiveModel {
                id: Set(pool.id),
                target_ip: Set(settings.target_ip.clone()),
                target_port_tls: Set(settings.target_port_tls),
                target_port_http: Set(settings.target_port_http),
                strategy: Set(settings.strategy),
                rotation_mode: Set(settings.rotation_mode),
                interval_minutes: Set(settings.interval_minutes),
                scheduled_times: Set(settings.scheduled_times_json()),
                health_check: Set(settings.health_check),
                updated_at: Set(now),
                ..Default::default()
            };
            active.update(&txn).await?;
        }
        PoolKind::Wildcard => {
            let mut active = wildcard_pool::ActiveModel {
                id: Set(pool.id),
                target_ip: Set(settings.target_ip.clone()),
                target_port_tls: Set(settings.target_port_tls),
                target_port_http: Set(settings.target_port_http),
                strategy: Set(settings.strategy),
                rotation_mode: Set(settings.rotation_mode),
                interval_minutes: Set(settings.interval_minutes),
                scheduled_times: Set(settings.scheduled_times_json()),
                health_check: Set(settings.health_check),
                updated_at: Set(now),
                ..Default::default()
            };
            if let Some(include_root) = input.include_root {
                active.include_root = Set(include_root);
            }
            active.update(&txn).await?;
        }
    }

    if let Some((members, tag_ids)) = membership {
        replace_members(&txn, pool, members).await?;
        replace_tags(&txn, pool, tag_ids).await?;
    }

    if let PoolTarget::Wildcard {
        domain_id,
        include_root: true,
    } = before.target
    {
        if input.include_root == Some(false) {
            release_apex(&txn, domain_id, now).await?;
        }
    }

    let after = require_pool(&txn, pool).await?;
    txn.commit().await?;

    info!(pool = %pool, "Pool updated.");
    Ok((before, after))
}

/// Hands the apex rows of a domain back to static management once its wildcard pool
/// stops covering the root.
async fn release_apex<C: ConnectionTrait>(
    db: &C,
    domain_id: i32,
    now: chrono::DateTime<Utc>,
) -> Result<(), DbErr> {
    let apex_rows = DnsRecord::find()
        .filter(dns_record::Column::DomainId.eq(domain_id))
        .filter(dns_record::Column::Name.eq(APEX_NAME))
        .filter(dns_record::Column::Mode.eq(RecordMode::Rotating))
        .all(db)
        .await?;
    for row in apex_rows {
        let mut row = row.into_active_model();
        row.mode = Set(RecordMode::Static);
        row.updated_at = Set(now);
        row.update(db).await?;
    }
    Ok(())
}

fn member_input(member: &DirectMember) -> MemberInput {
    MemberInput {
        vps_id: member.vps_id,
        priority: member.priority,
        is_enabled: member.is_enabled,
    }
}

/// Deletes the pool with its members and group references, and hands the record or
/// domain back to static management. Returns the pool as it was.
pub async fn delete_pool(
    db: &DatabaseConnection,
    pool: PoolRef,
) -> Result<PoolSnapshot, PoolStoreError> {
    let txn = db.begin().await?;
    let snapshot = require_pool(&txn, pool).await?;

    replace_members(&txn, pool, Vec::new()).await?;
    replace_tags(&txn, pool, Vec::new()).await?;

    let now = Utc::now();
    match snapshot.target {
        PoolTarget::Record { dns_record_id } => {
            RecordPool::delete_by_id(pool.id).exec(&txn).await?;
            if let Some(record) = DnsRecord::find_by_id(dns_record_id).one(&txn).await? {
                let mut record = record.into_active_model();
                record.mode = Set(RecordMode::Static);
                record.updated_at = Set(now);
                record.update(&txn).await?;
            }
        }
        PoolTarget::Wildcard { domain_id, .. } => {
            WildcardPool::delete_by_id(pool.id).exec(&txn).await?;
            if let Some(domain) = Domain::find_by_id(domain_id).one(&txn).await? {
                let mut domain = domain.into_active_model();
                domain.wildcard_mode = Set(WildcardMode::Separate);
                domain.updated_at = Set(now);
                domain.update(&txn).await?;
            }
        }
    }

    txn.commit().await?;
    info!(pool = %pool, "Pool deleted.");
    Ok(snapshot)
}

pub async fn set_paused(
    db: &DatabaseConnection,
    pool: PoolRef,
    paused: bool,
) -> Result<PoolSnapshot, PoolStoreError> {
    let now = Utc::now();
    let result = match pool.kind {
        PoolKind::Record => {
            RecordPool::update_many()
                .col_expr(record_pool::Column::IsPaused, Expr::value(paused))
                .col_expr(record_pool::Column::UpdatedAt, Expr::value(now))
                .filter(record_pool::Column::Id.eq(pool.id))
                .exec(db)
                .await?
        }
        PoolKind::Wildcard => {
            WildcardPool::update_many()
                .col_expr(wildcard_pool::Column::IsPaused, Expr::value(paused))
                .col_expr(wildcard_pool::Column::UpdatedAt, Expr::value(now))
                .filter(wildcard_pool::Column::Id.eq(pool.id))
                .exec(db)
                .await?
        }
    };
    if result.rows_affected == 0 {
        return Err(PoolStoreError::NotFound(format!("pool {pool}")));
    }
    info!(pool = %pool, paused, "Pool pause flag changed.");
    require_pool(db, pool).await
}

/// Newest first.
pub async fn list_history(
    db: &DatabaseConnection,
    pool: PoolRef,
    limit: Option<u64>,
) -> Result<Vec<rotation_history::Model>, DbErr> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    RotationHistory::find()
        .filter(rotation_history::Column::PoolKind.eq(pool.kind))
        .filter(rotation_history::Column::PoolId.eq(pool.id))
        .order_by_desc(rotation_history::Column::CreatedAt)
        .order_by_desc(rotation_history::Column::Id)
        .limit(limit)
        .all(db)
        .await
}

/// Pools a machine belongs to, either as an enabled direct member or through one of
/// `tag_ids`.
pub async fn find_pools_for_vps(
    db: &DatabaseConnection,
    vps_id: i32,
    tag_ids: &[i32],
) -> Result<Vec<PoolSnapshot>, DbErr> {
    let mut refs: BTreeMap<(i32, i32), PoolRef> = BTreeMap::new();

    let direct = PoolMember::find()
        .filter(pool_member::Column::VpsId.eq(vps_id))
        .filter(pool_member::Column::IsEnabled.eq(true))
        .all(db)
        .await?;
    for member in direct {
        let pool = PoolRef {
            kind: member.pool_kind,
            id: member.pool_id,
        };
        refs.insert((kind_rank(pool.kind), pool.id), pool);
    }

    if !tag_ids.is_empty() {
        let via_groups = PoolTag::find()
            .filter(pool_tag::Column::TagId.is_in(tag_ids.to_vec()))
            .all(db)
            .await?;
        for link in via_groups {
            let pool = PoolRef {
                kind: link.pool_kind,
                id: link.pool_id,
            };
            refs.insert((kind_rank(pool.kind), pool.id), pool);
        }
    }

    let mut pools = Vec::with_capacity(refs.len());
    for pool in refs.into_values() {
        if let Some(snapshot) = load_pool(db, pool).await? {
            pools.push(snapshot);
        }
    }
    Ok(pools)
}

fn kind_rank(kind: PoolKind) -> i32 {
    match kind {
        PoolKind::Record => 0,
        PoolKind::Wildcard => 1,
    }
}

/// Flags the machine's direct member rows of these pools as having had their
/// configuration handed to the job queue.
pub async fn mark_config_applied(
    db: &DatabaseConnection,
    vps_id: i32,
    pools: &[PoolRef],
) -> Result<u64, DbErr> {
    let mut updated = 0;
    for pool in pools {
        let result = PoolMember::update_many()
            .col_expr(pool_member::Column::ConfigApplied, Expr::value(true))
            .filter(pool_member::Column::VpsId.eq(vps_id))
            .filter(pool_member::Column::PoolKind.eq(pool.kind))
            .filter(pool_member::Column::PoolId.eq(pool.id))
            .exec(db)
            .await?;
        updated += result.rows_affected;
    }
    Ok(updated)
}

/// Hostname data the config generator needs for one pool: the record's FQDN, or the
/// wildcard's domain.
pub async fn pool_hostname_source(
    db: &DatabaseConnection,
    pool: &PoolSnapshot,
) -> Result<Option<(Option<dns_record::Model>, domain::Model)>, DbErr> {
    match pool.target {
        PoolTarget::Record { dns_record_id } => {
            let Some(record) = DnsRecord::find_by_id(dns_record_id).one(db).await? else {
                return Ok(None);
            };
            let domain = Domain::find_by_id(record.domain_id).one(db).await?;
            Ok(domain.map(|d| (Some(record), d)))
        }
        PoolTarget::Wildcard { domain_id, .. } => {
            let domain = Domain::find_by_id(domain_id).one(db).await?;
            Ok(domain.map(|d| (None, d)))
        }
    }
}
