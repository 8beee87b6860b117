//! Keeps a DNS record's value converged with the machine the rotation engine picked.
//!
//! The local mirror row is written first with `pending`, then the provider is brought in
//! line: update by the remote id on file, otherwise find the record by name and type,
//! otherwise create it, and if creation loses a race, find it again and update. The row
//! ends in `synced` or `error`. Calls are serialized per record, and the record lock is
//! held across the local write as well as the provider calls.

use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::entities::{dns_record, domain, prelude::*};
use crate::db::enums::{RecordMode, SyncStatus};
use crate::dns::provider::{DnsProvider, ProviderError, ProviderFactory, ProviderRecord, RecordSpec};

pub const WILDCARD_NAME: &str = "*";
pub const APEX_NAME: &str = "@";
const DEFAULT_TTL: i32 = 60;
const MAX_ERROR_LEN: usize = 250;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("DNS record {0} not found")]
    RecordNotFound(i32),
    #[error("Domain {0} not found")]
    DomainNotFound(i32),
    #[error("DNS account {0} not found")]
    AccountNotFound(i32),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("DNS record {record_id} cannot change address family: record {existing_id} already holds that name and type")]
    FamilyConflict { record_id: i32, existing_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub record_id: i32,
    pub name: String,
    pub value: String,
    pub remote_id: Option<String>,
    pub sync_status: SyncStatus,
}

pub struct DnsReconciler {
    db: DatabaseConnection,
    providers: Arc<dyn ProviderFactory>,
    record_locks: DashMap<i32, Arc<Mutex<()>>>,
    domain_locks: DashMap<i32, Arc<Mutex<()>>>,
}

/// `@` is the apex; anything else is a label under the domain.
pub fn qualified_name(name: &str, domain: &str) -> String {
    match name.trim() {
        "" | APEX_NAME => domain.to_string(),
        label => format!("{label}.{domain}"),
    }
}

pub fn record_type_for(ip: &str) -> &'static str {
    if ip.contains(':') { "AAAA" } else { "A" }
}

/// `A` for `AAAA` and back; `None` for anything that is not an address record.
pub fn other_address_type(record_type: &str) -> Option<&'static str> {
    if record_type.eq_ignore_ascii_case("A") {
        Some("AAAA")
    } else if record_type.eq_ignore_ascii_case("AAAA") {
        Some("A")
    } else {
        None
    }
}

fn short_message(err: &impl std::fmt::Display) -> String {
    let message = err.to_string();
    if message.chars().count() <= MAX_ERROR_LEN {
        message
    } else {
        let mut truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
        truncated.push('…');
        truncated
    }
}

fn lock_for(map: &DashMap<i32, Arc<Mutex<()>>>, key: i32) -> Arc<Mutex<()>> {
    map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

impl DnsReconciler {
    pub fn new(db: DatabaseConnection, providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            db,
            providers,
            record_locks: DashMap::new(),
            domain_locks: DashMap::new(),
        }
    }

    /// Points one record at `ip` and converges the provider side.
    ///
    /// An `A` record given an IPv6 address (or `AAAA` given IPv4) switches type. The
    /// old provider record is deleted before the new one is written, so the name never
    /// resolves to two machines.
    pub async fn point_record_at(
        &self,
        record_id: i32,
        ip: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let lock = lock_for(&self.record_locks, record_id);
        let _guard = lock.lock().await;

        let record = DnsRecord::find_by_id(record_id)
            .one(&self.db)
            .await?
            .ok_or(ReconcileError::RecordNotFound(record_id))?;
        let wanted = record_type_for(ip);
        let record = if other_address_type(&record.record_type) == Some(wanted) {
            self.change_family(record, wanted).await?
        } else {
            record
        };
        let record = self.write_pending(record, ip, false).await?;
        self.push_to_provider(record).await
    }

    /// Upserts `*` (and `@` when `include_root`) for a domain and converges both.
    ///
    /// Stops at the first record that fails. Records converged before it keep the new
    /// value and the failing one is left in `error`, so the wildcard and the apex can
    /// disagree until the caller retries. A row of the other address family for the
    /// same name is retired first.
    pub async fn point_wildcard_at(
        &self,
        domain_id: i32,
        include_root: bool,
        ip: &str,
    ) -> Result<Vec<ReconcileOutcome>, ReconcileError> {
        let lock = lock_for(&self.domain_locks, domain_id);
        let _domain_guard = lock.lock().await;

        if Domain::find_by_id(domain_id).one(&self.db).await?.is_none() {
            return Err(ReconcileError::DomainNotFound(domain_id));
        }

        let mut names = vec![WILDCARD_NAME];
        if include_root {
            names.push(APEX_NAME);
        }

        let record_type = record_type_for(ip);
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            self.retire_other_family(domain_id, name, record_type).await?;

            let record_id = match self.find_local(domain_id, name, record_type).await? {
                Some(record) => record.id,
                None => self.insert_local(domain_id, name, record_type, ip).await?.id,
            };
            let record_lock = lock_for(&self.record_locks, record_id);
            let _record_guard = record_lock.lock().await;

            let record = DnsRecord::find_by_id(record_id)
                .one(&self.db)
                .await?
                .ok_or(ReconcileError::RecordNotFound(record_id))?;
            let record = self.write_pending(record, ip, true).await?;
            outcomes.push(self.push_to_provider(record).await?);
        }
        Ok(outcomes)
    }

    async fn write_pending(
        &self,
        record: dns_record::Model,
        ip: &str,
        claim: bool,
    ) -> Result<dns_record::Model, DbErr> {
        let mut active = record.into_active_model();
        active.value = Set(ip.to_string());
        if claim {
            active.mode = Set(RecordMode::Rotating);
        }
        active.sync_status = Set(SyncStatus::Pending);
        active.sync_error = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await
    }

    /// Keyed by (domain, name, type): the wildcard and apex names are fixed, so no
    /// remote search is needed to find the local row.
    async fn find_local(
        &self,
        domain_id: i32,
        name: &str,
        record_type: &str,
    ) -> Result<Option<dns_record::Model>, DbErr> {
        DnsRecord::find()
            .filter(dns_record::Column::DomainId.eq(domain_id))
            .filter(dns_record::Column::Name.eq(name))
            .filter(dns_record::Column::RecordType.eq(record_type))
            .one(&self.db)
            .await
    }

    async fn insert_local(
        &self,
        domain_id: i32,
        name: &str,
        record_type: &str,
        ip: &str,
    ) -> Result<dns_record::Model, DbErr> {
        let now = Utc::now();
        dns_record::ActiveModel {
            domain_id: Set(domain_id),
            name: Set(name.to_string()),
            record_type: Set(record_type.to_string()),
            value: Set(ip.to_string()),
            ttl: Set(DEFAULT_TTL),
            priority: Set(None),
            proxied: Set(false),
            remote_id: Set(None),
            sync_status: Set(SyncStatus::Pending),
            sync_error: Set(None),
            mode: Set(RecordMode::Rotating),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    /// Deletes the rotating row of the other address family for a fixed name, provider
    /// record first. On failure the row stays, in `error`, and is retried next time.
    async fn retire_other_family(
        &self,
        domain_id: i32,
        name: &str,
        record_type: &str,
    ) -> Result<(), ReconcileError> {
        let Some(other) = other_address_type(record_type) else {
            return Ok(());
        };
        let Some(stale) = self.find_local(domain_id, name, other).await? else {
            return Ok(());
        };
        if stale.mode != RecordMode::Rotating {
            return Ok(());
        }

        let lock = lock_for(&self.record_locks, stale.id);
        let _guard = lock.lock().await;
        let Some(stale) = DnsRecord::find_by_id(stale.id).one(&self.db).await? else {
            return Ok(());
        };
        if let Err(e) = self.delete_remote(&stale).await {
            return Err(self.mark_failed(stale, e).await);
        }
        DnsRecord::delete_by_id(stale.id).exec(&self.db).await?;
        self.record_locks.remove(&stale.id);
        info!(
            record_id = stale.id,
            record_name = name,
            record_type = other,
            "Retired record of the other address family."
        );
        Ok(())
    }

    /// Removes the provider record behind `record` and retypes the row. The row's
    /// remote id is cleared so the next push creates the new record.
    async fn change_family(
        &self,
        record: dns_record::Model,
        wanted: &str,
    ) -> Result<dns_record::Model, ReconcileError> {
        let clash = DnsRecord::find()
            .filter(dns_record::Column::DomainId.eq(record.domain_id))
            .filter(dns_record::Column::Name.eq(record.name.clone()))
            .filter(dns_record::Column::RecordType.eq(wanted))
            .filter(dns_record::Column::Id.ne(record.id))
            .one(&self.db)
            .await?;
        if let Some(clash) = clash {
            let e = ReconcileError::FamilyConflict {
                record_id: record.id,
                existing_id: clash.id,
            };
            return Err(self.mark_failed(record, e).await);
        }

        if let Err(e) = self.delete_remote(&record).await {
            return Err(self.mark_failed(record, e).await);
        }

        let record_id = record.id;
        let previous = record.record_type.clone();
        let mut active = record.into_active_model();
        active.record_type = Set(wanted.to_string());
        active.remote_id = Set(None);
        active.updated_at = Set(Utc::now());
        let saved = active.update(&self.db).await?;
        info!(record_id, from = %previous, to = wanted, "DNS record changed address family.");
        Ok(saved)
    }

    /// Deletes the provider record for `record`: by stored id, otherwise every record
    /// matching its name and type. A record already gone counts as deleted.
    async fn delete_remote(&self, record: &dns_record::Model) -> Result<(), ReconcileError> {
        let domain = Domain::find_by_id(record.domain_id)
            .one(&self.db)
            .await?
            .ok_or(ReconcileError::DomainNotFound(record.domain_id))?;
        let Some((provider, zone_id)) = self.remote_target(&domain).await? else {
            return Ok(());
        };

        if let Some(remote_id) = record.remote_id.as_deref().filter(|id| !id.is_empty()) {
            match provider.delete_record(&zone_id, remote_id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!(remote_id, "Stored remote id already gone; searching by name.");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let name = qualified_name(&record.name, &domain.name);
        let matching = provider
            .list_records(&zone_id)
            .await?
            .into_iter()
            .filter(|r| r.matches(&name, &record.record_type));
        for found in matching {
            match provider.delete_record(&zone_id, &found.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn push_to_provider(
        &self,
        record: dns_record::Model,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let domain = Domain::find_by_id(record.domain_id)
            .one(&self.db)
            .await?
            .ok_or(ReconcileError::DomainNotFound(record.domain_id))?;

        let (provider, zone_id) = match self.remote_target(&domain).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!(record_id = record.id, "Domain has no DNS account; record is local-only.");
                return self.finish(record, Ok(None)).await;
            }
            Err(e) => return self.finish(record, Err(e)).await,
        };

        let spec = RecordSpec {
            name: qualified_name(&record.name, &domain.name),
            record_type: record.record_type.clone(),
            content: record.value.clone(),
            ttl: record.ttl,
            priority: record.priority,
            proxied: record.proxied,
        };

        let result = converge(provider.as_ref(), &zone_id, record.remote_id.as_deref(), &spec)
            .await
            .map(|remote| Some(remote.id))
            .map_err(ReconcileError::from);
        self.finish(record, result).await
    }

    /// Provider client and zone id for a domain, `None` when it has no DNS account.
    async fn remote_target(
        &self,
        domain: &domain::Model,
    ) -> Result<Option<(Arc<dyn DnsProvider>, String)>, ReconcileError> {
        let Some(account_id) = domain.dns_account_id else {
            return Ok(None);
        };
        let provider = self.provider_for(account_id).await?;
        let zone_id = self.zone_for(domain, provider.as_ref()).await?;
        Ok(Some((provider, zone_id)))
    }

    async fn provider_for(&self, account_id: i32) -> Result<Arc<dyn DnsProvider>, ReconcileError> {
        let account = DnsAccount::find_by_id(account_id)
            .one(&self.db)
            .await?
            .ok_or(ReconcileError::AccountNotFound(account_id))?;
        Ok(self.providers.for_account(&account).await?)
    }

    async fn zone_for(
        &self,
        domain: &domain::Model,
        provider: &dyn DnsProvider,
    ) -> Result<String, ProviderError> {
        if let Some(zone_id) = domain.zone_id.as_ref().filter(|z| !z.is_empty()) {
            return Ok(zone_id.clone());
        }
        let zone_id = provider.resolve_zone(&domain.name).await?;
        let mut active = domain.clone().into_active_model();
        active.zone_id = Set(Some(zone_id.clone()));
        active.updated_at = Set(Utc::now());
        if let Err(e) = active.update(&self.db).await {
            warn!(domain_id = domain.id, error = %e, "Failed to cache zone id.");
        }
        Ok(zone_id)
    }

    /// Writes the terminal status. `Ok(None)` means local-only.
    async fn finish(
        &self,
        record: dns_record::Model,
        result: Result<Option<String>, ReconcileError>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let record_id = record.id;
        match result {
            Ok(remote_id) => {
                let mut active = record.into_active_model();
                if remote_id.is_some() {
                    active.remote_id = Set(remote_id);
                }
                active.sync_status = Set(SyncStatus::Synced);
                active.sync_error = Set(None);
                active.updated_at = Set(Utc::now());
                let saved = active.update(&self.db).await?;
                info!(record_id, remote_id = ?saved.remote_id, "DNS record synced.");
                Ok(ReconcileOutcome {
                    record_id,
                    name: saved.name,
                    value: saved.value,
                    remote_id: saved.remote_id,
                    sync_status: saved.sync_status,
                })
            }
            Err(e) => Err(self.mark_failed(record, e).await),
        }
    }

    async fn mark_failed(&self, record: dns_record::Model, e: ReconcileError) -> ReconcileError {
        warn!(record_id = record.id, error = %e, "DNS reconciliation failed.");
        let mut active = record.into_active_model();
        active.sync_status = Set(SyncStatus::Error);
        active.sync_error = Set(Some(short_message(&e)));
        active.updated_at = Set(Utc::now());
        match active.update(&self.db).await {
            Ok(_) => e,
            Err(db_err) => db_err.into(),
        }
    }
}

async fn find_remote(
    provider: &dyn DnsProvider,
    zone_id: &str,
    spec: &RecordSpec,
) -> Result<Option<ProviderRecord>, ProviderError> {
    let records = provider.list_records(zone_id).await?;
    Ok(records
        .into_iter()
        .find(|r| r.matches(&spec.name, &spec.record_type)))
}

/// Provider-side convergence. Leaves exactly one record for (name, type) however many
/// earlier attempts failed part way.
async fn converge(
    provider: &dyn DnsProvider,
    zone_id: &str,
    remote_id: Option<&str>,
    spec: &RecordSpec,
) -> Result<ProviderRecord, ProviderError> {
    if let Some(remote_id) = remote_id.filter(|id| !id.is_empty()) {
        match provider.update_record(zone_id, remote_id, spec).await {
            Ok(updated) => return Ok(updated),
            Err(e) => {
                debug!(remote_id, name = %spec.name, error = %e, "Update by stored id failed; searching.");
            }
        }
    }

    if let Some(found) = find_remote(provider, zone_id, spec).await? {
        return provider.update_record(zone_id, &found.id, spec).await;
    }

    match provider.create_record(zone_id, spec).await {
        Ok(created) => Ok(created),
        Err(create_err) => {
            debug!(name = %spec.name, error = %create_err, "Create failed; searching once more.");
            match find_remote(provider, zone_id, spec).await? {
                Some(found) => provider.update_record(zone_id, &found.id, spec).await,
                None => Err(create_err),
            }
        }
    }
}
