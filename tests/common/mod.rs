#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use nodenexus_rotator::db::entities::{dns_account, dns_record, domain, tag, vps, vps_tag};
use nodenexus_rotator::db::enums::{RecordMode, SyncStatus, WildcardMode};
use nodenexus_rotator::db::schema::create_tables;
use nodenexus_rotator::db::services::{DbJobQueue, DbMachineDirectory};
use nodenexus_rotator::dns::provider::{
    normalize_name, DnsProvider, ProviderError, ProviderFactory, ProviderRecord, RecordSpec,
};
use nodenexus_rotator::dns::DnsReconciler;
use nodenexus_rotator::passthrough::PassthroughGenerator;
use nodenexus_rotator::rotation::RotationEngine;
use nodenexus_rotator::server::deployment_dispatcher::{DeploySettings, DeploymentDispatcher};
use nodenexus_rotator::services::pool_manager::PoolManager;

pub const ZONE_ID: &str = "zone-1";

pub async fn memory_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect sqlite");
    create_tables(&db).await.expect("create tables");
    db
}

/// In-memory stand-in for a DNS provider account.
#[derive(Default)]
pub struct MemoryProvider {
    records: Mutex<Vec<ProviderRecord>>,
    next_id: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub lists: AtomicUsize,
    pub deletes: AtomicUsize,
    fail_with: Mutex<Option<ProviderError>>,
    /// Fails only writes to this fully qualified name.
    fail_writes_to: Mutex<Option<(String, ProviderError)>>,
    /// Simulates a concurrent writer: the next create stores the record and still
    /// reports a conflict.
    lose_next_create_race: Mutex<bool>,
    gate: Mutex<Option<Gate>>,
}

#[derive(Clone)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<ProviderRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn records_named(&self, name: &str, record_type: &str) -> Vec<ProviderRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.matches(name, record_type))
            .collect()
    }

    pub fn seed(&self, name: &str, record_type: &str, content: &str) -> String {
        let id = self.fresh_id();
        self.records.lock().unwrap().push(ProviderRecord {
            id: id.clone(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl: 60,
            priority: None,
            proxied: false,
        });
        id
    }

    pub fn fail_with(&self, error: Option<ProviderError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    pub fn fail_writes_to(&self, name: Option<(&str, ProviderError)>) {
        *self.fail_writes_to.lock().unwrap() = name.map(|(n, e)| (n.to_string(), e));
    }

    pub fn lose_next_create_race(&self) {
        *self.lose_next_create_race.lock().unwrap() = true;
    }

    /// Makes the next write call park until `release` is notified.
    pub fn install_gate(&self) -> Gate {
        let gate = Gate {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn fresh_id(&self) -> String {
        format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_failure(&self) -> Result<(), ProviderError> {
        match self.fail_with.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_write_failure(&self, name: &str) -> Result<(), ProviderError> {
        match self.fail_writes_to.lock().unwrap().clone() {
            Some((target, e)) if normalize_name(&target) == normalize_name(name) => Err(e),
            _ => Ok(()),
        }
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    fn to_record(id: String, spec: &RecordSpec) -> ProviderRecord {
        ProviderRecord {
            id,
            name: spec.name.clone(),
            record_type: spec.record_type.clone(),
            content: spec.content.clone(),
            ttl: spec.ttl,
            priority: spec.priority,
            proxied: spec.proxied,
        }
    }
}

#[async_trait]
impl DnsProvider for MemoryProvider {
    async fn resolve_zone(&self, _domain: &str) -> Result<String, ProviderError> {
        self.check_failure()?;
        Ok(ZONE_ID.to_string())
    }

    async fn list_records(&self, _zone_id: &str) -> Result<Vec<ProviderRecord>, ProviderError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.records())
    }

    async fn create_record(
        &self,
        _zone_id: &str,
        spec: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError> {
        self.pass_gate().await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.check_write_failure(&spec.name)?;

        let record = Self::to_record(self.fresh_id(), spec);
        let lost_race = std::mem::take(&mut *self.lose_next_create_race.lock().unwrap());
        if lost_race {
            self.records.lock().unwrap().push(record);
            return Err(ProviderError::AlreadyExists(spec.name.clone()));
        }

        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.matches(&spec.name, &spec.record_type)) {
            return Err(ProviderError::AlreadyExists(spec.name.clone()));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        _zone_id: &str,
        remote_id: &str,
        spec: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError> {
        self.pass_gate().await;
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.check_write_failure(&spec.name)?;

        let mut records = self.records.lock().unwrap();
        let Some(existing) = records.iter_mut().find(|r| r.id == remote_id) else {
            return Err(ProviderError::NotFound(remote_id.to_string()));
        };
        *existing = Self::to_record(remote_id.to_string(), spec);
        Ok(existing.clone())
    }

    async fn delete_record(&self, _zone_id: &str, remote_id: &str) -> Result<(), ProviderError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != remote_id);
        if records.len() == before {
            return Err(ProviderError::NotFound(remote_id.to_string()));
        }
        Ok(())
    }
}

/// Hands every account the same provider.
pub struct StaticFactory(pub Arc<MemoryProvider>);

#[async_trait]
impl ProviderFactory for StaticFactory {
    async fn for_account(
        &self,
        _account: &dns_account::Model,
    ) -> Result<Arc<dyn DnsProvider>, ProviderError> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub db: DatabaseConnection,
    pub provider: Arc<MemoryProvider>,
    pub reconciler: Arc<DnsReconciler>,
    pub engine: Arc<RotationEngine>,
    pub dispatcher: Arc<DeploymentDispatcher>,
    pub manager: Arc<PoolManager>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = memory_db().await;
        let provider = MemoryProvider::new();
        let reconciler = Arc::new(DnsReconciler::new(
            db.clone(),
            Arc::new(StaticFactory(provider.clone())),
        ));
        let directory = Arc::new(DbMachineDirectory::new(db.clone(), Duration::from_secs(5)));
        let engine = Arc::new(RotationEngine::new(
            db.clone(),
            directory.clone(),
            directory,
            reconciler.clone(),
            Duration::from_secs(300),
        ));
        let dispatcher = Arc::new(DeploymentDispatcher::new(
            db.clone(),
            PassthroughGenerator::new(db.clone()),
            Arc::new(DbJobQueue::new(db.clone())),
            DeploySettings {
                wait_cap: Duration::from_secs(2),
                poll_interval: Duration::from_millis(20),
                ..DeploySettings::default()
            },
        ));
        let manager = Arc::new(PoolManager::new(
            db.clone(),
            engine.clone(),
            dispatcher.clone(),
        ));
        Self {
            db,
            provider,
            reconciler,
            engine,
            dispatcher,
            manager,
        }
    }
}

pub async fn seed_vps(
    db: &DatabaseConnection,
    name: &str,
    ip: Option<&str>,
    last_heartbeat_at: Option<DateTime<Utc>>,
) -> i32 {
    let now = Utc::now();
    vps::ActiveModel {
        name: Set(name.to_string()),
        ip_address: Set(ip.map(str::to_string)),
        status: Set("online".to_string()),
        last_heartbeat_at: Set(last_heartbeat_at),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert vps")
    .id
}

pub async fn seed_tag(db: &DatabaseConnection, name: &str) -> i32 {
    let now = Utc::now();
    tag::ActiveModel {
        name: Set(name.to_string()),
        color: Set("#3366ff".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert tag")
    .id
}

pub async fn tag_vps(db: &DatabaseConnection, vps_id: i32, tag_id: i32) {
    vps_tag::ActiveModel {
        vps_id: Set(vps_id),
        tag_id: Set(tag_id),
    }
    .insert(db)
    .await
    .expect("insert vps tag");
}

pub async fn seed_account(db: &DatabaseConnection) -> i32 {
    dns_account::ActiveModel {
        name: Set("primary".to_string()),
        provider: Set("memory".to_string()),
        encrypted_credentials: Set(String::new()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert account")
    .id
}

pub async fn seed_domain(db: &DatabaseConnection, name: &str, account_id: Option<i32>) -> i32 {
    let now = Utc::now();
    domain::ActiveModel {
        name: Set(name.to_string()),
        zone_id: Set(None),
        dns_account_id: Set(account_id),
        wildcard_mode: Set(WildcardMode::Separate),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert domain")
    .id
}

pub async fn seed_record(db: &DatabaseConnection, domain_id: i32, name: &str, value: &str) -> i32 {
    let now = Utc::now();
    dns_record::ActiveModel {
        domain_id: Set(domain_id),
        name: Set(name.to_string()),
        record_type: Set("A".to_string()),
        value: Set(value.to_string()),
        ttl: Set(60),
        priority: Set(None),
        proxied: Set(false),
        remote_id: Set(None),
        sync_status: Set(SyncStatus::Synced),
        sync_error: Set(None),
        mode: Set(RecordMode::Static),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert record")
    .id
}
