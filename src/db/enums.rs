use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "pool_kind_enum")]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    #[sea_orm(string_value = "record")]
    Record,
    #[sea_orm(string_value = "wildcard")]
    Wildcard,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Record => write!(f, "record"),
            PoolKind::Wildcard => write!(f, "wildcard"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "rotation_strategy_enum")]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[sea_orm(string_value = "round_robin")]
    RoundRobin,
    #[sea_orm(string_value = "random")]
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "rotation_mode_enum")]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[sea_orm(string_value = "interval")]
    Interval,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "rotation_trigger_enum")]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    #[sea_orm(string_value = "initial")]
    Initial,
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "health")]
    Health,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationTrigger::Initial => "initial",
            RotationTrigger::Manual => "manual",
            RotationTrigger::Scheduled => "scheduled",
            RotationTrigger::Health => "health",
        };
        write!(f, "{s}")
    }
}

/// Sync state of a local DNS record against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "sync_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "synced")]
    Synced,
    #[sea_orm(string_value = "error")]
    Error,
}

/// Whether a record follows a record pool or keeps its hand-set value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "record_mode_enum")]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    #[sea_orm(string_value = "static")]
    Static,
    #[sea_orm(string_value = "rotating")]
    Rotating,
}

/// `separate`: subdomains are managed record by record. `rotating`: a wildcard pool owns `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "wildcard_mode_enum")]
#[serde(rename_all = "snake_case")]
pub enum WildcardMode {
    #[sea_orm(string_value = "separate")]
    Separate,
    #[sea_orm(string_value = "rotating")]
    Rotating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "job_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}
