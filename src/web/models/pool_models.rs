use serde::{Deserialize, Serialize};

use crate::db::enums::{RotationMode, RotationStrategy};
use crate::passthrough::generator::PassthroughConfig;
use crate::rotation::membership::Candidate;
use crate::rotation::pool::PoolSnapshot;

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberInput {
    pub vps_id: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

/// Rotation settings shared by both pool kinds. Unset fields take defaults on create.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RotationSettings {
    pub target_ip: String,
    pub target_port_tls: Option<i32>,
    pub target_port_http: Option<i32>,
    pub strategy: Option<RotationStrategy>,
    pub rotation_mode: Option<RotationMode>,
    pub interval_minutes: Option<i32>,
    pub scheduled_times: Option<Vec<String>>,
    pub health_check: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordPool {
    pub dns_record_id: i32,
    #[serde(flatten)]
    pub settings: RotationSettings,
    #[serde(default)]
    pub members: Vec<MemberInput>,
    #[serde(default)]
    pub tag_ids: Vec<i32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateWildcardPool {
    pub domain_id: i32,
    #[serde(default)]
    pub include_root: bool,
    #[serde(flatten)]
    pub settings: RotationSettings,
    #[serde(default)]
    pub members: Vec<MemberInput>,
    #[serde(default)]
    pub tag_ids: Vec<i32>,
}

/// Partial update. `members` and `tagIds`, when present, replace the whole list.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePool {
    pub target_ip: Option<String>,
    pub target_port_tls: Option<i32>,
    pub target_port_http: Option<i32>,
    pub strategy: Option<RotationStrategy>,
    pub rotation_mode: Option<RotationMode>,
    pub interval_minutes: Option<i32>,
    pub scheduled_times: Option<Vec<String>>,
    pub health_check: Option<bool>,
    // Wildcard pools only.
    pub include_root: Option<bool>,
    pub members: Option<Vec<MemberInput>>,
    pub tag_ids: Option<Vec<i32>>,
}

/// Query string of a manual rotation.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RotateQuery {
    /// Rotate to this machine instead of the strategy's pick. Must be an effective member.
    pub vps_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PoolDetails {
    #[serde(flatten)]
    pub pool: PoolSnapshot,
    pub effective_members: Vec<Candidate>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PassthroughPreview {
    pub vps_id: i32,
    /// `None` when the machine belongs to no pool.
    pub config: Option<PassthroughConfig>,
    pub rendered: Option<String>,
}
