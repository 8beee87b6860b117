use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{pool_member, record_pool, wildcard_pool};
use crate::db::enums::{PoolKind, RotationMode, RotationStrategy};

/// Identifies one pool across both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRef {
    pub kind: PoolKind,
    pub id: i32,
}

impl PoolRef {
    pub fn record(id: i32) -> Self {
        Self { kind: PoolKind::Record, id }
    }

    pub fn wildcard(id: i32) -> Self {
        Self { kind: PoolKind::Wildcard, id }
    }
}

impl std::fmt::Display for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// What a pool points at DNS-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PoolTarget {
    Record { dns_record_id: i32 },
    Wildcard { domain_id: i32, include_root: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMember {
    pub vps_id: i32,
    pub priority: i32,
    pub is_enabled: bool,
    pub config_applied: bool,
}

impl From<pool_member::Model> for DirectMember {
    fn from(m: pool_member::Model) -> Self {
        Self {
            vps_id: m.vps_id,
            priority: m.priority,
            is_enabled: m.is_enabled,
            config_applied: m.config_applied,
        }
    }
}

/// Persisted definition and live rotation state of a pool, variant-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub pool: PoolRef,
    pub target: PoolTarget,
    pub target_ip: String,
    pub target_port_tls: i32,
    pub target_port_http: i32,
    pub strategy: RotationStrategy,
    pub rotation_mode: RotationMode,
    pub interval_minutes: i32,
    pub scheduled_times: Vec<String>,
    pub health_check: bool,
    pub current_vps_id: Option<i32>,
    pub current_index: i32,
    pub is_paused: bool,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub members: Vec<DirectMember>,
    pub tag_ids: Vec<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn scheduled_times_from_json(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl PoolSnapshot {
    pub fn from_record_pool(
        model: record_pool::Model,
        members: Vec<DirectMember>,
        tag_ids: Vec<i32>,
    ) -> Self {
        Self {
            pool: PoolRef::record(model.id),
            target: PoolTarget::Record {
                dns_record_id: model.dns_record_id,
            },
            target_ip: model.target_ip,
            target_port_tls: model.target_port_tls,
            target_port_http: model.target_port_http,
            strategy: model.strategy,
            rotation_mode: model.rotation_mode,
            interval_minutes: model.interval_minutes,
            scheduled_times: scheduled_times_from_json(&model.scheduled_times),
            health_check: model.health_check,
            current_vps_id: model.current_vps_id,
            current_index: model.current_index,
            is_paused: model.is_paused,
            last_rotated_at: model.last_rotated_at,
            members,
            tag_ids,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub fn from_wildcard_pool(
        model: wildcard_pool::Model,
        members: Vec<DirectMember>,
        tag_ids: Vec<i32>,
    ) -> Self {
        Self {
            pool: PoolRef::wildcard(model.id),
            target: PoolTarget::Wildcard {
                domain_id: model.domain_id,
                include_root: model.include_root,
            },
            target_ip: model.target_ip,
            target_port_tls: model.target_port_tls,
            target_port_http: model.target_port_http,
            strategy: model.strategy,
            rotation_mode: model.rotation_mode,
            interval_minutes: model.interval_minutes,
            scheduled_times: scheduled_times_from_json(&model.scheduled_times),
            health_check: model.health_check,
            current_vps_id: model.current_vps_id,
            current_index: model.current_index,
            is_paused: model.is_paused,
            last_rotated_at: model.last_rotated_at,
            members,
            tag_ids,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub fn domain_id(&self) -> Option<i32> {
        match self.target {
            PoolTarget::Wildcard { domain_id, .. } => Some(domain_id),
            PoolTarget::Record { .. } => None,
        }
    }

    pub fn tls_target(&self) -> String {
        socket_target(&self.target_ip, self.target_port_tls)
    }

    pub fn http_target(&self) -> String {
        socket_target(&self.target_ip, self.target_port_http)
    }
}

/// `ip:port`, bracketing IPv6 literals.
pub fn socket_target(ip: &str, port: i32) -> String {
    if ip.contains(':') && !ip.starts_with('[') {
        format!("[{ip}]:{port}")
    } else {
        format!("{ip}:{port}")
    }
}
