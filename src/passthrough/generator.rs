//! Builds the passthrough routing document for one machine from every pool the machine
//! is an effective member of.
//!
//! TLS can be routed per hostname from the handshake. Plain HTTP cannot at layer 4, so
//! it gets a single forward: clean when every pool shares one HTTP target, otherwise a
//! default target plus the list of hostnames that need host routing at the backend.

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::db::services::{find_pools_for_vps, get_tag_ids_for_vps, pool_hostname_source};
use crate::dns::reconciler::qualified_name;
use crate::rotation::pool::{PoolRef, PoolSnapshot, PoolTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SniRoute {
    /// Exact name, `*.domain` suffix match, or the apex.
    pub hostname: String,
    pub upstream: String,
    pub pool: PoolRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTarget {
    pub hostname: String,
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HttpRule {
    /// Every pool shares this target.
    Single { upstream: String },
    /// Targets differ. Everything goes to `upstream`; `l7_required` lists the hostnames
    /// whose own target is elsewhere and which the backend must route by Host header.
    #[serde(rename_all = "camelCase")]
    Default {
        upstream: String,
        l7_required: Vec<HostTarget>,
    },
}

impl HttpRule {
    pub fn upstream(&self) -> &str {
        match self {
            HttpRule::Single { upstream } | HttpRule::Default { upstream, .. } => upstream,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassthroughConfig {
    pub vps_id: i32,
    pub pools: Vec<PoolRef>,
    pub routes: Vec<SniRoute>,
    pub http: HttpRule,
}

/// One pool's contribution to a machine's routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRoutes {
    pub pool: PoolRef,
    pub hostnames: Vec<String>,
    pub tls_upstream: String,
    pub http_upstream: String,
}

/// Hostnames a pool answers for.
pub fn pool_hostnames(pool: &PoolSnapshot, record_name: Option<&str>, domain: &str) -> Vec<String> {
    match pool.target {
        PoolTarget::Record { .. } => record_name
            .map(|name| vec![qualified_name(name, domain)])
            .unwrap_or_default(),
        PoolTarget::Wildcard { include_root, .. } => {
            let mut names = vec![format!("*.{domain}")];
            if include_root {
                names.push(domain.to_string());
            }
            names
        }
    }
}

/// `None` when the machine is in no pool.
pub fn build_config(vps_id: i32, pools: Vec<PoolRoutes>) -> Option<PassthroughConfig> {
    if pools.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let mut routes = Vec::new();
    let mut http_targets: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in &pools {
        for hostname in &entry.hostnames {
            let hostname = hostname.to_ascii_lowercase();
            if !seen.insert(hostname.clone()) {
                warn!(vps_id, hostname = %hostname, pool = %entry.pool, "Hostname already routed by another pool; skipping.");
                continue;
            }
            routes.push(SniRoute {
                hostname: hostname.clone(),
                upstream: entry.tls_upstream.clone(),
                pool: entry.pool,
            });
            http_targets
                .entry(entry.http_upstream.clone())
                .or_default()
                .push(hostname);
        }
    }
    routes.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    let http = if http_targets.len() <= 1 {
        let upstream = http_targets
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| pools[0].http_upstream.clone());
        HttpRule::Single { upstream }
    } else {
        // Most hostnames wins; BTreeMap order breaks ties lexically.
        let mut default: Option<(&String, usize)> = None;
        for (upstream, hostnames) in &http_targets {
            if default.map_or(true, |(_, count)| hostnames.len() > count) {
                default = Some((upstream, hostnames.len()));
            }
        }
        let upstream = default.map(|(u, _)| u.clone()).unwrap_or_default();
        let mut l7_required: Vec<HostTarget> = http_targets
            .iter()
            .filter(|(target, _)| **target != upstream)
            .flat_map(|(target, hostnames)| {
                hostnames.iter().map(move |h| HostTarget {
                    hostname: h.clone(),
                    upstream: target.clone(),
                })
            })
            .collect();
        l7_required.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        HttpRule::Default {
            upstream,
            l7_required,
        }
    };

    Some(PassthroughConfig {
        vps_id,
        pools: pools.iter().map(|p| p.pool).collect(),
        routes,
        http,
    })
}

/// Read-only against pools, members and groups; takes no locks.
#[derive(Clone)]
pub struct PassthroughGenerator {
    db: DatabaseConnection,
}

impl PassthroughGenerator {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn generate(&self, vps_id: i32) -> Result<Option<PassthroughConfig>, DbErr> {
        let tag_ids = get_tag_ids_for_vps(&self.db, vps_id).await?;
        let pools = find_pools_for_vps(&self.db, vps_id, &tag_ids).await?;
        if pools.is_empty() {
            debug!(vps_id, "Machine is in no pool; passthrough config is empty.");
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(pools.len());
        for pool in &pools {
            let Some((record, domain)) = pool_hostname_source(&self.db, pool).await? else {
                warn!(vps_id, pool = %pool.pool, "Pool target no longer exists; skipping.");
                continue;
            };
            let hostnames = pool_hostnames(pool, record.as_ref().map(|r| r.name.as_str()), &domain.name);
            entries.push(PoolRoutes {
                pool: pool.pool,
                hostnames,
                tls_upstream: pool.tls_target(),
                http_upstream: pool.http_target(),
            });
        }
        Ok(build_config(vps_id, entries))
    }
}
