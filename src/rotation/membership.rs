//! Effective membership and next-machine selection.
//!
//! Everything here is pure: the engine gathers direct members, group expansion and
//! heartbeats, and these functions decide. The ordering produced by
//! [`effective_members`] is the one round-robin indices refer to, so it must stay stable
//! across calls for the same inputs.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::db::enums::RotationStrategy;
use crate::rotation::pool::DirectMember;

/// Priority given to machines that only join through a group.
pub const GROUP_MEMBER_PRIORITY: i32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub vps_id: i32,
    pub priority: i32,
    /// `true` when an enabled direct member row exists for this machine.
    pub direct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub candidate: Candidate,
    /// Position of the candidate in the ordering the choice was made from.
    pub index: i32,
}

/// Union of enabled direct members and group-expanded machines, deduplicated by machine,
/// ordered by priority then machine id. Direct priority wins on duplicates.
pub fn effective_members(direct: &[DirectMember], group_vps_ids: &BTreeSet<i32>) -> Vec<Candidate> {
    let mut by_vps: BTreeMap<i32, Candidate> = BTreeMap::new();

    for member in direct.iter().filter(|m| m.is_enabled) {
        by_vps
            .entry(member.vps_id)
            .and_modify(|c| c.priority = c.priority.min(member.priority))
            .or_insert(Candidate {
                vps_id: member.vps_id,
                priority: member.priority,
                direct: true,
            });
    }
    for &vps_id in group_vps_ids {
        by_vps.entry(vps_id).or_insert(Candidate {
            vps_id,
            priority: GROUP_MEMBER_PRIORITY,
            direct: false,
        });
    }

    let mut ordered: Vec<Candidate> = by_vps.into_values().collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.vps_id.cmp(&b.vps_id)));
    ordered
}

pub fn is_fresh(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    match last_heartbeat {
        Some(seen) => now.signed_duration_since(seen) <= window,
        None => false,
    }
}

/// Members with a fresh heartbeat, keeping order. Falls back to the full set when nobody
/// is fresh: some route beats no route.
pub fn filter_healthy(
    ordered: &[Candidate],
    heartbeats: &HashMap<i32, Option<DateTime<Utc>>>,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<Candidate> {
    let healthy: Vec<Candidate> = ordered
        .iter()
        .filter(|c| is_fresh(heartbeats.get(&c.vps_id).copied().flatten(), now, window))
        .cloned()
        .collect();
    if healthy.is_empty() {
        ordered.to_vec()
    } else {
        healthy
    }
}

/// Applies the rotation strategy to an already ordered, non-empty slice.
pub fn pick<R: Rng>(
    strategy: RotationStrategy,
    ordered: &[Candidate],
    current_index: i32,
    rng: &mut R,
) -> Option<Selection> {
    if ordered.is_empty() {
        return None;
    }
    let n = ordered.len() as i64;
    let index = match strategy {
        RotationStrategy::Random => rng.random_range(0..ordered.len()) as i64,
        RotationStrategy::RoundRobin => (current_index as i64 + 1).rem_euclid(n),
    };
    Some(Selection {
        candidate: ordered[index as usize].clone(),
        index: index as i32,
    })
}

/// Maps an index into `full` onto `subset` (an order-preserving filter of it), so that
/// round-robin continues with the next remaining member after the current one.
pub fn rebase_index(full: &[Candidate], subset: &[Candidate], current_index: i32) -> i32 {
    if full.len() == subset.len() {
        return current_index;
    }
    let at_or_before = subset
        .iter()
        .filter(|c| position_of(full, c.vps_id).is_some_and(|p| p <= current_index))
        .count();
    at_or_before as i32 - 1
}

/// Round-robin base for the current ordering: the active machine's position when it is
/// still a member, else the stored index. Edits to membership reorder the set, so the
/// stored index alone can point back at the active machine.
pub fn anchor_index(ordered: &[Candidate], current_vps_id: Option<i32>, stored_index: i32) -> i32 {
    current_vps_id
        .and_then(|vps_id| position_of(ordered, vps_id))
        .unwrap_or(stored_index)
}

pub fn position_of(ordered: &[Candidate], vps_id: i32) -> Option<i32> {
    ordered.iter().position(|c| c.vps_id == vps_id).map(|i| i as i32)
}
