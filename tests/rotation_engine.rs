mod common;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::collections::BTreeSet;

use common::{seed_account, seed_domain, seed_record, seed_tag, seed_vps, tag_vps, Harness};
use nodenexus_rotator::db::entities::{dns_record, prelude::*, vps, vps_tag};
use nodenexus_rotator::db::enums::{RotationTrigger, SyncStatus};
use nodenexus_rotator::db::services::pool_service;
use nodenexus_rotator::dns::{ProviderError, ReconcileError};
use nodenexus_rotator::rotation::{PoolRef, RotationError};
use nodenexus_rotator::web::models::pool_models::{
    CreateRecordPool, CreateWildcardPool, MemberInput, RotationSettings, UpdatePool,
};

struct Fixture {
    h: Harness,
    domain_id: i32,
    record_id: i32,
}

async fn fixture() -> Fixture {
    let h = Harness::new().await;
    let account = seed_account(&h.db).await;
    let domain_id = seed_domain(&h.db, "example.com", Some(account)).await;
    let record_id = seed_record(&h.db, domain_id, "app", "192.0.2.1").await;
    Fixture {
        h,
        domain_id,
        record_id,
    }
}

fn members(pairs: &[(i32, i32)]) -> Vec<MemberInput> {
    pairs
        .iter()
        .map(|&(vps_id, priority)| MemberInput {
            vps_id,
            priority,
            is_enabled: true,
        })
        .collect()
}

async fn record_pool(f: &Fixture, direct: &[(i32, i32)], tag_ids: Vec<i32>, health_check: bool) -> PoolRef {
    let snapshot = pool_service::create_record_pool(
        &f.h.db,
        CreateRecordPool {
            dns_record_id: f.record_id,
            settings: RotationSettings {
                target_ip: "10.0.0.5".to_string(),
                health_check: Some(health_check),
                ..Default::default()
            },
            members: members(direct),
            tag_ids,
        },
    )
    .await
    .expect("create pool");
    snapshot.pool
}

async fn wildcard_pool(f: &Fixture, direct: &[(i32, i32)], include_root: bool) -> PoolRef {
    let snapshot = pool_service::create_wildcard_pool(
        &f.h.db,
        CreateWildcardPool {
            domain_id: f.domain_id,
            include_root,
            settings: RotationSettings {
                target_ip: "10.0.0.5".to_string(),
                ..Default::default()
            },
            members: members(direct),
            tag_ids: Vec::new(),
        },
    )
    .await
    .expect("create wildcard pool");
    snapshot.pool
}

async fn domain_rows(f: &Fixture) -> Vec<dns_record::Model> {
    DnsRecord::find()
        .filter(dns_record::Column::DomainId.eq(f.domain_id))
        .filter(dns_record::Column::Id.ne(f.record_id))
        .all(&f.h.db)
        .await
        .unwrap()
}

async fn set_heartbeat(f: &Fixture, vps_id: i32, age: Option<ChronoDuration>) {
    vps::ActiveModel {
        id: Set(vps_id),
        last_heartbeat_at: Set(age.map(|a| Utc::now() - a)),
        ..Default::default()
    }
    .update(&f.h.db)
    .await
    .expect("update heartbeat");
}

#[tokio::test]
async fn manual_rotation_moves_from_first_to_second_member() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], false).await;

    let initial = f.h.engine.ensure_initial(pool).await.unwrap().expect("initial rotation");
    assert_eq!(initial.to_vps_id, a);
    assert_eq!(initial.current_index, 0);
    assert_eq!(initial.trigger, RotationTrigger::Initial);

    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.from_vps_id, Some(a));
    assert_eq!(outcome.from_ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(outcome.to_vps_id, b);
    assert_eq!(outcome.current_index, 1);

    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, Some(b));
    assert_eq!(snapshot.current_index, 1);
    assert!(snapshot.last_rotated_at.is_some());

    let history = pool_service::list_history(&f.h.db, pool, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from_vps_id, Some(a));
    assert_eq!(history[0].to_vps_id, b);
    assert_eq!(history[0].to_ip, "10.0.0.2");
    assert_eq!(history[0].trigger, RotationTrigger::Manual);
    assert_eq!(history[1].trigger, RotationTrigger::Initial);

    let remote = f.h.provider.records_named("app.example.com", "A");
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].content, "10.0.0.2");

    let local = DnsRecord::find_by_id(f.record_id).one(&f.h.db).await.unwrap().unwrap();
    assert_eq!(local.value, "10.0.0.2");
    assert_eq!(local.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn round_robin_visits_every_member_once_per_cycle() {
    let f = fixture().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(seed_vps(&f.h.db, &format!("m{i}"), Some(&format!("10.0.1.{}", i + 1)), None).await);
    }
    let direct: Vec<(i32, i32)> = ids.iter().enumerate().map(|(i, id)| (*id, i as i32)).collect();
    let pool = record_pool(&f, &direct, vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    let mut visited = Vec::new();
    for _ in 0..ids.len() {
        let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Scheduled).await.unwrap();
        visited.push(outcome.to_vps_id);
    }
    assert_eq!(visited, vec![ids[1], ids[2], ids[3], ids[0]]);
}

#[tokio::test]
async fn empty_pool_reports_no_candidates_and_keeps_state() {
    let f = fixture().await;
    let pool = record_pool(&f, &[], vec![], false).await;

    let err = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, RotationError::NoCandidates(p) if p == pool));

    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, None);
    assert!(snapshot.last_rotated_at.is_none());
    assert!(pool_service::list_history(&f.h.db, pool, None).await.unwrap().is_empty());
    assert!(f.h.engine.ensure_initial(pool).await.unwrap().is_none());
}

#[tokio::test]
async fn dns_failure_aborts_before_pool_state_changes() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    f.h.provider.fail_with(Some(ProviderError::Api {
        status: 500,
        message: "upstream unavailable".to_string(),
    }));
    let err = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap_err();
    assert!(matches!(
        err,
        RotationError::Reconciliation(ReconcileError::Provider(ProviderError::Api { status: 500, .. }))
    ));

    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, Some(a));
    assert_eq!(snapshot.current_index, 0);
    assert_eq!(pool_service::list_history(&f.h.db, pool, None).await.unwrap().len(), 1);

    let local = DnsRecord::find_by_id(f.record_id).one(&f.h.db).await.unwrap().unwrap();
    assert_eq!(local.sync_status, SyncStatus::Error);
    assert!(local.sync_error.unwrap().contains("upstream unavailable"));
}

#[tokio::test]
async fn machine_without_address_is_rejected() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", None, None).await;
    let pool = record_pool(&f, &[(a, 0)], vec![], false).await;

    let err = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, RotationError::MachineWithoutIp(id) if id == a));
    assert_eq!(f.h.engine.load(pool).await.unwrap().current_vps_id, None);
    assert!(f.h.provider.records().is_empty());
}

#[tokio::test]
async fn rotate_to_requires_an_effective_member() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let outsider = seed_vps(&f.h.db, "outsider", Some("10.0.0.9"), None).await;
    let pool = record_pool(&f, &[(a, 0)], vec![], false).await;

    let err = f
        .h
        .engine
        .rotate_to(pool, outsider, RotationTrigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::NotAMember(id, p) if id == outsider && p == pool));

    let outcome = f.h.engine.rotate_to(pool, a, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.to_vps_id, a);
}

#[tokio::test]
async fn unknown_pool_is_not_found() {
    let f = fixture().await;
    let err = f
        .h
        .engine
        .rotate_now(PoolRef::record(999), RotationTrigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::PoolNotFound(_)));
}

#[tokio::test]
async fn health_filter_skips_stale_members() {
    let f = fixture().await;
    let fresh = Some(ChronoDuration::seconds(10));
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let c = seed_vps(&f.h.db, "c", Some("10.0.0.3"), None).await;
    set_heartbeat(&f, a, fresh).await;
    set_heartbeat(&f, b, Some(ChronoDuration::hours(1))).await;
    set_heartbeat(&f, c, fresh).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1), (c, 2)], vec![], true).await;

    f.h.engine.ensure_initial(pool).await.unwrap();
    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Scheduled).await.unwrap();
    assert_eq!(outcome.to_vps_id, c);
    // Index refers to the full ordering, not the filtered one.
    assert_eq!(outcome.current_index, 2);

    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Scheduled).await.unwrap();
    assert_eq!(outcome.to_vps_id, a);
}

#[tokio::test]
async fn everyone_stale_still_selects_a_member() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    set_heartbeat(&f, b, Some(ChronoDuration::hours(3))).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], true).await;

    let outcome = f.h.engine.ensure_initial(pool).await.unwrap().expect("initial rotation");
    assert_eq!(outcome.to_vps_id, a);
    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.to_vps_id, b);
}

#[tokio::test]
async fn health_check_replaces_a_stale_active_machine() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    set_heartbeat(&f, a, Some(ChronoDuration::seconds(5))).await;
    set_heartbeat(&f, b, Some(ChronoDuration::seconds(5))).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], true).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    assert!(f.h.engine.check_health(pool).await.unwrap().is_none());

    set_heartbeat(&f, a, Some(ChronoDuration::minutes(30))).await;
    let outcome = f.h.engine.check_health(pool).await.unwrap().expect("health rotation");
    assert_eq!(outcome.from_vps_id, Some(a));
    assert_eq!(outcome.to_vps_id, b);
    assert_eq!(outcome.trigger, RotationTrigger::Health);

    // Nobody fresh to move to: stay put.
    set_heartbeat(&f, b, None).await;
    assert!(f.h.engine.check_health(pool).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_rotations_of_one_pool_are_serialized() {
    let f = fixture().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(seed_vps(&f.h.db, &format!("m{i}"), Some(&format!("10.0.2.{}", i + 1)), None).await);
    }
    let direct: Vec<(i32, i32)> = ids.iter().enumerate().map(|(i, id)| (*id, i as i32)).collect();
    let pool = record_pool(&f, &direct, vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    let rotations = (0..4).map(|_| {
        let engine = f.h.engine.clone();
        tokio::spawn(async move { engine.rotate_now(pool, RotationTrigger::Manual).await })
    });
    let outcomes: Vec<_> = join_all(rotations)
        .await
        .into_iter()
        .map(|joined| joined.expect("task").expect("rotation"))
        .collect();

    let targets: BTreeSet<i32> = outcomes.iter().map(|o| o.to_vps_id).collect();
    assert_eq!(targets.len(), 4);

    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, Some(ids[0]));
    assert_eq!(snapshot.current_index, 0);
    assert_eq!(pool_service::list_history(&f.h.db, pool, None).await.unwrap().len(), 5);
}

#[tokio::test]
async fn member_removed_mid_flight_leaves_no_candidates() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let pool = record_pool(&f, &[(a, 0)], vec![], false).await;

    let gate = f.h.provider.install_gate();
    let engine = f.h.engine.clone();
    let rotation = tokio::spawn(async move { engine.rotate_now(pool, RotationTrigger::Manual).await });

    gate.entered.notified().await;
    pool_service::update_pool(
        &f.h.db,
        pool,
        UpdatePool {
            members: Some(Vec::new()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    gate.release.notify_one();

    let outcome = rotation.await.unwrap().unwrap();
    assert_eq!(outcome.to_vps_id, a);
    assert_eq!(outcome.current_index, 0);
    assert_eq!(f.h.provider.records_named("app.example.com", "A")[0].content, "10.0.0.1");

    let snapshot = f.h.engine.load(pool).await.unwrap();
    let err = f.h.engine.select_next(&snapshot).await.unwrap_err();
    assert!(matches!(err, RotationError::NoCandidates(_)));
}

#[tokio::test]
async fn membership_is_union_of_direct_and_group_members() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let c = seed_vps(&f.h.db, "c", Some("10.0.0.3"), None).await;
    let d = seed_vps(&f.h.db, "d", Some("10.0.0.4"), None).await;
    let edge = seed_tag(&f.h.db, "edge").await;
    tag_vps(&f.h.db, c, edge).await;
    tag_vps(&f.h.db, d, edge).await;

    let pool = record_pool(&f, &[(a, 0), (c, 5)], vec![edge], false).await;
    let snapshot = f.h.engine.load(pool).await.unwrap();
    let ordered = f.h.engine.effective_members(&snapshot).await.unwrap();
    let ids: Vec<i32> = ordered.iter().map(|m| m.vps_id).collect();
    assert_eq!(ids, vec![a, c, d]);
    assert!(!ordered[2].direct);

    // Leaving the group keeps a direct member; a group-only member disappears.
    VpsTag::delete_many()
        .filter(vps_tag::Column::TagId.eq(edge))
        .exec(&f.h.db)
        .await
        .unwrap();
    let ordered = f.h.engine.effective_members(&snapshot).await.unwrap();
    let ids: Vec<i32> = ordered.iter().map(|m| m.vps_id).collect();
    assert_eq!(ids, vec![a, c]);
}

#[tokio::test]
async fn round_robin_continues_from_active_machine_after_membership_edit() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let c = seed_vps(&f.h.db, "c", Some("10.0.0.3"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1), (c, 2)], vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();
    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!((outcome.to_vps_id, outcome.current_index), (b, 1));

    // Dropping `a` shifts `b` to index 0 while the stored index still says 1.
    pool_service::update_pool(
        &f.h.db,
        pool,
        UpdatePool {
            members: Some(members(&[(b, 1), (c, 2)])),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.from_vps_id, Some(b));
    assert_eq!(outcome.to_vps_id, c);
    assert_eq!(outcome.current_index, 1);

    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.to_vps_id, b);
}

#[tokio::test]
async fn rotate_applies_a_selected_candidate() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    let snapshot = f.h.engine.load(pool).await.unwrap();
    let selection = f.h.engine.select_next(&snapshot).await.unwrap();
    assert_eq!(selection.candidate.vps_id, b);

    let outcome = f
        .h
        .engine
        .rotate(pool, &selection.candidate, RotationTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(outcome.from_vps_id, Some(a));
    assert_eq!(outcome.to_vps_id, b);
    assert_eq!(outcome.current_index, 1);
    assert_eq!(outcome.trigger, RotationTrigger::Scheduled);
    assert_eq!(f.h.provider.records_named("app.example.com", "A")[0].content, "10.0.0.2");
}

#[tokio::test]
async fn rotate_rejects_a_candidate_that_left_the_pool() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    let snapshot = f.h.engine.load(pool).await.unwrap();
    let selection = f.h.engine.select_next(&snapshot).await.unwrap();
    pool_service::update_pool(
        &f.h.db,
        pool,
        UpdatePool {
            members: Some(members(&[(a, 0)])),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = f
        .h
        .engine
        .rotate(pool, &selection.candidate, RotationTrigger::Scheduled)
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::NotAMember(id, p) if id == b && p == pool));

    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, Some(a));
    assert_eq!(pool_service::list_history(&f.h.db, pool, None).await.unwrap().len(), 1);
    assert_eq!(f.h.provider.records_named("app.example.com", "A")[0].content, "10.0.0.1");
}

#[tokio::test]
async fn wildcard_switching_address_family_keeps_one_record() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("2001:db8::2"), None).await;
    let pool = wildcard_pool(&f, &[(a, 0), (b, 1)], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();
    assert_eq!(f.h.provider.records_named("*.example.com", "A").len(), 1);

    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.to_vps_id, b);
    assert!(f.h.provider.records_named("*.example.com", "A").is_empty());
    let remote = f.h.provider.records_named("*.example.com", "AAAA");
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].content, "2001:db8::2");

    let rows = domain_rows(&f).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record_type, "AAAA");

    f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert!(f.h.provider.records_named("*.example.com", "AAAA").is_empty());
    assert_eq!(f.h.provider.records_named("*.example.com", "A")[0].content, "10.0.0.1");
    let rows = domain_rows(&f).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record_type, "A");
}

#[tokio::test]
async fn record_pool_follows_member_address_family() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("2001:db8::2"), None).await;
    let pool = record_pool(&f, &[(a, 0), (b, 1)], vec![], false).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert!(f.h.provider.records_named("app.example.com", "A").is_empty());
    assert_eq!(
        f.h.provider.records_named("app.example.com", "AAAA")[0].content,
        "2001:db8::2"
    );
    let local = DnsRecord::find_by_id(f.record_id).one(&f.h.db).await.unwrap().unwrap();
    assert_eq!(local.record_type, "AAAA");
    assert_eq!(local.sync_status, SyncStatus::Synced);

    f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert!(f.h.provider.records_named("app.example.com", "AAAA").is_empty());
    assert_eq!(f.h.provider.records_named("app.example.com", "A")[0].content, "10.0.0.1");
    assert_eq!(f.h.provider.records().len(), 1);
}

#[tokio::test]
async fn apex_failure_leaves_pool_on_previous_machine() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let b = seed_vps(&f.h.db, "b", Some("10.0.0.2"), None).await;
    let pool = wildcard_pool(&f, &[(a, 0), (b, 1)], true).await;
    f.h.engine.ensure_initial(pool).await.unwrap();

    f.h.provider.fail_writes_to(Some((
        "example.com",
        ProviderError::Api {
            status: 500,
            message: "apex rejected".to_string(),
        },
    )));
    let err = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, RotationError::Reconciliation(_)));

    // The wildcard moved, the apex did not, and the pool still names `a`.
    assert_eq!(f.h.provider.records_named("*.example.com", "A")[0].content, "10.0.0.2");
    assert_eq!(f.h.provider.records_named("example.com", "A")[0].content, "10.0.0.1");
    let snapshot = f.h.engine.load(pool).await.unwrap();
    assert_eq!(snapshot.current_vps_id, Some(a));
    assert_eq!(pool_service::list_history(&f.h.db, pool, None).await.unwrap().len(), 1);
    let apex = domain_rows(&f)
        .await
        .into_iter()
        .find(|r| r.name == "@")
        .expect("apex row");
    assert_eq!(apex.sync_status, SyncStatus::Error);

    // The retry converges both names.
    f.h.provider.fail_writes_to(None);
    let outcome = f.h.engine.rotate_now(pool, RotationTrigger::Manual).await.unwrap();
    assert_eq!(outcome.to_vps_id, b);
    assert_eq!(f.h.provider.records_named("example.com", "A")[0].content, "10.0.0.2");
    assert!(domain_rows(&f).await.iter().all(|r| r.sync_status == SyncStatus::Synced));
}

#[tokio::test]
async fn deleting_a_pool_drops_its_lock() {
    let f = fixture().await;
    let a = seed_vps(&f.h.db, "a", Some("10.0.0.1"), None).await;
    let created = f
        .h
        .manager
        .create_record_pool(CreateRecordPool {
            dns_record_id: f.record_id,
            settings: RotationSettings {
                target_ip: "10.0.0.5".to_string(),
                ..Default::default()
            },
            members: members(&[(a, 0)]),
            tag_ids: Vec::new(),
        })
        .await
        .unwrap();
    let pool = created.pool.pool;
    assert_eq!(f.h.engine.tracked_pools(), 1);

    f.h.manager.delete_pool(pool).await.unwrap();
    assert_eq!(f.h.engine.tracked_pools(), 0);
}
