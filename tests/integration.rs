//! Integration tests for the sleeve engine against a real SQLite file.
//!
//! Every test gets its own temp database, so they run in parallel.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # With engine logs
//! RUST_LOG=sleeve_engine=debug cargo test --test integration -- --nocapture
//! ```
//!
//! # Test Organization
//! - `happy_*` - single saves, batch saves, cascade, markers, snapshots
//! - `failure_*` - validation, rollback and transaction misuse

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sleeve_engine::{
    ClashZone, ClusterRef, ClusterSleeve, CombinedConstituent, CombinedScope, CombinedSleeve, CombinedSnapshot,
    ConstituentKey, IdentityMode, Point3, ResolutionState, ResolutionTier, SaveAction, ScopeKey, SleeveEngine,
    SleeveEngineConfig, SleeveSnapshotView, StoreError, ZonePlacement,
};

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

async fn engine() -> (SleeveEngine, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = SleeveEngineConfig::sqlite(dir.path().join("ledger.db"));
    let engine = SleeveEngine::connect(config).await.expect("connect");
    (engine, dir)
}

fn zone(category: &str, mep: i64, host: i64) -> ClashZone {
    ClashZone::detected(category, mep, host, Point3::new(mep as f64, host as f64, 3.0), 3)
}

/// Element id block per category, so seeds of two categories never
/// produce the same zone GUID.
fn id_block(category: &str) -> i64 {
    match category {
        "Pipes" => 10_000,
        "Ducts" => 20_000,
        _ => 90_000,
    }
}

/// Store `count` zones of `category` and return them.
async fn seed_zones(engine: &SleeveEngine, category: &str, count: i64) -> Vec<ClashZone> {
    let base = id_block(category);
    let zones: Vec<ClashZone> = (1..=count).map(|i| zone(category, base + i, base + 500 + i)).collect();
    engine.records().upsert_clash_zones(&zones).await.unwrap();
    zones
}

fn pipes() -> ScopeKey {
    ScopeKey::new(1, 1, "Pipes")
}

async fn state_of(engine: &SleeveEngine, guid: Uuid) -> ResolutionState {
    engine.records().clash_zone(guid).await.expect("zone stored").flags.state()
}

// =============================================================================
// Happy Path Tests - Single Saves
// =============================================================================

#[tokio::test]
async fn happy_cluster_save_is_idempotent() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;
    let members = vec![zones[0].guid, zones[1].guid];

    let mut first = ClusterSleeve::new(pipes(), members.clone()).with_instance_id(501);
    let a = engine.save_cluster(&mut first).await.unwrap();
    assert_eq!(a.action, SaveAction::Inserted);
    assert_eq!(a.identity, IdentityMode::Content);

    // Same members in another order: same record.
    let mut again = ClusterSleeve::new(pipes(), vec![members[1], members[0]]).with_instance_id(501);
    let b = engine.save_cluster(&mut again).await.unwrap();
    assert_eq!(b.action, SaveAction::Updated);
    assert_eq!(a.row_id, b.row_id);
    assert_eq!(again.created_at, first.created_at);

    assert_eq!(engine.records().clusters().await.len(), 1);
}

#[tokio::test]
async fn happy_instance_only_cluster_is_keyed_by_instance() {
    let (engine, _dir) = engine().await;

    let mut cluster = ClusterSleeve::new(pipes(), vec![]).with_instance_id(77);
    let first = engine.save_cluster(&mut cluster).await.unwrap();
    assert_eq!(first.identity, IdentityMode::InstanceOnly);

    let mut again = ClusterSleeve::new(pipes(), vec![]).with_instance_id(77);
    let second = engine.save_cluster(&mut again).await.unwrap();
    assert_eq!(second.action, SaveAction::Updated);
    assert_eq!(second.row_id, first.row_id);
}

#[tokio::test]
async fn happy_cluster_cascade_marks_zones() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 3).await;

    let mut cluster = ClusterSleeve::new(pipes(), vec![zones[0].guid, zones[1].guid]).with_instance_id(600);
    let outcome = engine.save_cluster(&mut cluster).await.unwrap();
    assert_eq!(outcome.cascaded, 2);

    let covered = engine.records().clash_zone(zones[0].guid).await.unwrap();
    assert!(covered.flags.is_cluster_resolved);
    assert!(!covered.flags.is_resolved);
    assert_eq!(covered.cluster_instance_id, 600);

    assert_eq!(state_of(&engine, zones[2].guid).await, ResolutionState::Unresolved);
    assert_eq!(engine.records().clash_zones_by_instance(600).await.len(), 2);
}

#[tokio::test]
async fn happy_flags_only_accumulate() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;
    let target = zones[0].guid;

    assert!(engine.records().mark_individually_resolved(target, 11).await.unwrap());
    assert_eq!(state_of(&engine, target).await, ResolutionState::IndividuallyResolved);

    let mut cluster = ClusterSleeve::new(pipes(), vec![target, zones[1].guid]).with_instance_id(22);
    engine.save_cluster(&mut cluster).await.unwrap();
    assert_eq!(state_of(&engine, target).await, ResolutionState::ClusterResolved);

    let mut combined = CombinedSleeve::new(
        CombinedScope::new(1, 1),
        vec![CombinedConstituent::individual(target, "Pipes")],
    )
    .with_instance_id(33);
    engine.save_combined(&mut combined).await.unwrap();

    // Re-detection of the same zones refreshes geometry only.
    engine.records().upsert_clash_zones(&zones).await.unwrap();

    let stored = engine.records().clash_zone(target).await.unwrap();
    for tier in [ResolutionTier::Individual, ResolutionTier::Cluster, ResolutionTier::Combined] {
        assert!(stored.flags.is_set(tier), "{tier} flag lost");
    }
    assert_eq!(stored.flags.state(), ResolutionState::CombinedResolved);
    assert_eq!(stored.sleeve_instance_id, 11);
    assert_eq!(stored.cluster_instance_id, 22);
    assert_eq!(stored.combined_instance_id, 33);
}

#[tokio::test]
async fn happy_redetection_refreshes_placement() {
    let (engine, _dir) = engine().await;
    let first = zone("Pipes", 1, 2).with_placement(ZonePlacement { width: 1.0, rotation: 0.0, ..Default::default() });
    engine.records().upsert_clash_zones(&[first.clone()]).await.unwrap();
    assert!(engine.records().mark_individually_resolved(first.guid, 4).await.unwrap());

    let moved = zone("Pipes", 1, 2).with_placement(ZonePlacement { width: 2.0, rotation: 90.0, ..Default::default() });
    assert_eq!(moved.guid, first.guid);
    engine.records().upsert_clash_zones(&[moved]).await.unwrap();

    let stored = engine.records().clash_zone(first.guid).await.unwrap();
    assert_eq!(stored.placement.width, 2.0);
    assert_eq!(stored.placement.rotation, 90.0);
    assert!(stored.flags.is_set(ResolutionTier::Individual));
    assert_eq!(stored.sleeve_instance_id, 4);
}

#[tokio::test]
async fn happy_combined_cascade_expands_clusters() {
    let (engine, _dir) = engine().await;
    let pipes_zones = seed_zones(&engine, "Pipes", 2).await;
    let ducts_zones = seed_zones(&engine, "Ducts", 1).await;

    let mut cluster =
        ClusterSleeve::new(pipes(), pipes_zones.iter().map(|z| z.guid).collect()).with_instance_id(900);
    engine.save_cluster(&mut cluster).await.unwrap();

    let mut combined = CombinedSleeve::new(
        CombinedScope::new(1, 1),
        vec![
            CombinedConstituent::cluster(ClusterRef::Instance(900), "Pipes"),
            CombinedConstituent::individual(ducts_zones[0].guid, "Ducts"),
        ],
    )
    .with_instance_id(1000);
    let outcome = engine.save_combined(&mut combined).await.unwrap();

    assert_eq!(outcome.cascaded, 3);
    assert_eq!(combined.categories, vec!["Pipes".to_string(), "Ducts".to_string()]);
    for z in pipes_zones.iter().chain(&ducts_zones) {
        let stored = engine.records().clash_zone(z.guid).await.unwrap();
        assert!(stored.flags.is_combined_resolved);
        assert_eq!(stored.combined_instance_id, 1000);
    }

    let constituents = engine.records().constituents_of(outcome.row_id).await;
    assert_eq!(constituents.len(), 2);
}

#[tokio::test]
async fn happy_combined_stores_repeated_individual_once() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;

    let mut combined = CombinedSleeve::new(
        CombinedScope::new(1, 1),
        vec![
            CombinedConstituent::individual(zones[0].guid, "Pipes"),
            CombinedConstituent::individual(zones[0].guid, "Pipes"),
            CombinedConstituent::individual(zones[1].guid, "Pipes"),
        ],
    )
    .with_instance_id(70);
    let outcome = engine.save_combined(&mut combined).await.unwrap();
    assert_eq!(outcome.cascaded, 2);

    let stored = engine.records().constituents_of(outcome.row_id).await;
    assert_eq!(stored.len(), 2);
    let keys: Vec<ConstituentKey> = stored.iter().map(|c| c.constituent.key).collect();
    assert!(keys.contains(&ConstituentKey::Individual(zones[0].guid)));
    assert!(keys.contains(&ConstituentKey::Individual(zones[1].guid)));
}

#[tokio::test]
async fn happy_combined_references_unplaced_cluster_by_row() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;

    let mut cluster = ClusterSleeve::new(pipes(), zones.iter().map(|z| z.guid).collect());
    let saved = engine.save_cluster(&mut cluster).await.unwrap();

    let key = ConstituentKey::cluster(cluster.instance_id, cluster.id).unwrap();
    assert_eq!(key, ConstituentKey::Cluster(ClusterRef::Row(saved.row_id)));

    let mut combined = CombinedSleeve::new(
        CombinedScope::new(2, 1),
        vec![CombinedConstituent { key, category: "Pipes".into() }],
    );
    assert!(combined.has_unstable_identity());

    let outcome = engine.save_combined(&mut combined).await.unwrap();
    assert_eq!(outcome.cascaded, 2);
    // No instance id yet, so no owner link.
    let stored = engine.records().clash_zone(zones[0].guid).await.unwrap();
    assert!(stored.flags.is_combined_resolved);
    assert_eq!(stored.combined_instance_id, -1);
}

#[tokio::test]
async fn happy_nested_saves_share_one_transaction() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;

    let mut tx = engine.begin().await.unwrap();
    let mut cluster = ClusterSleeve::new(pipes(), vec![zones[0].guid]).with_instance_id(41);
    engine.save_cluster_in(&mut tx, &mut cluster).await.unwrap();
    let mut combined = CombinedSleeve::new(
        CombinedScope::new(1, 1),
        vec![CombinedConstituent::cluster(ClusterRef::Instance(41), "Pipes")],
    )
    .with_instance_id(42);
    engine.save_combined_in(&mut tx, &mut combined).await.unwrap();
    tx.commit().await.unwrap();

    assert!(engine.records().cluster_by_instance(41).await.is_some());
    assert!(engine.records().combined_by_instance(42).await.is_some());
    assert_eq!(state_of(&engine, zones[0].guid).await, ResolutionState::CombinedResolved);
}

// =============================================================================
// Happy Path Tests - Batch Saves
// =============================================================================

#[tokio::test]
async fn happy_batch_replaces_scope_and_removes_ghosts() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 4).await;
    let g: Vec<Uuid> = zones.iter().map(|z| z.guid).collect();

    let kept = ClusterSleeve::new(pipes(), vec![g[0], g[1]]);
    let ghost = ClusterSleeve::new(pipes(), vec![g[2]]);
    let first = engine.batch_save_clusters(vec![kept.clone(), ghost.clone()]).await.unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.ghosts_removed, 0);
    let original = engine.records().cluster_by_guid(kept.content_guid.unwrap()).await.unwrap();

    let fresh = ClusterSleeve::new(pipes(), vec![g[3]]);
    let second = engine.batch_save_clusters(vec![kept.clone(), fresh.clone()]).await.unwrap();
    assert_eq!(second.scopes, 1);
    assert_eq!(second.ghosts_removed, 1);
    assert_eq!(second.inserted, 2);

    let stored: Vec<Option<Uuid>> = engine
        .records()
        .clusters_in_scope(&pipes())
        .await
        .into_iter()
        .map(|c| c.content_guid)
        .collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&kept.content_guid));
    assert!(stored.contains(&fresh.content_guid));
    assert!(!stored.contains(&ghost.content_guid));

    let rewritten = engine.records().cluster_by_guid(kept.content_guid.unwrap()).await.unwrap();
    assert_eq!(rewritten.created_at, original.created_at);
}

#[tokio::test]
async fn happy_shrunk_cluster_replaces_its_predecessor() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 3).await;
    let g: Vec<Uuid> = zones.iter().map(|z| z.guid).collect();

    let wide = ClusterSleeve::new(pipes(), g.clone());
    engine.batch_save_clusters(vec![wide.clone()]).await.unwrap();

    let narrow = ClusterSleeve::new(pipes(), vec![g[0], g[1]]);
    assert_ne!(narrow.content_guid, wide.content_guid);
    let report = engine.batch_save_clusters(vec![narrow.clone()]).await.unwrap();
    assert_eq!(report.ghosts_removed, 1);
    assert_eq!(report.inserted, 1);

    let stored = engine.records().clusters_in_scope(&pipes()).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content_guid, narrow.content_guid);
    assert_eq!(stored[0].constituents.len(), 2);
}

#[tokio::test]
async fn happy_batch_leaves_other_scopes_alone() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;

    let other_scope = ScopeKey::new(1, 2, "Pipes");
    engine
        .batch_save_clusters(vec![ClusterSleeve::new(other_scope.clone(), vec![zones[0].guid])])
        .await
        .unwrap();
    engine
        .batch_save_clusters(vec![ClusterSleeve::new(pipes(), vec![zones[1].guid])])
        .await
        .unwrap();

    assert_eq!(engine.records().clusters_in_scope(&other_scope).await.len(), 1);
    assert_eq!(engine.records().clusters().await.len(), 2);
}

#[tokio::test]
async fn happy_batch_collapses_repeated_identities() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;
    let members = vec![zones[0].guid, zones[1].guid];

    let first = ClusterSleeve::new(pipes(), members.clone()).with_instance_id(1);
    let last = ClusterSleeve::new(pipes(), members).with_instance_id(2);
    let report = engine.batch_save_clusters(vec![first, last]).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates_dropped, 1);
    let stored = engine.records().clusters().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].instance_id, 2);
}

#[tokio::test]
async fn happy_combined_batch_removes_ghosts_with_children() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 3).await;
    let scope = CombinedScope::new(5, 1);

    let keep = CombinedSleeve::new(scope, vec![CombinedConstituent::individual(zones[0].guid, "Pipes")]);
    let ghost = CombinedSleeve::new(scope, vec![CombinedConstituent::individual(zones[1].guid, "Pipes")]);
    engine.batch_save_combined(vec![keep.clone(), ghost]).await.unwrap();

    let report = engine.batch_save_combined(vec![keep.clone()]).await.unwrap();
    assert_eq!(report.ghosts_removed, 1);

    let stored = engine.records().combined_in_scope(scope).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content_hash, keep.content_hash);
    assert_eq!(stored[0].constituents.len(), 1);
    assert_eq!(engine.records().constituents_of(stored[0].id.unwrap()).await.len(), 1);
}

// =============================================================================
// Happy Path Tests - Markers, Snapshots, Reset
// =============================================================================

#[tokio::test]
async fn happy_incremental_scan_only_returns_new_ids() {
    let (engine, _dir) = engine().await;
    let scanner = engine.scanner();
    let first: Vec<i64> = (1..=10).collect();

    assert_eq!(scanner.new_sleeves_only(&first, "Pipes").await, first);
    assert!(scanner.mark_category_processed("Pipes", &first).await);

    let grown: Vec<i64> = (1..=15).collect();
    assert_eq!(scanner.new_sleeves_only(&grown, "Pipes").await, vec![11, 12, 13, 14, 15]);
    assert!(scanner.new_sleeves_only(&first, "Pipes").await.is_empty());

    let marker = engine.markers().get_marker("Pipes").await;
    assert_eq!(marker.last_count, 10);
    assert_eq!(marker.sample.map(|s| s.len()), Some(10));

    // Passing only the fresh suffix must not pull the marker back.
    assert!(!scanner.mark_category_processed("Pipes", &[11, 12, 13, 14, 15]).await);
    assert_eq!(engine.markers().get_marker("Pipes").await.last_count, 10);
    assert!(scanner.mark_category_processed("Pipes", &grown).await);
    assert_eq!(engine.markers().get_marker("Pipes").await.last_count, 15);
}

#[tokio::test]
async fn happy_snapshots_index_by_owner() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;
    let records = engine.records();

    records
        .save_snapshot(&SleeveSnapshotView::for_sleeve(10, zones[0].guid).with_mep_parameter("Size", "50"))
        .await
        .unwrap();
    records
        .save_snapshot(&SleeveSnapshotView::for_cluster(20).with_host_parameter("Fire Rating", "2h"))
        .await
        .unwrap();

    let index = engine.snapshot_index().await;
    assert_eq!(index.len(), 2);
    assert_eq!(index.for_sleeve(10).unwrap().mep_parameters["Size"], "50");
    assert!(index.for_clash_zone(&zones[0].guid).is_some());
    assert!(index.for_cluster(20).is_some());

    let refs = [ConstituentKey::Individual(zones[0].guid), ConstituentKey::Cluster(ClusterRef::Instance(20))];
    match index.for_combined(30, &refs) {
        Some(CombinedSnapshot::Constituents(found)) => assert_eq!(found.len(), 2),
        other => panic!("expected constituent snapshots, got {:?}", other),
    }
}

#[tokio::test]
async fn happy_zones_with_parameters_keep_unsnapshotted_zones() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;
    engine
        .records()
        .save_snapshot(&SleeveSnapshotView::for_sleeve(10, zones[0].guid).with_mep_parameter("Size", "50"))
        .await
        .unwrap();

    let joined = engine.records().clash_zones_with_parameters(Some("Pipes")).await;
    assert_eq!(joined.len(), 2);
    let bare = joined.iter().find(|z| z.record.guid == zones[1].guid).unwrap();
    assert!(bare.mep_parameters.is_empty());
    assert!(bare.host_parameters.is_empty());
    let captured = joined.iter().find(|z| z.record.guid == zones[0].guid).unwrap();
    assert_eq!(captured.mep_parameters.get("Size").map(String::as_str), Some("50"));
}

#[tokio::test]
async fn happy_mark_current_clashes() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 3).await;

    engine.records().mark_current_clashes("Pipes", &[zones[0].guid]).await.unwrap();

    let current: Vec<bool> = engine
        .records()
        .clash_zones_by_category("Pipes")
        .await
        .iter()
        .map(|z| z.flags.is_current_clash)
        .collect();
    assert_eq!(current.iter().filter(|c| **c).count(), 1);
    assert!(engine.records().clash_zone(zones[0].guid).await.unwrap().flags.is_current_clash);
}

#[tokio::test]
async fn happy_force_redetection_for_category() {
    let (engine, _dir) = engine().await;
    let pipes_zones = seed_zones(&engine, "Pipes", 2).await;
    let ducts_zones = seed_zones(&engine, "Ducts", 1).await;

    let mut pipe_cluster =
        ClusterSleeve::new(pipes(), pipes_zones.iter().map(|z| z.guid).collect()).with_instance_id(7);
    engine.save_cluster(&mut pipe_cluster).await.unwrap();
    let mut duct_cluster =
        ClusterSleeve::new(ScopeKey::new(1, 1, "Ducts"), vec![ducts_zones[0].guid]).with_instance_id(8);
    engine.save_cluster(&mut duct_cluster).await.unwrap();
    let mut combined = CombinedSleeve::new(
        CombinedScope::new(1, 1),
        vec![CombinedConstituent::cluster(ClusterRef::Instance(7), "Pipes")],
    )
    .with_instance_id(9);
    engine.save_combined(&mut combined).await.unwrap();
    engine.scanner().mark_category_processed("Pipes", &[1, 2, 3]).await;

    let report = engine.force_redetection(Some("Pipes")).await.unwrap();
    assert_eq!(report.zones_reset, 2);
    assert_eq!(report.clusters_removed, 1);
    assert_eq!(report.combined_removed, 1);
    assert!(report.markers_reset);

    let reset = engine.records().clash_zone(pipes_zones[0].guid).await.unwrap();
    assert_eq!(reset.flags.state(), ResolutionState::Unresolved);
    assert_eq!(reset.cluster_instance_id, -1);
    assert_eq!(reset.combined_instance_id, -1);
    assert_eq!(engine.markers().get_marker("Pipes").await.last_count, 0);

    // Other categories keep their decisions.
    assert_eq!(state_of(&engine, ducts_zones[0].guid).await, ResolutionState::ClusterResolved);
    assert!(engine.records().cluster_by_instance(8).await.is_some());
}

#[tokio::test]
async fn happy_force_redetection_everywhere() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 1).await;
    let mut cluster = ClusterSleeve::new(pipes(), vec![zones[0].guid]).with_instance_id(3);
    engine.save_cluster(&mut cluster).await.unwrap();

    let report = engine.force_redetection(None).await.unwrap();
    assert_eq!(report.clusters_removed, 1);
    assert!(engine.records().clusters().await.is_empty());
    assert_eq!(state_of(&engine, zones[0].guid).await, ResolutionState::Unresolved);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[tokio::test]
async fn failure_invalid_cluster_writes_nothing() {
    let (engine, _dir) = engine().await;

    let mut nameless = ClusterSleeve::new(ScopeKey::new(1, 1, " "), vec![Uuid::from_u128(1)]);
    assert!(engine.save_cluster(&mut nameless).await.unwrap_err().is_validation());

    let mut keyless = ClusterSleeve::new(pipes(), vec![]);
    assert!(engine.save_cluster(&mut keyless).await.unwrap_err().is_validation());

    let good = ClusterSleeve::new(pipes(), vec![Uuid::from_u128(2)]);
    let bad = ClusterSleeve::new(pipes(), vec![]);
    assert!(engine.batch_save_clusters(vec![good, bad]).await.unwrap_err().is_validation());

    assert!(engine.records().clusters().await.is_empty());
    assert!(!engine.store().in_transaction());
}

#[tokio::test]
async fn failure_batch_rolls_back_on_statement_error() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 2).await;

    let mut original = ClusterSleeve::new(pipes(), vec![zones[0].guid]).with_instance_id(5);
    engine.save_cluster(&mut original).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_boom BEFORE INSERT ON cluster_sleeves \
         WHEN NEW.category = 'Boom' BEGIN SELECT RAISE(ABORT, 'boom'); END",
    )
    .execute(engine.store().pool())
    .await
    .unwrap();

    let batch = vec![
        ClusterSleeve::new(pipes(), vec![zones[1].guid]),
        ClusterSleeve::new(ScopeKey::new(1, 1, "Boom"), vec![zones[0].guid, zones[1].guid]),
    ];
    let err = engine.batch_save_clusters(batch).await.unwrap_err();
    assert!(matches!(err, StoreError::Persistence { .. }), "got {:?}", err);
    assert!(!engine.store().in_transaction());

    // The scope delete was undone along with the inserts.
    let stored = engine.records().clusters_in_scope(&pipes()).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content_guid, original.content_guid);
    assert_eq!(state_of(&engine, zones[1].guid).await, ResolutionState::Unresolved);
}

#[tokio::test]
async fn failure_second_transaction_is_rejected() {
    let (engine, _dir) = engine().await;

    let tx = engine.begin().await.unwrap();
    let mut cluster = ClusterSleeve::new(pipes(), vec![Uuid::from_u128(9)]);
    assert!(matches!(
        engine.save_cluster(&mut cluster).await,
        Err(StoreError::TransactionActive)
    ));
    tx.rollback().await.unwrap();

    engine.save_cluster(&mut cluster).await.unwrap();
}

#[tokio::test]
async fn failure_cascade_requires_an_owner() {
    let (engine, _dir) = engine().await;
    let zones = seed_zones(&engine, "Pipes", 1).await;

    let err = engine
        .mark_constituents_resolved(ResolutionTier::Cluster, &[ConstituentKey::Individual(zones[0].guid)], 0)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(engine.records().mark_individually_resolved(zones[0].guid, -1).await.is_err());
    for unplaced in [0, -1] {
        let err = engine.records().set_sleeve_instance(zones[0].guid, unplaced).await.unwrap_err();
        assert!(err.is_validation());
    }
    assert_eq!(engine.records().clash_zone(zones[0].guid).await.unwrap().sleeve_instance_id, -1);
    assert!(!engine.store().in_transaction());

    let raised = engine
        .mark_constituents_resolved(ResolutionTier::Cluster, &[ConstituentKey::Individual(zones[0].guid)], 12)
        .await
        .unwrap();
    assert_eq!(raised, 1);
}
