//! Chaos tests for the sleeve engine.
//!
//! This module tests how the store copes with data it didn't write:
//! 1. **Older layouts** - snapshot tables from before the per-column split
//! 2. **Data corruption** - garbage in JSON and id columns
//! 3. **Missing tables** - reads degrade to empty results instead of failing
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sleeve_engine::{
    ClashZone, ClusterSleeve, Point3, RecordStore, ScopeKey, SleeveEngine, SleeveEngineConfig, SnapshotIndex,
    SqlStore, Verbosity,
};

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .with_test_writer()
        .try_init();
}

async fn engine() -> (SleeveEngine, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = SleeveEngineConfig::sqlite(dir.path().join("ledger.db"));
    (SleeveEngine::connect(config).await.unwrap(), dir)
}

/// A bare pool on a fresh file, with no ledger schema.
async fn raw_pool(dir: &TempDir) -> (AnyPool, SleeveEngineConfig) {
    init_tracing();
    sqlx::any::install_default_drivers();
    let config = SleeveEngineConfig::sqlite(dir.path().join("legacy.db"));
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .unwrap();
    (pool, config)
}

// =============================================================================
// Older Layouts
// =============================================================================

#[tokio::test]
async fn chaos_legacy_snapshot_layout_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config) = raw_pool(&dir).await;
    let zone = Uuid::from_u128(0xabc);

    sqlx::query(
        "CREATE TABLE sleeve_snapshots (snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT, \
         sleeve_instance_id INTEGER, cluster_instance_id INTEGER, clash_zone_guid TEXT, parameters_json TEXT)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO sleeve_snapshots (sleeve_instance_id, cluster_instance_id, clash_zone_guid, parameters_json) \
         VALUES (?, NULL, ?, ?)",
    )
    .bind(10i64)
    .bind(zone.to_string())
    .bind(r#"{"mep":{"Size":"50"},"host":{"Fire Rating":"2h"}}"#)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO sleeve_snapshots (sleeve_instance_id, cluster_instance_id, parameters_json) VALUES (NULL, ?, ?)")
        .bind(20i64)
        .bind(r#"{"mep":{"System":"CHW"}}"#)
        .execute(&pool)
        .await
        .unwrap();

    let records = RecordStore::new(SqlStore::from_pool(pool, true, Verbosity::Normal), &config);
    let views = records.load_snapshots().await;
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].mep_parameters.get("Size").map(String::as_str), Some("50"));
    assert_eq!(views[0].host_parameters.get("Fire Rating").map(String::as_str), Some("2h"));
    assert!(views[1].host_parameters.is_empty());

    let index = SnapshotIndex::build(&records).await;
    assert_eq!(index.for_clash_zone(&zone).unwrap().sleeve_instance_id, Some(10));
    assert!(index.for_cluster(20).is_some());
}

// =============================================================================
// Data Corruption
// =============================================================================

#[tokio::test]
async fn chaos_malformed_snapshot_json_decodes_to_defaults() {
    let (engine, _dir) = engine().await;

    sqlx::query(
        "INSERT INTO sleeve_snapshots (sleeve_instance_id, mep_parameters_json, host_parameters_json, \
         mep_element_ids_json, constituent_refs_json, captured_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(10i64)
    .bind("{not json")
    .bind(r#"{"Fire Rating":"2h"}"#)
    .bind("[1, 2,")
    .bind(r#"["I:not-a-guid", "C:44"]"#)
    .bind(0i64)
    .execute(engine.store().pool())
    .await
    .unwrap();

    let views = engine.records().load_snapshots().await;
    assert_eq!(views.len(), 1);
    assert!(views[0].mep_parameters.is_empty());
    assert_eq!(views[0].host_parameters.len(), 1);
    assert!(views[0].mep_element_ids.is_empty());
    // Unparseable refs are skipped, the rest survive.
    assert_eq!(views[0].constituent_keys().len(), 1);
}

#[tokio::test]
async fn chaos_garbage_cluster_columns_still_load() {
    let (engine, _dir) = engine().await;
    let mut cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Pipes"), vec![Uuid::from_u128(1)]).with_instance_id(5);
    engine.save_cluster(&mut cluster).await.unwrap();

    sqlx::query("UPDATE cluster_sleeves SET constituent_guids_json = 'garbage', content_guid = 'nope'")
        .execute(engine.store().pool())
        .await
        .unwrap();

    let stored = engine.records().cluster_by_instance(5).await.unwrap();
    assert!(stored.constituents.is_empty());
    assert!(stored.content_guid.is_none());
}

#[tokio::test]
async fn chaos_garbage_marker_sample_is_ignored() {
    let (engine, _dir) = engine().await;
    assert!(engine.markers().update_marker("Pipes", 4, &[1, 2, 3, 4]).await);

    sqlx::query("UPDATE category_processing_markers SET last_processed_ids_sample = '[1,'")
        .execute(engine.store().pool())
        .await
        .unwrap();

    let marker = engine.markers().get_marker("Pipes").await;
    assert_eq!(marker.last_count, 4);
    assert_eq!(marker.sample, None);
}

// =============================================================================
// Missing Tables
// =============================================================================

#[tokio::test]
async fn chaos_reads_degrade_when_tables_vanish() {
    let (engine, _dir) = engine().await;
    let zones = vec![ClashZone::detected("Pipes", 1, 2, Point3::new(0.0, 0.0, 0.0), 3)];
    engine.records().upsert_clash_zones(&zones).await.unwrap();

    for table in ["clash_zones", "cluster_sleeves", "category_processing_markers"] {
        sqlx::query(&format!("DROP TABLE {}", table))
            .execute(engine.store().pool())
            .await
            .unwrap();
    }

    assert!(engine.records().clash_zones().await.is_empty());
    assert!(engine.records().clash_zone(zones[0].guid).await.is_none());
    assert!(engine.records().clusters().await.is_empty());
    assert_eq!(engine.markers().get_marker("Pipes").await.last_count, 0);
    assert!(!engine.markers().update_marker("Pipes", 3, &[]).await);

    // Writes still report the failure.
    let mut cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Pipes"), vec![zones[0].guid]);
    assert!(engine.save_cluster(&mut cluster).await.is_err());
    assert!(!engine.store().in_transaction());
}
