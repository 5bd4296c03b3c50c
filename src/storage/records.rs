// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public face of the record tables.
//!
//! Reads degrade: a failed query is logged and answered with an empty
//! result, so downstream consumers keep running on partial data. Writes
//! return [`StoreError`] and run in their own transaction.

use super::sql::SqlStore;
use super::traits::StoreError;
use super::{clash_zones, clusters, combined, snapshots};
use crate::config::{SleeveEngineConfig, Verbosity};
use crate::model::{
    ClashZone, ClusterSleeve, CombinedScope, CombinedSleeve, ParameterMap, ResolutionTier, ScopeKey,
    SleeveConstituent, SleeveSnapshotView,
};
use crate::identity::ContentHash;
use crate::resilience::retry::{retry, RetryConfig};
use sqlx::pool::PoolConnection;
use sqlx::Any;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A record joined with the parameters of its snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct WithParameters<T> {
    pub record: T,
    pub mep_parameters: ParameterMap,
    pub host_parameters: ParameterMap,
}

impl<T> From<(T, ParameterMap, ParameterMap)> for WithParameters<T> {
    fn from((record, mep_parameters, host_parameters): (T, ParameterMap, ParameterMap)) -> Self {
        Self { record, mep_parameters, host_parameters }
    }
}

#[derive(Clone)]
pub struct RecordStore {
    store: SqlStore,
    verbosity: Verbosity,
    chunk_size: usize,
}

impl RecordStore {
    #[must_use]
    pub fn new(store: SqlStore, config: &SleeveEngineConfig) -> Self {
        Self {
            store,
            verbosity: config.verbosity,
            chunk_size: config.batch_chunk_size,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &SqlStore {
        &self.store
    }

    async fn acquire(&self, operation: &str) -> Option<PoolConnection<Any>> {
        match self.store.pool().acquire().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(operation, error = %e, "Read degraded: no connection");
                None
            }
        }
    }

    fn degraded<T: Default>(&self, operation: &str, err: sqlx::Error) -> T {
        warn!(operation, error = %err, "Read degraded: query failed");
        T::default()
    }

    // ---- clash zones -------------------------------------------------------

    pub async fn clash_zone(&self, guid: Uuid) -> Option<ClashZone> {
        let mut conn = self.acquire("clash_zone").await?;
        clash_zones::get(&mut conn, guid)
            .await
            .unwrap_or_else(|e| self.degraded("clash_zone", e))
    }

    /// Zones linked to `instance_id` at any tier.
    pub async fn clash_zones_by_instance(&self, instance_id: i64) -> Vec<ClashZone> {
        let Some(mut conn) = self.acquire("clash_zones_by_instance").await else { return Vec::new() };
        clash_zones::by_instance(&mut conn, instance_id)
            .await
            .unwrap_or_else(|e| self.degraded("clash_zones_by_instance", e))
    }

    pub async fn clash_zones_by_category(&self, category: &str) -> Vec<ClashZone> {
        let Some(mut conn) = self.acquire("clash_zones_by_category").await else { return Vec::new() };
        clash_zones::by_category(&mut conn, category)
            .await
            .unwrap_or_else(|e| self.degraded("clash_zones_by_category", e))
    }

    pub async fn clash_zones(&self) -> Vec<ClashZone> {
        let Some(mut conn) = self.acquire("clash_zones").await else { return Vec::new() };
        clash_zones::all(&mut conn)
            .await
            .unwrap_or_else(|e| self.degraded("clash_zones", e))
    }

    /// Zones with their snapshot parameters; a zone without a snapshot has
    /// empty maps.
    pub async fn clash_zones_with_parameters(&self, category: Option<&str>) -> Vec<WithParameters<ClashZone>> {
        let Some(mut conn) = self.acquire("clash_zones_with_parameters").await else { return Vec::new() };
        clash_zones::with_parameters(&mut conn, category, self.verbosity)
            .await
            .map(|rows| rows.into_iter().map(WithParameters::from).collect())
            .unwrap_or_else(|e| self.degraded("clash_zones_with_parameters", e))
    }

    #[instrument(skip(self, zones), fields(count = zones.len()))]
    pub async fn upsert_clash_zones(&self, zones: &[ClashZone]) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;
        let affected = clash_zones::upsert(tx.conn(), self.store.is_sqlite(), zones, self.verbosity).await?;
        tx.commit().await?;
        Ok(affected)
    }

    /// Flag the listed zones as present in the latest detection run and
    /// every other zone of the category as absent.
    #[instrument(skip(self, current), fields(count = current.len()))]
    pub async fn mark_current_clashes(&self, category: &str, current: &[Uuid]) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;
        let marked = clash_zones::mark_current(tx.conn(), category, current, self.chunk_size).await?;
        tx.commit().await?;
        Ok(marked)
    }

    /// Explicit refresh: drop every zone of a category.
    #[instrument(skip(self))]
    pub async fn delete_clash_zones(&self, category: &str) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;
        let deleted = clash_zones::delete_category(tx.conn(), category).await?;
        tx.commit().await?;
        if self.verbosity.summaries() {
            info!(category, deleted, "Clash zones deleted");
        }
        Ok(deleted)
    }

    /// Record the individual sleeve placed for a zone. Returns false if the
    /// zone doesn't exist.
    pub async fn set_sleeve_instance(&self, guid: Uuid, instance_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;
        let found = clash_zones::set_sleeve_instance(tx.conn(), guid, instance_id).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// Raise `is_resolved` on a zone and link its individual sleeve.
    pub async fn mark_individually_resolved(&self, guid: Uuid, sleeve_instance_id: i64) -> Result<bool, StoreError> {
        if sleeve_instance_id <= 0 {
            return Err(StoreError::validation("ClashZone", "sleeve instance id must be positive"));
        }
        let mut tx = self.store.begin().await?;
        let raised = clash_zones::raise_tier(
            tx.conn(),
            &[guid],
            ResolutionTier::Individual,
            Some(sleeve_instance_id),
            self.chunk_size,
        )
        .await?;
        tx.commit().await?;
        Ok(raised > 0)
    }

    // ---- clusters ----------------------------------------------------------

    pub async fn cluster_by_guid(&self, guid: Uuid) -> Option<ClusterSleeve> {
        let mut conn = self.acquire("cluster_by_guid").await?;
        clusters::by_guid(&mut conn, guid, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("cluster_by_guid", e))
    }

    pub async fn cluster_by_instance(&self, instance_id: i64) -> Option<ClusterSleeve> {
        let mut conn = self.acquire("cluster_by_instance").await?;
        clusters::by_instance(&mut conn, instance_id, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("cluster_by_instance", e))
    }

    pub async fn clusters_in_scope(&self, scope: &ScopeKey) -> Vec<ClusterSleeve> {
        let Some(mut conn) = self.acquire("clusters_in_scope").await else { return Vec::new() };
        clusters::by_scope(&mut conn, scope, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("clusters_in_scope", e))
    }

    pub async fn clusters(&self) -> Vec<ClusterSleeve> {
        let Some(mut conn) = self.acquire("clusters").await else { return Vec::new() };
        clusters::all(&mut conn, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("clusters", e))
    }

    pub async fn clusters_with_parameters(&self) -> Vec<WithParameters<ClusterSleeve>> {
        let Some(mut conn) = self.acquire("clusters_with_parameters").await else { return Vec::new() };
        clusters::with_parameters(&mut conn, self.verbosity)
            .await
            .map(|rows| rows.into_iter().map(WithParameters::from).collect())
            .unwrap_or_else(|e| self.degraded("clusters_with_parameters", e))
    }

    // ---- combined ----------------------------------------------------------

    pub async fn combined_by_hash(&self, hash: &ContentHash) -> Option<CombinedSleeve> {
        let mut conn = self.acquire("combined_by_hash").await?;
        combined::by_hash(&mut conn, hash, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("combined_by_hash", e))
    }

    pub async fn combined_by_instance(&self, instance_id: i64) -> Option<CombinedSleeve> {
        let mut conn = self.acquire("combined_by_instance").await?;
        combined::by_instance(&mut conn, instance_id, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("combined_by_instance", e))
    }

    pub async fn combined_in_scope(&self, scope: CombinedScope) -> Vec<CombinedSleeve> {
        let Some(mut conn) = self.acquire("combined_in_scope").await else { return Vec::new() };
        combined::by_scope(&mut conn, scope, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("combined_in_scope", e))
    }

    pub async fn combined_sleeves(&self) -> Vec<CombinedSleeve> {
        let Some(mut conn) = self.acquire("combined_sleeves").await else { return Vec::new() };
        combined::all(&mut conn, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("combined_sleeves", e))
    }

    /// Persisted child rows of a combined sleeve.
    pub async fn constituents_of(&self, combined_sleeve_id: i64) -> Vec<SleeveConstituent> {
        let Some(mut conn) = self.acquire("constituents_of").await else { return Vec::new() };
        combined::constituents_of(&mut conn, combined_sleeve_id, self.verbosity)
            .await
            .unwrap_or_else(|e| self.degraded("constituents_of", e))
    }

    // ---- snapshots ---------------------------------------------------------

    pub async fn save_snapshot(&self, view: &SleeveSnapshotView) -> Result<i64, StoreError> {
        let mut tx = self.store.begin().await?;
        let id = snapshots::save(tx.conn(), view).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Every snapshot, read with the newest layout the table supports.
    pub async fn load_snapshots(&self) -> Vec<SleeveSnapshotView> {
        let pool = self.store.pool();
        let verbosity = self.verbosity;
        match retry("snapshot_load", &RetryConfig::query(), || snapshots::load(pool, verbosity)).await {
            Ok((views, _layout)) => views,
            Err(e) => self.degraded("load_snapshots", e),
        }
    }
}
