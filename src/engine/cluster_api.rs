// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster sleeve saves.

use super::cascade;
use super::types::{BatchSaveReport, IdentityMode, SaveAction, SaveOutcome};
use super::SleeveEngine;
use crate::config::Verbosity;
use crate::identity::ConstituentKey;
use crate::metrics::{self, LatencyTimer};
use crate::model::{now_millis, ClusterSleeve, ResolutionTier, ScopeKey};
use crate::storage::clusters;
use crate::storage::sql::StoreTx;
use crate::storage::traits::StoreError;
use sqlx::AnyConnection;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const ENTITY: &str = "ClusterSleeve";

/// Key a cluster is deduplicated under inside one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BatchKey {
    Content(Uuid),
    Instance(i64),
}

fn validate(cluster: &ClusterSleeve) -> Result<IdentityMode, StoreError> {
    if cluster.scope.category.trim().is_empty() {
        return Err(StoreError::validation(ENTITY, "category is empty"));
    }
    match cluster.content_guid {
        Some(_) => Ok(IdentityMode::Content),
        None if cluster.instance_id > 0 => Ok(IdentityMode::InstanceOnly),
        None => Err(StoreError::validation(
            ENTITY,
            format!("no constituents and no instance id in scope {}", cluster.scope),
        )),
    }
}

fn batch_key(cluster: &ClusterSleeve) -> BatchKey {
    match cluster.content_guid {
        Some(guid) => BatchKey::Content(guid),
        None => BatchKey::Instance(cluster.instance_id),
    }
}

fn constituent_keys(cluster: &ClusterSleeve) -> Vec<ConstituentKey> {
    cluster.constituents.iter().copied().map(ConstituentKey::Individual).collect()
}

impl SleeveEngine {
    /// Insert or update one cluster sleeve in its own transaction.
    ///
    /// The cluster is normalised in place; on success its `id` and
    /// `created_at` reflect the stored row.
    #[instrument(skip(self, cluster), fields(scope = %cluster.scope, instance = cluster.instance_id))]
    pub async fn save_cluster(&self, cluster: &mut ClusterSleeve) -> Result<SaveOutcome, StoreError> {
        let _timer = LatencyTimer::new("cluster", "save");
        let mut tx = self.store.begin().await?;
        let result = self.save_cluster_in(&mut tx, cluster).await;
        self.finish(tx, result, ENTITY, "save").await
    }

    /// [`save_cluster`](Self::save_cluster) inside an open transaction.
    pub async fn save_cluster_in(
        &self,
        tx: &mut StoreTx,
        cluster: &mut ClusterSleeve,
    ) -> Result<SaveOutcome, StoreError> {
        let duplicates_dropped = cluster.normalize();
        let identity = validate(cluster)?;
        let verbosity = self.config.verbosity;
        let conn = tx.conn();

        let existing = match cluster.content_guid {
            Some(guid) => clusters::by_guid(conn, guid, verbosity).await,
            None => Ok(None),
        }
        .map_err(StoreError::persistence(ENTITY, "lookup"))?;
        let existing = match existing {
            Some(found) => Some(found),
            None => clusters::by_instance(conn, cluster.instance_id, verbosity)
                .await
                .map_err(StoreError::persistence(ENTITY, "lookup"))?,
        };

        let (row_id, action) = match existing.and_then(|e| e.id.map(|id| (id, e.created_at))) {
            Some((id, created_at)) => {
                cluster.created_at = created_at;
                cluster.updated_at = now_millis();
                clusters::update(conn, id, cluster).await?;
                (id, SaveAction::Updated)
            }
            None => {
                let now = now_millis();
                cluster.created_at = now;
                cluster.updated_at = now;
                (clusters::insert(conn, cluster).await?, SaveAction::Inserted)
            }
        };
        cluster.id = Some(row_id);

        let cascaded = cascade::raise(
            conn,
            ResolutionTier::Cluster,
            &cluster.constituents,
            cluster.instance_id,
            self.config.batch_chunk_size,
            verbosity,
        )
        .await?;

        metrics::record_saves("cluster", action.as_str(), 1);
        if identity == IdentityMode::InstanceOnly {
            warn!(scope = %cluster.scope, instance = cluster.instance_id, "Cluster saved without content identity");
        }
        if verbosity.summaries() {
            debug!(row_id, %action, guid = ?cluster.content_guid, cascaded, "Cluster saved");
        }

        Ok(SaveOutcome { row_id, action, identity, cascaded, duplicates_dropped })
    }

    /// Replace every cluster of every scope present in `batch` with the
    /// batch's contents, in one transaction.
    ///
    /// Clusters of those scopes that are absent from the batch are deleted.
    /// Nothing is written if any record fails validation.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn batch_save_clusters(&self, batch: Vec<ClusterSleeve>) -> Result<BatchSaveReport, StoreError> {
        let _timer = LatencyTimer::new("cluster", "batch_save");
        let mut tx = self.store.begin().await?;
        let result = self.batch_save_clusters_in(&mut tx, batch).await;
        self.finish(tx, result, ENTITY, "batch_save").await
    }

    /// [`batch_save_clusters`](Self::batch_save_clusters) inside an open transaction.
    pub async fn batch_save_clusters_in(
        &self,
        tx: &mut StoreTx,
        batch: Vec<ClusterSleeve>,
    ) -> Result<BatchSaveReport, StoreError> {
        let mut report = BatchSaveReport::new();
        metrics::record_batch_size("cluster", batch.len());

        // Normalise and validate everything before the first write.
        let mut records: Vec<ClusterSleeve> = Vec::with_capacity(batch.len());
        let mut slots: HashMap<BatchKey, usize> = HashMap::new();
        for mut cluster in batch {
            report.duplicates_dropped += cluster.normalize();
            validate(&cluster)?;
            match slots.get(&batch_key(&cluster)) {
                Some(&slot) => {
                    report.duplicates_dropped += 1;
                    records[slot] = cluster;
                }
                None => {
                    slots.insert(batch_key(&cluster), records.len());
                    records.push(cluster);
                }
            }
        }

        let conn = tx.conn();
        let verbosity = self.config.verbosity;
        let chunk = self.config.batch_chunk_size;

        let scopes: BTreeSet<ScopeKey> = records.iter().map(|c| c.scope.clone()).collect();
        let incoming: HashSet<Uuid> = records.iter().filter_map(|c| c.content_guid).collect();
        let incoming_list: Vec<Uuid> = incoming.iter().copied().collect();
        let created = clusters::created_at_by_guid(conn, &incoming_list, chunk).await?;

        report.scopes = scopes.len();
        for scope in &scopes {
            report.ghosts_removed += count_ghosts(conn, scope, &slots, verbosity).await?;
            clusters::delete_scope(conn, scope).await?;
        }
        // Same identity stored under another scope: moved, not a ghost.
        clusters::delete_by_guids(conn, &incoming_list, chunk).await?;

        let now = now_millis();
        for cluster in &mut records {
            cluster.created_at = cluster.content_guid.and_then(|g| created.get(&g).copied()).unwrap_or(now);
            cluster.updated_at = now;
            cluster.id = Some(clusters::insert(conn, cluster).await?);
            report.inserted += 1;

            report.cascaded += cascade::raise(
                conn,
                ResolutionTier::Cluster,
                &cluster.constituents,
                cluster.instance_id,
                chunk,
                verbosity,
            )
            .await?;

            if verbosity.per_row() {
                debug!(
                    batch_id = %report.batch_id,
                    guid = ?cluster.content_guid,
                    constituents = ?constituent_keys(cluster),
                    "Cluster written"
                );
            }
        }

        metrics::record_ghosts_removed("cluster", report.ghosts_removed);
        metrics::record_saves("cluster", "inserted", report.inserted as u64);
        if verbosity.summaries() {
            info!(
                batch_id = %report.batch_id,
                scopes = report.scopes,
                inserted = report.inserted,
                ghosts_removed = report.ghosts_removed,
                cascaded = report.cascaded,
                duplicates_dropped = report.duplicates_dropped,
                "Cluster batch saved"
            );
        }
        Ok(report)
    }
}

/// Rows of `scope` whose identity is not being written back.
async fn count_ghosts(
    conn: &mut AnyConnection,
    scope: &ScopeKey,
    incoming: &HashMap<BatchKey, usize>,
    verbosity: Verbosity,
) -> Result<u64, StoreError> {
    let existing = clusters::by_scope(conn, scope, verbosity)
        .await
        .map_err(StoreError::persistence(ENTITY, "lookup"))?;
    let mut ghosts = 0;
    for cluster in existing.iter().filter(|c| !incoming.contains_key(&batch_key(c))) {
        ghosts += 1;
        if verbosity.per_row() {
            debug!(scope = %scope, guid = ?cluster.content_guid, row = ?cluster.id, "Removing ghost cluster");
        }
    }
    Ok(ghosts)
}
