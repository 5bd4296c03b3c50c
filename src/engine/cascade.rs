//! Flag cascade from sleeves down to the clash zones they cover.

use super::SleeveEngine;
use crate::config::Verbosity;
use crate::identity::{ClusterRef, ConstituentKey};
use crate::metrics;
use crate::model::ResolutionTier;
use crate::storage::sql::StoreTx;
use crate::storage::traits::StoreError;
use crate::storage::{clash_zones, clusters};
use sqlx::AnyConnection;
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Clash zones covered by a set of constituents. Cluster references expand
/// to the cluster's own constituent GUIDs; unknown clusters cover nothing.
pub(super) async fn covered_zones(
    conn: &mut AnyConnection,
    keys: &[ConstituentKey],
    verbosity: Verbosity,
) -> Result<Vec<Uuid>, StoreError> {
    let mut zones = BTreeSet::new();
    for key in keys {
        match key {
            ConstituentKey::Individual(guid) => {
                zones.insert(*guid);
            }
            ConstituentKey::Cluster(cluster_ref) => {
                let found = match cluster_ref {
                    ClusterRef::Instance(id) => clusters::by_instance(conn, *id, verbosity).await,
                    ClusterRef::Row(id) => clusters::by_row_id(conn, *id, verbosity).await,
                }
                .map_err(StoreError::persistence("ClusterSleeve", "lookup"))?;

                match found {
                    Some(cluster) => zones.extend(cluster.constituents),
                    None => warn!(key = %key, "Cluster constituent not found, nothing to cascade"),
                }
            }
        }
    }
    Ok(zones.into_iter().collect())
}

/// Raise `tier` on `zones`, linking `owner_instance_id` when it is a real id.
pub(super) async fn raise(
    conn: &mut AnyConnection,
    tier: ResolutionTier,
    zones: &[Uuid],
    owner_instance_id: i64,
    chunk_size: usize,
    verbosity: Verbosity,
) -> Result<u64, StoreError> {
    if zones.is_empty() {
        return Ok(0);
    }
    let owner = (owner_instance_id > 0).then_some(owner_instance_id);
    let raised = clash_zones::raise_tier(conn, zones, tier, owner, chunk_size).await?;
    metrics::record_cascade(&tier.to_string(), raised);

    if verbosity.per_row() {
        for zone in zones {
            debug!(%tier, zone = %zone, owner = ?owner, "Zone flag raised");
        }
    }
    if (raised as usize) < zones.len() {
        debug!(%tier, requested = zones.len(), raised, "Some cascaded zones are not stored");
    }
    Ok(raised)
}

impl SleeveEngine {
    /// Raise `tier` on every clash zone the constituents cover and link them
    /// to `owner_instance_id`. Other tiers are left untouched.
    #[instrument(skip(self, constituents), fields(count = constituents.len()))]
    pub async fn mark_constituents_resolved(
        &self,
        tier: ResolutionTier,
        constituents: &[ConstituentKey],
        owner_instance_id: i64,
    ) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .mark_constituents_resolved_in(&mut tx, tier, constituents, owner_instance_id)
            .await;
        self.finish(tx, result, "ClashZone", "mark_constituents_resolved").await
    }

    /// [`mark_constituents_resolved`](Self::mark_constituents_resolved) inside an open transaction.
    pub async fn mark_constituents_resolved_in(
        &self,
        tx: &mut StoreTx,
        tier: ResolutionTier,
        constituents: &[ConstituentKey],
        owner_instance_id: i64,
    ) -> Result<u64, StoreError> {
        if owner_instance_id <= 0 {
            return Err(StoreError::validation("ClashZone", "owner instance id must be positive"));
        }
        let verbosity = self.config.verbosity;
        let zones = covered_zones(tx.conn(), constituents, verbosity).await?;
        raise(tx.conn(), tier, &zones, owner_instance_id, self.config.batch_chunk_size, verbosity).await
    }
}
